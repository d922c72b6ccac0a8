//! JWT Token Handler
//! Mission: Mint and verify access/refresh tokens securely

use crate::auth::models::Claims;
use crate::config::Config;
use anyhow::{Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::Sha256;
use tracing::debug;
use uuid::Uuid;

/// Issuer claim pinned into every token.
pub const ISSUER: &str = "spark-therapy-api";
/// Audience claim pinned into every token.
pub const AUDIENCE: &str = "spark-therapy-client";

type HmacSha256 = Hmac<Sha256>;

/// Token verification failures, in decreasing order of specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Signature checks out but the token is past its expiry.
    Expired,
    /// Signature, issuer, audience, or algorithm mismatch.
    Invalid,
    /// Not a decodable token, or required claims are missing.
    Malformed,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Expired => write!(f, "Token expired"),
            TokenError::Invalid => write!(f, "Token invalid"),
            TokenError::Malformed => write!(f, "Token malformed"),
        }
    }
}

impl std::error::Error for TokenError {}

impl Claims {
    /// Parse the subject id out of verified claims.
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.id).map_err(|_| TokenError::Malformed)
    }
}

/// Token service for both token classes.
///
/// Access and refresh tokens share one claim shape but are signed with
/// distinct secrets, so neither secret can mint the other class. The
/// algorithm is fixed to HS256 (no negotiation).
pub struct TokenService {
    access_secret: String,
    refresh_secret: String,
    hash_key: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenService {
    pub fn new(
        access_secret: String,
        refresh_secret: String,
        hash_key: String,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
    ) -> Self {
        Self {
            access_secret,
            refresh_secret,
            hash_key,
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.access_secret.clone(),
            config.refresh_secret.clone(),
            config.refresh_hash_key.clone(),
            config.access_ttl_secs,
            config.refresh_ttl_secs,
        )
    }

    /// Generate a short-lived access token for a user.
    ///
    /// Returns the token together with its lifetime in seconds.
    pub fn issue_access_token(&self, user_id: Uuid) -> Result<(String, usize)> {
        let token = self.issue(user_id, &self.access_secret, self.access_ttl_secs)?;
        Ok((token, self.access_ttl_secs.max(0) as usize))
    }

    /// Generate a longer-lived refresh token for a user.
    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<String> {
        self.issue(user_id, &self.refresh_secret, self.refresh_ttl_secs)
    }

    fn issue(&self, user_id: Uuid, secret: &str, ttl_secs: i64) -> Result<String> {
        let expiration = Utc::now()
            .checked_add_signed(chrono::Duration::seconds(ttl_secs))
            .context("Invalid timestamp")?
            .timestamp() as usize;

        let claims = Claims {
            id: user_id.to_string(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            exp: expiration,
        };

        debug!("Issuing token for user {}, ttl {}s", user_id, ttl_secs);

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .context("Failed to sign token")
    }

    /// Validate an access token and extract claims.
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        verify(token, &self.access_secret)
    }

    /// Validate a refresh token and extract claims.
    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims, TokenError> {
        verify(token, &self.refresh_secret)
    }

    /// Keyed digest of a refresh token for storage comparison.
    ///
    /// Deterministic (same token, same digest) so the stored hash can be
    /// compared on refresh; keyed so a leaked digest is useless offline.
    pub fn hash_refresh_token(&self, token: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.hash_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn verify(token: &str, secret: &str) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.set_audience(&[AUDIENCE]);
    validation.set_required_spec_claims(&["exp", "iss", "aud"]);
    validation.leeway = 0;

    match decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation) {
        Ok(data) => Ok(data.claims),
        Err(e) => Err(match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::ImmatureSignature => TokenError::Invalid,
            _ => TokenError::Malformed,
        }),
    }
}
