//! Runtime configuration loaded from the environment.

use anyhow::{bail, Result};

/// Server configuration.
///
/// Everything comes from environment variables (a `.env` file is honored)
/// with defaults suitable for local development. The two JWT secrets and the
/// admin registration secret have no defaults and must be provided.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub access_secret: String,
    pub refresh_secret: String,
    pub refresh_hash_key: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub admin_registration_secret: String,
    pub max_failed_logins: u32,
    pub lockout_secs: i64,
    pub login_rate_limit: u32,
    pub login_rate_window_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./spark.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let access_secret = require_secret("JWT_ACCESS_SECRET")?;
        let refresh_secret = require_secret("JWT_REFRESH_SECRET")?;
        if access_secret == refresh_secret {
            bail!("JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ");
        }

        // Keyed digest for stored refresh tokens; defaults to the refresh
        // secret so a minimal deployment needs only two secrets.
        let refresh_hash_key =
            std::env::var("REFRESH_HASH_KEY").unwrap_or_else(|_| refresh_secret.clone());

        let access_ttl_secs = std::env::var("JWT_ACCESS_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(900);

        let refresh_ttl_secs = std::env::var("JWT_REFRESH_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(7 * 24 * 3600);

        let admin_registration_secret = require_secret("ADMIN_REGISTRATION_SECRET")?;

        let max_failed_logins = std::env::var("MAX_FAILED_LOGINS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(5);

        let lockout_secs = std::env::var("LOCKOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(900);

        let login_rate_limit = std::env::var("LOGIN_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(30);

        let login_rate_window_secs = std::env::var("LOGIN_RATE_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(60);

        Ok(Self {
            database_path,
            port,
            access_secret,
            refresh_secret,
            refresh_hash_key,
            access_ttl_secs,
            refresh_ttl_secs,
            admin_registration_secret,
            max_failed_logins,
            lockout_secs,
            login_rate_limit,
            login_rate_window_secs,
        })
    }
}

fn require_secret(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("{} must be set to a non-empty value", var),
    }
}
