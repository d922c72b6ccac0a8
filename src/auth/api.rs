//! Authentication API Endpoints
//! Mission: Registration, login with lockout, refresh rotation, profile

use crate::auth::{
    jwt::{TokenError, TokenService},
    models::{
        AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, UpdateProfileRequest, User,
        UserResponse, UserRole,
    },
    ownership::ResourceRecord,
    rbac::{ensure_allowed, Action, ResourceKind},
    user_store::UserStore,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub tokens: Arc<TokenService>,
    pub admin_registration_secret: String,
    pub max_failed_logins: u32,
    pub lockout_secs: i64,
}

impl AuthState {
    pub fn new(
        user_store: Arc<UserStore>,
        tokens: Arc<TokenService>,
        admin_registration_secret: String,
        max_failed_logins: u32,
        lockout_secs: i64,
    ) -> Self {
        Self {
            user_store,
            tokens,
            admin_registration_secret,
            max_failed_logins,
            lockout_secs,
        }
    }
}

/// Register endpoint - POST /api/auth/register
///
/// Admin registration requires the side-channel shared secret; the check
/// runs before any row is written. Registration implies login: the response
/// carries a fresh token pair.
pub async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    validate_name(&payload.name)?;
    validate_email(&payload.email)?;
    validate_password(&payload.password)?;

    if payload.role == UserRole::Admin {
        let presented = payload.admin_secret.as_deref().unwrap_or_default();
        if presented.is_empty() || presented != state.admin_registration_secret {
            warn!(email = %payload.email, "Admin registration with bad secret");
            return Err(ApiError::Forbidden);
        }
    }

    if state
        .user_store
        .find_by_email(&payload.email)
        .map_err(internal)?
        .is_some()
    {
        return Err(ApiError::Conflict);
    }

    let user = state
        .user_store
        .create_user(&payload.name, &payload.email, &payload.password, payload.role)
        .map_err(|e| {
            if UserStore::is_unique_violation(&e) {
                ApiError::Conflict
            } else {
                internal(e)
            }
        })?;

    let (response, refresh_hash) = mint_tokens(&state, &user)?;
    state
        .user_store
        .record_successful_login(&user.id, &refresh_hash)
        .map_err(internal)?;

    info!(user = %user.email, role = user.role.as_str(), "Registered");

    Ok((StatusCode::CREATED, Json(response)))
}

/// Login endpoint - POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = state
        .user_store
        .find_by_email(&payload.email)
        .map_err(internal)?
        .ok_or_else(|| {
            // Generic failure: do not reveal whether the email exists.
            warn!(email = %payload.email, "Login attempt for unknown email");
            ApiError::InvalidCredentials
        })?;

    if user.is_locked() {
        warn!(user = %user.id, "Login attempt on locked account");
        return Err(ApiError::AccountLocked);
    }

    if !user.active {
        warn!(user = %user.id, "Login attempt on deactivated account");
        return Err(ApiError::AccountDisabled);
    }

    if !UserStore::check_password(&user, &payload.password).map_err(internal)? {
        let penalty = state
            .user_store
            .record_failed_login(&user.id, state.max_failed_logins, state.lockout_secs)
            .map_err(internal)?;

        if penalty.lock_until.is_some() {
            warn!(
                user = %user.id,
                attempts = penalty.failed_attempts,
                "Account locked after repeated failures"
            );
            return Err(ApiError::AccountLocked);
        }

        warn!(user = %user.id, attempts = penalty.failed_attempts, "Failed login");
        return Err(ApiError::InvalidCredentials);
    }

    let (response, refresh_hash) = mint_tokens(&state, &user)?;
    state
        .user_store
        .record_successful_login(&user.id, &refresh_hash)
        .map_err(internal)?;

    info!(user = %user.email, role = user.role.as_str(), "Login successful");

    Ok(Json(response))
}

/// Logout endpoint - POST /api/auth/logout
///
/// Clears the stored refresh digest. Idempotent.
pub async fn logout(
    State(state): State<AuthState>,
    Extension(user): Extension<User>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .user_store
        .clear_refresh_hash(&user.id)
        .map_err(internal)?;

    info!(user = %user.id, "Logged out");

    Ok(Json(json!({ "success": true, "message": "Logged out" })))
}

/// Refresh endpoint - POST /api/auth/refresh
///
/// Rotates the refresh token: the presented token's digest must match the
/// stored one, and a brand-new pair replaces it. A digest mismatch means
/// the token was already rotated out or the session was logged out.
pub async fn refresh(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let claims = state.tokens.verify_refresh_token(&payload.refresh_token)?;
    let user_id = claims.user_id()?;

    let user = state
        .user_store
        .find_by_id(&user_id)
        .map_err(internal)?
        .ok_or(ApiError::Unauthorized)?;

    let stored = user
        .refresh_token_hash
        .as_deref()
        .ok_or(ApiError::Unauthorized)?;

    let presented = state.tokens.hash_refresh_token(&payload.refresh_token);
    if presented != stored {
        warn!(user = %user.id, "Refresh token digest mismatch (rotated or logged out)");
        return Err(ApiError::Unauthorized);
    }

    if !user.active {
        return Err(ApiError::Unauthorized);
    }

    let (response, refresh_hash) = mint_tokens(&state, &user)?;
    state
        .user_store
        .store_refresh_hash(&user.id, &refresh_hash)
        .map_err(internal)?;

    Ok(Json(response))
}

/// Get current user profile - GET /api/auth/me
pub async fn get_profile(
    State(state): State<AuthState>,
    Extension(user): Extension<User>,
) -> Result<Json<UserResponse>, ApiError> {
    let fresh = state
        .user_store
        .find_by_id(&user.id)
        .map_err(internal)?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(UserResponse::from_user(&fresh)))
}

/// Update current user profile - PUT /api/auth/me
///
/// Role is not updatable here; a password change is re-hashed before it
/// touches the store.
pub async fn update_profile(
    State(state): State<AuthState>,
    Extension(user): Extension<User>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let mut fresh = state
        .user_store
        .find_by_id(&user.id)
        .map_err(internal)?
        .ok_or(ApiError::NotFound)?;

    if let Some(name) = payload.name {
        validate_name(&name)?;
        fresh.name = name;
    }
    if let Some(email) = payload.email {
        validate_email(&email)?;
        fresh.email = email;
    }
    if let Some(password) = payload.password {
        validate_password(&password)?;
        fresh.password_hash = UserStore::hash_password(&password).map_err(internal)?;
    }

    state.user_store.save(&fresh).map_err(|e| {
        if UserStore::is_unique_violation(&e) {
            ApiError::Conflict
        } else {
            internal(e)
        }
    })?;

    Ok(Json(UserResponse::from_user(&fresh)))
}

/// List all users - GET /api/admin/users
pub async fn list_users(
    State(state): State<AuthState>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = state.user_store.list_users().map_err(internal)?;
    let response: Vec<UserResponse> = users.iter().map(UserResponse::from_user).collect();
    Ok(Json(response))
}

/// Deactivate a user - DELETE /api/admin/users/:id
///
/// Accounts are soft-deactivated, never hard-deleted.
pub async fn deactivate_user(
    State(state): State<AuthState>,
    Extension(actor): Extension<User>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = Uuid::parse_str(&user_id)
        .map_err(|_| ApiError::Validation("Invalid user id format".to_string()))?;

    if id == actor.id {
        return Err(ApiError::Validation(
            "Cannot deactivate your own account".to_string(),
        ));
    }

    if state
        .user_store
        .find_by_id(&id)
        .map_err(internal)?
        .is_none()
    {
        return Err(ApiError::NotFound);
    }

    state.user_store.set_active(&id, false).map_err(internal)?;
    // A dead session must not be refreshable.
    state.user_store.clear_refresh_hash(&id).map_err(internal)?;

    Ok(StatusCode::NO_CONTENT)
}

/// List records of a kind - GET /api/resources/:kind
///
/// The capability gate already ran; non-admins see their own records.
pub async fn list_resources(
    State(state): State<AuthState>,
    Extension(user): Extension<User>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<ResourceRecord>>, ApiError> {
    let kind = ResourceKind::from_str(&kind)
        .ok_or_else(|| ApiError::Validation("Unknown resource kind".to_string()))?;

    let records = state.user_store.list_resources(kind).map_err(internal)?;
    let records = match user.role {
        UserRole::Admin => records,
        _ => records
            .into_iter()
            .filter(|r| crate::auth::ownership::owns(&user, r))
            .collect(),
    };

    Ok(Json(records))
}

/// Fetch one record - GET /api/resources/:kind/:id
///
/// `verify_ownership` fetched the record and attached it; the handler just
/// returns it.
pub async fn get_resource(
    Extension(user): Extension<User>,
    Extension(resource): Extension<ResourceRecord>,
) -> Result<Json<ResourceRecord>, ApiError> {
    // The route gate checked the path kind; re-check against the record's
    // actual kind in case the two diverge.
    ensure_allowed(&user, resource.kind, Action::Read, "resource")?;
    Ok(Json(resource))
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::Validation("Name cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(ApiError::Validation("Invalid email format".to_string()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

/// Issue an access+refresh pair and the refresh digest to persist.
fn mint_tokens(state: &AuthState, user: &User) -> Result<(AuthResponse, String), ApiError> {
    let (access_token, expires_in) = state
        .tokens
        .issue_access_token(user.id)
        .map_err(internal)?;
    let refresh_token = state
        .tokens
        .issue_refresh_token(user.id)
        .map_err(internal)?;
    let refresh_hash = state.tokens.hash_refresh_token(&refresh_token);

    let response = AuthResponse {
        access_token,
        refresh_token,
        expires_in,
        user: UserResponse::from_user(user),
    };

    Ok((response, refresh_hash))
}

fn internal(err: anyhow::Error) -> ApiError {
    error!("Store failure: {:#}", err);
    ApiError::Internal
}

/// Auth API errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    Validation(String),
    InvalidCredentials,
    Unauthorized,
    TokenExpired,
    TokenInvalid,
    TokenMalformed,
    Forbidden,
    NotFound,
    Conflict,
    AccountLocked,
    AccountDisabled,
    Internal,
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ApiError::TokenExpired,
            TokenError::Invalid => ApiError::TokenInvalid,
            TokenError::Malformed => ApiError::TokenMalformed,
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials
            | ApiError::Unauthorized
            | ApiError::TokenExpired
            | ApiError::TokenInvalid
            | ApiError::TokenMalformed
            | ApiError::AccountDisabled => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::AccountLocked => StatusCode::LOCKED,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::TokenExpired => "TOKEN_EXPIRED",
            ApiError::TokenInvalid => "TOKEN_INVALID",
            ApiError::TokenMalformed => "TOKEN_MALFORMED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::Conflict => "CONFLICT",
            ApiError::AccountLocked => "ACCOUNT_LOCKED",
            ApiError::AccountDisabled => "ACCOUNT_DISABLED",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Validation(msg) => msg.clone(),
            ApiError::InvalidCredentials => "Invalid email or password".to_string(),
            ApiError::Unauthorized => "Authentication required".to_string(),
            ApiError::TokenExpired => "Token expired".to_string(),
            ApiError::TokenInvalid => "Invalid token".to_string(),
            ApiError::TokenMalformed => "Malformed token".to_string(),
            ApiError::Forbidden => "Insufficient permissions".to_string(),
            ApiError::NotFound => "Resource not found".to_string(),
            ApiError::Conflict => "Email already registered".to_string(),
            // No unlock timestamp: the exact remaining duration stays private.
            ApiError::AccountLocked => {
                "Account temporarily locked. Try again later".to_string()
            }
            ApiError::AccountDisabled => "Account is deactivated".to_string(),
            ApiError::Internal => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "message": self.message(),
            "code": self.code(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::AccountLocked.status(), StatusCode::LOCKED);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Validation("bad".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_token_error_mapping() {
        assert_eq!(ApiError::from(TokenError::Expired), ApiError::TokenExpired);
        assert_eq!(ApiError::from(TokenError::Invalid), ApiError::TokenInvalid);
        assert_eq!(
            ApiError::from(TokenError::Malformed),
            ApiError::TokenMalformed
        );
    }

    #[test]
    fn test_lockout_message_has_no_timestamp() {
        let message = ApiError::AccountLocked.message();
        assert!(message.contains("Try again later"));
        assert!(!message.contains(&Utc::now().timestamp().to_string()));
    }

    #[test]
    fn test_validation_helpers() {
        assert!(validate_name("Alice").is_ok());
        assert!(validate_name("  ").is_err());
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("alice.example.com").is_err());
        assert!(validate_password("Secret123!").is_ok());
        assert!(validate_password("short").is_err());
    }
}
