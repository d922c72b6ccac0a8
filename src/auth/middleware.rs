//! Authentication Middleware
//! Mission: Protect API endpoints with access-token validation

use crate::auth::api::{ApiError, AuthState};
use crate::auth::models::{User, UserRole};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::pin::Pin;
use tracing::{error, warn};

/// Auth middleware that validates access tokens and loads the user.
///
/// The bearer header is the normal path; a `token=` query parameter is
/// accepted as a fallback for download links that cannot set headers.
pub async fn authenticate(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // First, check for token in query parameters (for download links)
    // Example: /api/resources/video/<id>?token=...
    let token_from_query = if let Some(query) = req.uri().query() {
        query
            .split('&')
            .find(|pair| pair.starts_with("token="))
            .and_then(|pair| pair.split('=').nth(1))
            .map(|t| t.to_string())
    } else {
        None
    };

    // Second, check for Authorization header (Bearer ...)
    let token_from_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string());

    let token = token_from_query
        .or(token_from_header)
        .ok_or(ApiError::Unauthorized)?;

    let claims = state.tokens.verify_access_token(&token)?;
    let user_id = claims.user_id()?;

    let user = state
        .user_store
        .find_by_id(&user_id)
        .map_err(|e| {
            error!("User lookup failed: {:#}", e);
            ApiError::Internal
        })?
        .ok_or(ApiError::Unauthorized)?;

    if !user.active {
        warn!(user = %user.id, "Request from deactivated account");
        return Err(ApiError::AccountDisabled);
    }

    // Attach claims and user so handlers and later gates can use them
    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

/// Role gate requiring the authenticated user's role to be in the set.
///
/// Returns a middleware closure for `middleware::from_fn`.
pub fn require_roles(
    allowed: &'static [UserRole],
) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Clone {
    move |req: Request, next: Next| {
        Box::pin(async move {
            let Some(user) = req.extensions().get::<User>() else {
                return ApiError::Unauthorized.into_response();
            };

            if !allowed.contains(&user.role) {
                warn!(
                    actor = %user.id,
                    role = user.role.as_str(),
                    path = req.uri().path(),
                    "Role gate denied"
                );
                return ApiError::Forbidden.into_response();
            }

            next.run(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_auth_error_responses() {
        let missing = ApiError::Unauthorized.into_response();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let expired = ApiError::TokenExpired.into_response();
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);

        let disabled = ApiError::AccountDisabled.into_response();
        assert_eq!(disabled.status(), StatusCode::UNAUTHORIZED);
    }
}
