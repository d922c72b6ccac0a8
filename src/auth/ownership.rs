//! Ownership Predicates
//! Mission: Gate access to specific record instances after the role check
//!
//! The coarse capability matrix says a parent may read children in general;
//! this layer decides whether they may read *that* child. The predicate is
//! pure; the middleware does the fetch and attaches the record for the
//! handler to reuse.

use crate::auth::api::{ApiError, AuthState};
use crate::auth::models::{User, UserRole};
use crate::auth::rbac::ResourceKind;
use axum::{
    extract::{RawPathParams, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

/// Ownership fields of a clinic record.
///
/// The record bodies live with the CRUD collaborators; the auth core only
/// sees the fields its predicates need.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceRecord {
    pub id: Uuid,
    pub kind: ResourceKind,
    pub parent_id: Option<Uuid>,
    pub therapist_id: Option<Uuid>,
    pub label: String,
}

/// Whether a user is the legitimate owner/assignee of a record instance.
///
/// Admin always owns; a therapist owns records assigned to them; a parent
/// owns records of their own children. No IO, no side effects.
pub fn owns(user: &User, resource: &ResourceRecord) -> bool {
    match user.role {
        UserRole::Admin => true,
        UserRole::Therapist => resource.therapist_id == Some(user.id),
        UserRole::Parent => resource.parent_id == Some(user.id),
    }
}

/// Instance gate for routes with an `:id` path parameter.
///
/// Runs after `authenticate` (and usually after the capability gate).
/// Fetches the record, applies the ownership predicate, and attaches the
/// record to request extensions on success.
pub async fn verify_ownership(
    State(state): State<AuthState>,
    params: RawPathParams,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(user) = req.extensions().get::<User>().cloned() else {
        return ApiError::Unauthorized.into_response();
    };

    let id = params
        .iter()
        .find(|(name, _)| *name == "id")
        .and_then(|(_, value)| Uuid::parse_str(value).ok());
    let Some(id) = id else {
        return ApiError::Validation("Invalid resource id".to_string()).into_response();
    };

    let resource = match state.user_store.find_resource(&id) {
        Ok(Some(resource)) => resource,
        Ok(None) => return ApiError::NotFound.into_response(),
        Err(e) => {
            error!("Resource lookup failed: {:#}", e);
            return ApiError::Internal.into_response();
        }
    };

    if !owns(&user, &resource) {
        warn!(
            actor = %user.id,
            role = user.role.as_str(),
            resource = resource.kind.as_str(),
            resource_id = %resource.id,
            path = req.uri().path(),
            "Ownership denied"
        );
        return ApiError::Forbidden.into_response();
    }

    req.extensions_mut().insert(resource);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(role: UserRole) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Test".to_string(),
            email: "test@example.com".to_string(),
            password_hash: String::new(),
            role,
            active: true,
            refresh_token_hash: None,
            failed_attempts: 0,
            lock_until: None,
            last_login: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    fn child(parent_id: Option<Uuid>, therapist_id: Option<Uuid>) -> ResourceRecord {
        ResourceRecord {
            id: Uuid::new_v4(),
            kind: ResourceKind::Child,
            parent_id,
            therapist_id,
            label: "Child A".to_string(),
        }
    }

    #[test]
    fn test_admin_always_owns() {
        let admin = user(UserRole::Admin);
        assert!(owns(&admin, &child(None, None)));
        assert!(owns(&admin, &child(Some(Uuid::new_v4()), Some(Uuid::new_v4()))));
    }

    #[test]
    fn test_therapist_owns_only_assigned_records() {
        let therapist = user(UserRole::Therapist);
        assert!(owns(&therapist, &child(None, Some(therapist.id))));
        assert!(!owns(&therapist, &child(None, Some(Uuid::new_v4()))));
        assert!(!owns(&therapist, &child(Some(therapist.id), None)));
        assert!(!owns(&therapist, &child(None, None)));
    }

    #[test]
    fn test_parent_owns_only_their_childrens_records() {
        let parent = user(UserRole::Parent);
        assert!(owns(&parent, &child(Some(parent.id), None)));
        assert!(!owns(&parent, &child(Some(Uuid::new_v4()), None)));
        assert!(!owns(&parent, &child(None, Some(parent.id))));
    }
}
