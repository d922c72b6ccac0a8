//! Role-Based Access Control
//! Mission: Gate every resource by an enumerated role-capability matrix
//!
//! Capabilities are tagged (role, resource, action) variants rather than
//! name-concatenated strings, so the matrix is checked by the compiler and
//! unknown combinations fail closed.

use crate::auth::api::ApiError;
use crate::auth::models::{User, UserRole};
use axum::{
    extract::{RawPathParams, Request},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tracing::warn;

/// Operations a capability can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Map an HTTP method onto the capability action it requests.
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::POST => Some(Action::Create),
            Method::GET | Method::HEAD => Some(Action::Read),
            Method::PUT | Method::PATCH => Some(Action::Update),
            Method::DELETE => Some(Action::Delete),
            _ => None,
        }
    }
}

/// Clinic resource kinds the matrix covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Child,
    Program,
    Session,
    Schedule,
    Invoice,
    Fee,
    Complaint,
    Feedback,
    Video,
    Report,
    User,
}

impl ResourceKind {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Child => "child",
            ResourceKind::Program => "program",
            ResourceKind::Session => "session",
            ResourceKind::Schedule => "schedule",
            ResourceKind::Invoice => "invoice",
            ResourceKind::Fee => "fee",
            ResourceKind::Complaint => "complaint",
            ResourceKind::Feedback => "feedback",
            ResourceKind::Video => "video",
            ResourceKind::Report => "report",
            ResourceKind::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "child" => Some(ResourceKind::Child),
            "program" => Some(ResourceKind::Program),
            "session" => Some(ResourceKind::Session),
            "schedule" => Some(ResourceKind::Schedule),
            "invoice" => Some(ResourceKind::Invoice),
            "fee" => Some(ResourceKind::Fee),
            "complaint" => Some(ResourceKind::Complaint),
            "feedback" => Some(ResourceKind::Feedback),
            "video" => Some(ResourceKind::Video),
            "report" => Some(ResourceKind::Report),
            "user" => Some(ResourceKind::User),
            _ => None,
        }
    }
}

/// The role-capability matrix.
///
/// Admin holds the wildcard; therapists manage the clinical records of
/// their caseload; parents read their children's records and may file
/// complaints and feedback. Anything not granted here is denied.
pub fn role_allows(role: UserRole, resource: ResourceKind, action: Action) -> bool {
    use Action::*;
    use ResourceKind::*;

    match role {
        UserRole::Admin => true,
        UserRole::Therapist => matches!(
            (resource, action),
            (Child, Read)
                | (Child, Update)
                | (Program, Create)
                | (Program, Read)
                | (Program, Update)
                | (Session, Create)
                | (Session, Read)
                | (Session, Update)
                | (Session, Delete)
                | (Schedule, Create)
                | (Schedule, Read)
                | (Schedule, Update)
                | (Video, Create)
                | (Video, Read)
                | (Report, Create)
                | (Report, Read)
                | (Fee, Read)
                | (Feedback, Read)
        ),
        UserRole::Parent => matches!(
            (resource, action),
            (Child, Read)
                | (Session, Read)
                | (Schedule, Read)
                | (Invoice, Read)
                | (Fee, Read)
                | (Video, Read)
                | (Report, Read)
                | (Complaint, Create)
                | (Complaint, Read)
                | (Feedback, Create)
                | (Feedback, Read)
        ),
    }
}

/// Capability check with denial audit logging.
pub fn ensure_allowed(
    user: &User,
    resource: ResourceKind,
    action: Action,
    path: &str,
) -> Result<(), ApiError> {
    if role_allows(user.role, resource, action) {
        Ok(())
    } else {
        warn!(
            actor = %user.id,
            role = user.role.as_str(),
            resource = resource.as_str(),
            action = action.as_str(),
            path,
            "Authorization denied"
        );
        Err(ApiError::Forbidden)
    }
}

/// Capability gate for routes with a `:kind` path parameter.
///
/// The action is derived from the HTTP method. Runs after `authenticate`.
pub async fn authorize_resource(params: RawPathParams, req: Request, next: Next) -> Response {
    let Some(user) = req.extensions().get::<User>().cloned() else {
        return ApiError::Unauthorized.into_response();
    };

    let kind = params
        .iter()
        .find(|(name, _)| *name == "kind")
        .and_then(|(_, value)| ResourceKind::from_str(value));
    let Some(kind) = kind else {
        return ApiError::Validation("Unknown resource kind".to_string()).into_response();
    };

    let Some(action) = Action::from_method(req.method()) else {
        return ApiError::Forbidden.into_response();
    };

    match ensure_allowed(&user, kind, action, req.uri().path()) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Capability gate for routes with a fixed resource and action.
///
/// Returns a middleware closure for `middleware::from_fn`.
pub fn require_capability(
    resource: ResourceKind,
    action: Action,
) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Clone {
    move |req: Request, next: Next| {
        Box::pin(async move {
            let Some(user) = req.extensions().get::<User>().cloned() else {
                return ApiError::Unauthorized.into_response();
            };

            match ensure_allowed(&user, resource, action, req.uri().path()) {
                Ok(()) => next.run(req).await,
                Err(e) => e.into_response(),
            }
        })
    }
}
