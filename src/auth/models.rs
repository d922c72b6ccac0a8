//! Authentication Models
//! Mission: Define secure user and authentication data structures

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub role: UserRole,
    pub active: bool,
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,
    pub failed_attempts: u32,
    pub lock_until: Option<i64>, // unix seconds
    pub last_login: Option<String>,
    pub created_at: String,
}

impl User {
    /// Whether the account is currently locked out of login.
    pub fn is_locked(&self) -> bool {
        match self.lock_until {
            Some(until) => until > Utc::now().timestamp(),
            None => false,
        }
    }
}

/// User roles for RBAC
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "admin")]
    Admin, // Full access to all endpoints
    #[serde(rename = "therapist")]
    Therapist, // Manages assigned children and their records
    #[serde(rename = "parent")]
    Parent, // Read access to their own children's records
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Therapist => "therapist",
            UserRole::Parent => "parent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "therapist" => Some(UserRole::Therapist),
            "parent" => Some(UserRole::Parent),
            _ => None,
        }
    }
}

/// JWT Claims payload (wire contract for both token classes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,  // user id
    pub iss: String, // issuer, pinned
    pub aud: String, // audience, pinned
    pub exp: usize,  // expiration timestamp
}

/// Registration request body
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
    /// Required (and checked) only when registering an admin.
    pub admin_secret: Option<String>,
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Refresh request body
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Profile update request body
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Token pair response (login / register / refresh)
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: usize, // seconds until access-token expiration
    pub user: UserResponse,
}

/// User response (sanitized)
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub active: bool,
    pub last_login: Option<String>,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            active: user.active,
            last_login: user.last_login.clone(),
            created_at: user.created_at.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_role_serialization() {
        let admin = UserRole::Admin;
        let json = serde_json::to_string(&admin).unwrap();
        assert_eq!(json, r#""admin""#);

        let therapist: UserRole = serde_json::from_str(r#""therapist""#).unwrap();
        assert_eq!(therapist, UserRole::Therapist);
    }

    #[test]
    fn test_user_role_string_conversion() {
        assert_eq!(UserRole::Admin.as_str(), "admin");
        assert_eq!(UserRole::Therapist.as_str(), "therapist");
        assert_eq!(UserRole::Parent.as_str(), "parent");

        assert_eq!(UserRole::from_str("admin"), Some(UserRole::Admin));
        assert_eq!(UserRole::from_str("PARENT"), Some(UserRole::Parent));
        assert_eq!(UserRole::from_str("invalid"), None);
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            name: "Test".to_string(),
            email: "test@example.com".to_string(),
            password_hash: "secret-hash".to_string(),
            role: UserRole::Parent,
            active: true,
            refresh_token_hash: Some("digest".to_string()),
            failed_attempts: 0,
            lock_until: None,
            last_login: None,
            created_at: Utc::now().to_rfc3339(),
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("digest"));
    }

    #[test]
    fn test_lock_check() {
        let mut user = User {
            id: Uuid::new_v4(),
            name: "Test".to_string(),
            email: "test@example.com".to_string(),
            password_hash: String::new(),
            role: UserRole::Parent,
            active: true,
            refresh_token_hash: None,
            failed_attempts: 0,
            lock_until: None,
            last_login: None,
            created_at: Utc::now().to_rfc3339(),
        };
        assert!(!user.is_locked());

        user.lock_until = Some(Utc::now().timestamp() + 600);
        assert!(user.is_locked());

        user.lock_until = Some(Utc::now().timestamp() - 600);
        assert!(!user.is_locked());
    }
}
