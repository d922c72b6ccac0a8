//! User Storage
//! Mission: Securely store and manage user accounts with SQLite

use crate::auth::models::{User, UserRole};
use crate::auth::ownership::ResourceRecord;
use crate::auth::rbac::ResourceKind;
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

/// Outcome of recording a failed login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginPenalty {
    pub failed_attempts: u32,
    pub lock_until: Option<i64>,
}

/// User storage with SQLite backend.
///
/// Counter and lock mutations run as single UPDATE statements so concurrent
/// failed logins for the same account cannot under-count the threshold;
/// SQLite serializes the writers.
pub struct UserStore {
    db_path: String,
}

impl UserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_db(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                refresh_token_hash TEXT,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                lock_until INTEGER,
                last_login TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // Ownership fields of clinic records; the rows themselves belong to
        // the CRUD collaborators, the auth core only reads them.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS resources (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                parent_id TEXT,
                therapist_id TEXT,
                label TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        Connection::open(&self.db_path).context("Failed to open database")
    }

    /// Hash a password for storage (bcrypt, per-record salt).
    pub fn hash_password(password: &str) -> Result<String> {
        hash(password, DEFAULT_COST).context("Failed to hash password")
    }

    /// Check a plaintext password against a stored hash.
    pub fn check_password(user: &User, password: &str) -> Result<bool> {
        verify(password, &user.password_hash).context("Failed to verify password")
    }

    /// Whether an anyhow error wraps a SQLite unique-constraint violation.
    pub fn is_unique_violation(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }

    /// Get user by email
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE email = ?1", SELECT_USER))?;
        let user = stmt.query_row(params![email], map_user_row);
        optional(user)
    }

    /// Get user by id
    pub fn find_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_USER))?;
        let user = stmt.query_row(params![id.to_string()], map_user_row);
        optional(user)
    }

    /// Create a new user
    pub fn create_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: UserRole,
    ) -> Result<User> {
        let password_hash = Self::hash_password(password)?;

        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash,
            role,
            active: true,
            refresh_token_hash: None,
            failed_attempts: 0,
            lock_until: None,
            last_login: None,
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, name, email, password_hash, role, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                user.id.to_string(),
                user.name,
                user.email,
                user.password_hash,
                user.role.as_str(),
                user.created_at,
            ],
        )
        .context("Failed to insert user")?;

        info!(user = %user.email, role = user.role.as_str(), "Created user");

        Ok(user)
    }

    /// Persist mutated fields of a user record.
    pub fn save(&self, user: &User) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE users SET
                    name = ?1,
                    email = ?2,
                    password_hash = ?3,
                    active = ?4,
                    refresh_token_hash = ?5,
                    failed_attempts = ?6,
                    lock_until = ?7,
                    last_login = ?8
                 WHERE id = ?9",
                params![
                    user.name,
                    user.email,
                    user.password_hash,
                    user.active as i64,
                    user.refresh_token_hash,
                    user.failed_attempts as i64,
                    user.lock_until,
                    user.last_login,
                    user.id.to_string(),
                ],
            )
            .context("Failed to save user")?;

        if rows == 0 {
            anyhow::bail!("User not found");
        }
        Ok(())
    }

    /// Record a failed login attempt and apply the lockout policy.
    ///
    /// Increment and conditional lock happen in one statement so two
    /// concurrent failures cannot race past the threshold.
    pub fn record_failed_login(
        &self,
        id: &Uuid,
        threshold: u32,
        lockout_secs: i64,
    ) -> Result<LoginPenalty> {
        let conn = self.conn()?;
        let lock_until = Utc::now().timestamp() + lockout_secs;

        conn.execute(
            "UPDATE users SET
                failed_attempts = failed_attempts + 1,
                lock_until = CASE
                    WHEN failed_attempts + 1 >= ?1 THEN ?2
                    ELSE lock_until
                END
             WHERE id = ?3",
            params![threshold as i64, lock_until, id.to_string()],
        )
        .context("Failed to record login attempt")?;

        let (failed_attempts, lock_until): (i64, Option<i64>) = conn
            .query_row(
                "SELECT failed_attempts, lock_until FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to read login attempt counter")?;

        Ok(LoginPenalty {
            failed_attempts: failed_attempts as u32,
            lock_until,
        })
    }

    /// Reset the lockout state and store the new refresh digest after a
    /// successful login.
    pub fn record_successful_login(&self, id: &Uuid, refresh_hash: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET
                failed_attempts = 0,
                lock_until = NULL,
                last_login = ?1,
                refresh_token_hash = ?2
             WHERE id = ?3",
            params![Utc::now().to_rfc3339(), refresh_hash, id.to_string()],
        )
        .context("Failed to record successful login")?;
        Ok(())
    }

    /// Overwrite the stored refresh digest (registration, rotation).
    pub fn store_refresh_hash(&self, id: &Uuid, refresh_hash: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET refresh_token_hash = ?1 WHERE id = ?2",
            params![refresh_hash, id.to_string()],
        )
        .context("Failed to store refresh digest")?;
        Ok(())
    }

    /// Clear the stored refresh digest (logout). Idempotent.
    pub fn clear_refresh_hash(&self, id: &Uuid) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET refresh_token_hash = NULL WHERE id = ?1",
            params![id.to_string()],
        )
        .context("Failed to clear refresh digest")?;
        Ok(())
    }

    /// Soft-deactivate or reactivate an account.
    pub fn set_active(&self, id: &Uuid, active: bool) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE users SET active = ?1 WHERE id = ?2",
                params![active as i64, id.to_string()],
            )
            .context("Failed to update account status")?;

        if rows == 0 {
            anyhow::bail!("User not found");
        }

        info!(user = %id, active, "Account status changed");
        Ok(())
    }

    /// List all users (admin only)
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY created_at", SELECT_USER))?;
        let users = stmt
            .query_map([], map_user_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Insert a clinic record's ownership row (seed/test collaborator path).
    pub fn create_resource(
        &self,
        kind: ResourceKind,
        parent_id: Option<Uuid>,
        therapist_id: Option<Uuid>,
        label: &str,
    ) -> Result<ResourceRecord> {
        let record = ResourceRecord {
            id: Uuid::new_v4(),
            kind,
            parent_id,
            therapist_id,
            label: label.to_string(),
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO resources (id, kind, parent_id, therapist_id, label)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                record.kind.as_str(),
                record.parent_id.map(|u| u.to_string()),
                record.therapist_id.map(|u| u.to_string()),
                record.label,
            ],
        )
        .context("Failed to insert resource")?;

        Ok(record)
    }

    /// Fetch a clinic record's ownership row by id.
    pub fn find_resource(&self, id: &Uuid) -> Result<Option<ResourceRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, parent_id, therapist_id, label FROM resources WHERE id = ?1",
        )?;
        let record = stmt.query_row(params![id.to_string()], map_resource_row);
        optional(record)
    }

    /// List records of one kind (coarse-gated listing endpoint).
    pub fn list_resources(&self, kind: ResourceKind) -> Result<Vec<ResourceRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, parent_id, therapist_id, label FROM resources WHERE kind = ?1",
        )?;
        let records = stmt
            .query_map(params![kind.as_str()], map_resource_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

const SELECT_USER: &str = "SELECT id, name, email, password_hash, role, active,
    refresh_token_hash, failed_attempts, lock_until, last_login, created_at
    FROM users";

fn optional<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_uuid(idx: usize, value: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(4)?;
    Ok(User {
        id: parse_uuid(0, row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        // Unknown role strings fall back to the least-privileged role.
        role: UserRole::from_str(&role_str).unwrap_or(UserRole::Parent),
        active: row.get::<_, i64>(5)? != 0,
        refresh_token_hash: row.get(6)?,
        failed_attempts: row.get::<_, i64>(7)? as u32,
        lock_until: row.get(8)?,
        last_login: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn map_resource_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResourceRecord> {
    let kind_str: String = row.get(1)?;
    let kind = ResourceKind::from_str(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown resource kind: {kind_str}").into(),
        )
    })?;

    let parent_id = row
        .get::<_, Option<String>>(2)?
        .map(|s| parse_uuid(2, s))
        .transpose()?;
    let therapist_id = row
        .get::<_, Option<String>>(3)?
        .map(|s| parse_uuid(3, s))
        .transpose()?;

    Ok(ResourceRecord {
        id: parse_uuid(0, row.get::<_, String>(0)?)?,
        kind,
        parent_id,
        therapist_id,
        label: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (UserStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = UserStore::new(db_path).unwrap();
        (store, temp_file)
    }

    #[test]
    fn test_create_and_find_user() {
        let (store, _temp) = create_test_store();

        let created = store
            .create_user("Alice", "alice@example.com", "Secret123!", UserRole::Parent)
            .unwrap();
        assert_eq!(created.role, UserRole::Parent);
        assert!(created.active);
        assert_eq!(created.failed_attempts, 0);

        let by_email = store.find_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, created.id);

        let by_id = store.find_by_id(&created.id).unwrap().unwrap();
        assert_eq!(by_id.email, "alice@example.com");

        assert!(store.find_by_email("missing@example.com").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_is_unique_violation() {
        let (store, _temp) = create_test_store();

        store
            .create_user("Alice", "alice@example.com", "Secret123!", UserRole::Parent)
            .unwrap();
        let err = store
            .create_user("Alice2", "alice@example.com", "Other456!", UserRole::Parent)
            .unwrap_err();

        assert!(UserStore::is_unique_violation(&err));
    }

    #[test]
    fn test_password_check() {
        let (store, _temp) = create_test_store();
        let user = store
            .create_user("Bob", "bob@example.com", "Secret123!", UserRole::Therapist)
            .unwrap();

        assert!(UserStore::check_password(&user, "Secret123!").unwrap());
        assert!(!UserStore::check_password(&user, "wrong").unwrap());
    }

    #[test]
    fn test_failed_login_counter_and_lockout() {
        let (store, _temp) = create_test_store();
        let user = store
            .create_user("Bob", "bob@example.com", "Secret123!", UserRole::Parent)
            .unwrap();

        for expected in 1..=4u32 {
            let penalty = store.record_failed_login(&user.id, 5, 900).unwrap();
            assert_eq!(penalty.failed_attempts, expected);
            assert!(penalty.lock_until.is_none());
        }

        // Fifth failure crosses the threshold and sets the lock.
        let penalty = store.record_failed_login(&user.id, 5, 900).unwrap();
        assert_eq!(penalty.failed_attempts, 5);
        assert!(penalty.lock_until.is_some());

        let locked = store.find_by_id(&user.id).unwrap().unwrap();
        assert!(locked.is_locked());
    }

    #[test]
    fn test_successful_login_resets_lockout() {
        let (store, _temp) = create_test_store();
        let user = store
            .create_user("Bob", "bob@example.com", "Secret123!", UserRole::Parent)
            .unwrap();

        store.record_failed_login(&user.id, 5, 900).unwrap();
        store.record_failed_login(&user.id, 5, 900).unwrap();

        store.record_successful_login(&user.id, "digest").unwrap();

        let refreshed = store.find_by_id(&user.id).unwrap().unwrap();
        assert_eq!(refreshed.failed_attempts, 0);
        assert!(refreshed.lock_until.is_none());
        assert!(refreshed.last_login.is_some());
        assert_eq!(refreshed.refresh_token_hash.as_deref(), Some("digest"));
    }

    #[test]
    fn test_refresh_hash_rotation_and_clear() {
        let (store, _temp) = create_test_store();
        let user = store
            .create_user("Bob", "bob@example.com", "Secret123!", UserRole::Parent)
            .unwrap();

        store.store_refresh_hash(&user.id, "first").unwrap();
        store.store_refresh_hash(&user.id, "second").unwrap();
        let stored = store.find_by_id(&user.id).unwrap().unwrap();
        assert_eq!(stored.refresh_token_hash.as_deref(), Some("second"));

        store.clear_refresh_hash(&user.id).unwrap();
        // A second clear is not an error.
        store.clear_refresh_hash(&user.id).unwrap();
        let cleared = store.find_by_id(&user.id).unwrap().unwrap();
        assert!(cleared.refresh_token_hash.is_none());
    }

    #[test]
    fn test_save_persists_profile_fields() {
        let (store, _temp) = create_test_store();
        let mut user = store
            .create_user("Bob", "bob@example.com", "Secret123!", UserRole::Parent)
            .unwrap();

        user.name = "Robert".to_string();
        user.email = "robert@example.com".to_string();
        store.save(&user).unwrap();

        let saved = store.find_by_id(&user.id).unwrap().unwrap();
        assert_eq!(saved.name, "Robert");
        assert_eq!(saved.email, "robert@example.com");
        // Role is immutable in normal flow; save leaves it untouched.
        assert_eq!(saved.role, UserRole::Parent);
    }

    #[test]
    fn test_set_active() {
        let (store, _temp) = create_test_store();
        let user = store
            .create_user("Bob", "bob@example.com", "Secret123!", UserRole::Parent)
            .unwrap();

        store.set_active(&user.id, false).unwrap();
        let disabled = store.find_by_id(&user.id).unwrap().unwrap();
        assert!(!disabled.active);

        let missing = Uuid::new_v4();
        assert!(store.set_active(&missing, false).is_err());
    }

    #[test]
    fn test_resource_rows() {
        let (store, _temp) = create_test_store();
        let parent = Uuid::new_v4();
        let therapist = Uuid::new_v4();

        let child = store
            .create_resource(ResourceKind::Child, Some(parent), Some(therapist), "Child A")
            .unwrap();

        let found = store.find_resource(&child.id).unwrap().unwrap();
        assert_eq!(found.kind, ResourceKind::Child);
        assert_eq!(found.parent_id, Some(parent));
        assert_eq!(found.therapist_id, Some(therapist));

        let children = store.list_resources(ResourceKind::Child).unwrap();
        assert_eq!(children.len(), 1);
        assert!(store.list_resources(ResourceKind::Invoice).unwrap().is_empty());

        assert!(store.find_resource(&Uuid::new_v4()).unwrap().is_none());
    }
}
