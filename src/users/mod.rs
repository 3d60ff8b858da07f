//! User records and the lookup collaborator the auth filter depends on.

mod password;
mod validate;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::{Error, Result};

pub use password::{Argon2Hasher, PasswordHasher, hash_blocking, verify_blocking};
pub use validate::{
    MAX_NICKNAME_LEN, MAX_PASSWORD_LEN, is_strong_password, validate_password, validate_signup,
};

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Regular account
    User,
    /// Administrator
    Admin,
}

impl Role {
    /// `"USER"` or `"ADMIN"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
        }
    }

    /// Capability string granted by this role, e.g. `ROLE_ADMIN`.
    #[must_use]
    pub fn authority(self) -> String {
        format!("ROLE_{}", self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Numeric id
    pub id: u64,
    /// Unique login name
    pub username: String,
    /// Unique email address
    pub email: String,
    /// Hashed credential
    pub password_hash: String,
    /// Display name
    pub nickname: String,
    /// Avatar URL
    pub profile_image: Option<String>,
    /// Role
    pub role: Role,
    /// Disabled accounts cannot log in or authenticate
    pub active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Capabilities derived from the role.
    #[must_use]
    pub fn authorities(&self) -> Vec<String> {
        vec![self.role.authority()]
    }

    /// Whether the account has the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Fields for a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Login name
    pub username: String,
    /// Email address
    pub email: String,
    /// Already-hashed credential
    pub password_hash: String,
    /// Display name; defaults to the username
    pub nickname: Option<String>,
    /// Role
    pub role: Role,
}

/// Lookup and persistence of user records.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Find a user by login name.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Find a user by id.
    async fn find_by_id(&self, id: u64) -> Result<Option<User>>;

    /// Create a user. Fails with [`Error::Conflict`] on a duplicate username or email.
    async fn create(&self, new_user: NewUser) -> Result<User>;

    /// Replace a stored user. Fails with [`Error::NotFound`] if the id is unknown.
    async fn update(&self, user: User) -> Result<User>;
}

#[derive(Default)]
struct Directory {
    by_id: HashMap<u64, User>,
    id_by_username: HashMap<String, u64>,
    id_by_email: HashMap<String, u64>,
    next_id: u64,
}

/// In-memory user directory.
///
/// Uniqueness checks and inserts happen under one write lock.
pub struct InMemoryUserDirectory {
    inner: RwLock<Directory>,
    clock: Arc<dyn Clock>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Directory {
                next_id: 1,
                ..Directory::default()
            }),
            clock,
        }
    }

    /// Number of stored users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn now(&self) -> DateTime<Utc> {
        let millis = i64::try_from(self.clock.now_millis()).unwrap_or(i64::MAX);
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let dir = self.inner.read();
        Ok(dir
            .id_by_username
            .get(username)
            .and_then(|id| dir.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: u64) -> Result<Option<User>> {
        Ok(self.inner.read().by_id.get(&id).cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User> {
        let now = self.now();
        let mut dir = self.inner.write();
        if dir.id_by_username.contains_key(&new_user.username) {
            return Err(Error::Conflict("Username already exists".to_string()));
        }
        let email_key = new_user.email.to_lowercase();
        if dir.id_by_email.contains_key(&email_key) {
            return Err(Error::Conflict("Email already exists".to_string()));
        }

        let id = dir.next_id;
        dir.next_id += 1;
        let user = User {
            id,
            nickname: new_user.nickname.unwrap_or_else(|| new_user.username.clone()),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            profile_image: None,
            role: new_user.role,
            active: true,
            created_at: now,
            updated_at: now,
        };
        dir.id_by_username.insert(user.username.clone(), id);
        dir.id_by_email.insert(email_key, id);
        dir.by_id.insert(id, user.clone());
        tracing::debug!(user_id = id, username = %user.username, "User created");
        Ok(user)
    }

    async fn update(&self, mut user: User) -> Result<User> {
        user.updated_at = self.now();
        let mut dir = self.inner.write();
        let Some(existing) = dir.by_id.get(&user.id) else {
            return Err(Error::NotFound("User".to_string()));
        };
        if existing.username != user.username || existing.email != user.email {
            return Err(Error::bad_request(
                "IMMUTABLE_FIELD",
                "Username and email cannot be changed",
            ));
        }
        dir.by_id.insert(user.id, user.clone());
        Ok(user)
    }
}
