//! Member account records.
//!
//! The auth layer only ever talks to [`UserStore`]; [`PgUserStore`] is the
//! Postgres implementation and [`MemoryUserStore`] backs development mode and
//! tests. Records are snapshots: callers mutate a copy and hand it back to
//! [`UserStore::save`].

mod memory;
pub mod password;
mod postgres;

pub use memory::MemoryUserStore;
pub use password::Hasher;
pub use postgres::PgUserStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Disabled,
    Banned,
}

impl UserStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Banned => "banned",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            "banned" => Ok(Self::Banned),
            other => Err(StoreError::Backend(format!("unknown user status: {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub hashed_password: String,
    pub is_admin: bool,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Which unique column a write collided with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Username,
    Email,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Username => "username",
            Self::Email => "email address",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user not found")]
    NotFound,
    #[error("{0} already in use")]
    AlreadyExists(Field),
    #[error("incorrect password")]
    PasswordMismatch,
    #[error(transparent)]
    Password(#[from] password::PasswordError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up by email when `login` contains an `@`, otherwise by username.
    async fn find_by_username_or_email(&self, login: &str) -> Result<User, StoreError>;

    async fn get_by_id(&self, id: u64) -> Result<User, StoreError>;

    /// Create an active, non-admin account.
    async fn create(&self, username: &str, email: &str, password: &str)
    -> Result<User, StoreError>;

    /// Persist every mutable column of `user`. Fails with
    /// [`StoreError::AlreadyExists`] when the email belongs to another account.
    async fn save(&self, user: &User) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    fn hasher(&self) -> &Hasher;

    /// # Errors
    /// Returns [`StoreError::PasswordMismatch`] when the password is wrong.
    async fn check_password(&self, user: &User, password: &str) -> Result<(), StoreError> {
        if self.hasher().verify(password, &user.hashed_password).await? {
            Ok(())
        } else {
            Err(StoreError::PasswordMismatch)
        }
    }

    /// # Errors
    /// Returns an error if hashing fails.
    async fn hash_password(&self, password: &str) -> Result<String, StoreError> {
        Ok(self.hasher().hash(password).await?)
    }
}
