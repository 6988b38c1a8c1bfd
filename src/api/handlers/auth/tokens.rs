//! Single-use verification tokens for signup, password reset and email change.
//!
//! A token is an opaque random string used as the suffix of a cache key; the
//! cached record holds the typed payload. Tokens expire passively through the
//! cache TTL and are burned before the change they authorize is applied, so a
//! link can be followed at most once even when two requests race.

use super::{error::AuthError, utils};
use crate::cache::{self, Cache, CacheError, keys};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error};

/// A payload that can be stored behind a verification token.
pub trait VerificationToken: Serialize + DeserializeOwned + Send + Sync {
    /// Cache key prefix for this kind of token.
    const PREFIX: &'static str;
}

/// Proof that someone controls `email`, used to finish signing up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupToken {
    pub email: String,
}

impl VerificationToken for SignupToken {
    const PREFIX: &'static str = "signup-token";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetToken {
    pub user_id: u64,
}

impl VerificationToken for ResetToken {
    const PREFIX: &'static str = "reset-password";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEmailToken {
    pub user_id: u64,
    pub new_email: String,
}

impl VerificationToken for ChangeEmailToken {
    const PREFIX: &'static str = "change-email";
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredToken<T> {
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    payload: T,
}

#[derive(Clone)]
pub struct TokenVault {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl TokenVault {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `payload` behind a fresh token using the default TTL.
    ///
    /// # Errors
    /// Returns `BackendUnavailable` when the token cannot be generated or stored.
    pub async fn issue<T: VerificationToken>(&self, payload: &T) -> Result<String, AuthError> {
        self.issue_with_ttl(payload, self.ttl).await
    }

    /// # Errors
    /// Returns `BackendUnavailable` when the token cannot be generated or stored.
    pub async fn issue_with_ttl<T: VerificationToken>(
        &self,
        payload: &T,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let token = utils::generate_token()
            .map_err(|err| AuthError::BackendUnavailable(err.to_string()))?;
        let issued_at = Utc::now();
        let record = StoredToken {
            token: token.clone(),
            issued_at,
            expires_at: issued_at
                .checked_add_signed(TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            payload,
        };

        cache::set_json(self.cache.as_ref(), &keys::token(T::PREFIX, &token), &record, ttl)
            .await
            .map_err(|err| {
                error!(prefix = T::PREFIX, "Failed to store verification token: {err}");
                AuthError::BackendUnavailable(err.to_string())
            })?;
        debug!(prefix = T::PREFIX, "verification token issued");
        Ok(token)
    }

    /// Look a token up without using it.
    ///
    /// # Errors
    /// `NotFound` for unknown or malformed tokens, `Expired` past the deadline,
    /// `BackendUnavailable` when the cache cannot be read.
    pub async fn validate<T: VerificationToken>(&self, token: &str) -> Result<T, AuthError> {
        if !utils::looks_like_token(token) {
            return Err(AuthError::NotFound);
        }
        let record = cache::get_json::<StoredToken<T>>(
            self.cache.as_ref(),
            &keys::token(T::PREFIX, token),
        )
        .await;
        Self::unwrap_record(token, record)
    }

    /// Delete a token. Burning an unknown token is not an error.
    ///
    /// # Errors
    /// Returns `BackendUnavailable` when the cache delete fails.
    pub async fn burn<T: VerificationToken>(&self, token: &str) -> Result<(), AuthError> {
        if !utils::looks_like_token(token) {
            return Ok(());
        }
        self.cache
            .delete(&keys::token(T::PREFIX, token))
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(prefix = T::PREFIX, "Failed to burn verification token: {err}");
                AuthError::BackendUnavailable(err.to_string())
            })
    }

    /// Validate and burn in one atomic step. Of two concurrent callers with
    /// the same token exactly one receives the payload.
    ///
    /// # Errors
    /// Same as [`TokenVault::validate`].
    pub async fn consume<T: VerificationToken>(&self, token: &str) -> Result<T, AuthError> {
        if !utils::looks_like_token(token) {
            return Err(AuthError::NotFound);
        }
        let record = match self.cache.take(&keys::token(T::PREFIX, token)).await {
            Ok(Some(bytes)) => serde_json::from_slice::<StoredToken<T>>(&bytes)
                .map(Some)
                .map_err(CacheError::from),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        };
        Self::unwrap_record(token, record)
    }

    fn unwrap_record<T>(
        token: &str,
        record: Result<Option<StoredToken<T>>, CacheError>,
    ) -> Result<T, AuthError> {
        match record {
            Ok(Some(record)) => {
                if record.token != token {
                    return Err(AuthError::NotFound);
                }
                if record.expires_at <= Utc::now() {
                    return Err(AuthError::Expired);
                }
                Ok(record.payload)
            }
            Ok(None) => Err(AuthError::NotFound),
            Err(CacheError::Serialization(err)) => {
                error!("Discarding unreadable verification token: {err}");
                Err(AuthError::NotFound)
            }
            Err(err) => {
                error!("Failed to read verification token: {err}");
                Err(AuthError::BackendUnavailable(err.to_string()))
            }
        }
    }
}
