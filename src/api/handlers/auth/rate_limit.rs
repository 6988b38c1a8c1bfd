//! Cache-backed rate limiting for sensitive actions (login attempts, contact form).
//!
//! Flow Overview:
//! 1) Each `(namespace, subject)` pair owns one counter in the cache, created by
//!    the first ping and expiring one window later.
//! 2) While a cooldown is running, pings are refused without being counted.
//! 3) Every other ping is counted. Reaching `limit` locks the subject out for
//!    the rest of the window; going past `cooldown_at` starts a cooldown.
//! 4) Callers clear the counter after a qualifying success.
//!
//! Updates go through a compare-and-swap loop so concurrent pings on the same
//! key cannot overwrite each other.

use super::error::AuthError;
use crate::cache::{Cache, keys};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, warn};

const MAX_SWAP_ATTEMPTS: usize = 5;

pub const LOGIN_NAMESPACE: &str = "login";
pub const CONTACT_NAMESPACE: &str = "contact";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub limit: u32,
    /// Pings past this count start a cooldown; zero disables cooldowns.
    pub cooldown_at: u32,
    pub cooldown: Duration,
}

/// Failed logins per account: 3 free attempts, then 30 s between attempts,
/// locked for the rest of the hour at 10.
pub const LOGIN_POLICY: RateLimitPolicy = RateLimitPolicy {
    window: Duration::from_secs(60 * 60),
    limit: 10,
    cooldown_at: 3,
    cooldown: Duration::from_secs(30),
};

/// Contact form submissions by logged-out visitors: one message every two minutes.
pub const CONTACT_POLICY: RateLimitPolicy = RateLimitPolicy {
    window: Duration::from_secs(60 * 60),
    limit: 10,
    cooldown_at: 1,
    cooldown: Duration::from_secs(2 * 60),
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counter {
    pub pings: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_started: Option<DateTime<Utc>>,
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

fn until(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (then - now).to_std().unwrap_or_default()
}

impl RateLimitPolicy {
    /// Apply one ping to `counter`.
    ///
    /// Returns the counter to persist (`None` when nothing changes) together
    /// with the verdict for the caller.
    #[must_use]
    pub fn evaluate(
        &self,
        mut counter: Counter,
        now: DateTime<Utc>,
    ) -> (Option<Counter>, Result<(), AuthError>) {
        if let Some(not_before) = counter.not_before {
            if now < not_before {
                return (
                    None,
                    Err(AuthError::CooldownActive {
                        wait: until(now, not_before),
                        remaining: None,
                    }),
                );
            }
        }

        let started = *counter.window_started.get_or_insert(now);
        counter.pings = counter.pings.saturating_add(1);

        if counter.pings >= self.limit {
            let window_end = started
                .checked_add_signed(to_delta(self.window))
                .unwrap_or(now);
            let retry_after = until(now, window_end);
            let retry_after = if retry_after.is_zero() {
                self.window
            } else {
                retry_after
            };
            return (Some(counter), Err(AuthError::RateLimited { retry_after }));
        }

        if self.cooldown_at > 0 && counter.pings > self.cooldown_at {
            let candidate = now
                .checked_add_signed(to_delta(self.cooldown))
                .unwrap_or(now);
            counter.not_before = Some(counter.not_before.map_or(candidate, |nb| nb.max(candidate)));
            let remaining = self.limit - counter.pings;
            return (
                Some(counter),
                Err(AuthError::CooldownActive {
                    wait: self.cooldown,
                    remaining: Some(remaining),
                }),
            );
        }

        (Some(counter), Ok(()))
    }
}

/// One counter, identified by namespace and subject.
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    key: String,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    #[must_use]
    pub fn new(
        cache: Arc<dyn Cache>,
        namespace: &str,
        subject: &str,
        policy: RateLimitPolicy,
    ) -> Self {
        Self {
            cache,
            key: keys::rate_limit(namespace, subject),
            policy,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Count one attempt.
    ///
    /// # Errors
    /// `RateLimited` or `CooldownActive` when the caller should back off, and
    /// `BackendUnavailable` when the counter could not be written.
    pub async fn ping(&self) -> Result<(), AuthError> {
        self.ping_at(Utc::now()).await
    }

    /// [`RateLimiter::ping`] with an explicit clock.
    ///
    /// # Errors
    /// See [`RateLimiter::ping`].
    pub async fn ping_at(&self, now: DateTime<Utc>) -> Result<(), AuthError> {
        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let current = match self.cache.get(&self.key).await {
                Ok(current) => current,
                Err(err) => {
                    // An unreadable counter must not lock everybody out.
                    error!(key = %self.key, "Rate limiter read failed, allowing: {err}");
                    return Ok(());
                }
            };

            let counter = match current.as_deref().map(serde_json::from_slice::<Counter>) {
                None => Counter::default(),
                Some(Ok(counter)) => counter,
                Some(Err(err)) => {
                    warn!(key = %self.key, "Discarding unreadable rate limit counter: {err}");
                    Counter::default()
                }
            };

            let (next, verdict) = self.policy.evaluate(counter, now);
            let Some(next) = next else {
                return verdict;
            };

            let encoded = serde_json::to_vec(&next)
                .map_err(|err| AuthError::BackendUnavailable(err.to_string()))?;
            match self
                .cache
                .compare_and_swap(&self.key, current.as_deref(), &encoded, self.policy.window)
                .await
            {
                Ok(true) => return verdict,
                Ok(false) => {
                    debug!(key = %self.key, attempt, "Rate limit counter changed underneath us, retrying");
                }
                Err(err) => {
                    error!(key = %self.key, "Rate limiter write failed: {err}");
                    return Err(AuthError::BackendUnavailable(err.to_string()));
                }
            }
        }

        warn!(key = %self.key, "Rate limit counter contention did not settle");
        Err(AuthError::BackendUnavailable(
            "rate limit counter contention".to_string(),
        ))
    }

    /// Forget every attempt, e.g. after a successful login.
    ///
    /// # Errors
    /// Returns an error if the cache delete fails.
    pub async fn clear(&self) -> Result<(), AuthError> {
        self.cache
            .delete(&self.key)
            .await
            .map(|_| ())
            .map_err(|err| AuthError::BackendUnavailable(err.to_string()))
    }
}
