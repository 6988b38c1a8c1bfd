//! Sessions, CSRF, rate limiting, verification tokens and the account controllers.
//!
//! ## Request pipeline
//!
//! 1) `session_layer` resolves the `session_id` cookie into a [`RequestContext`].
//! 2) `csrf_layer` attaches the browser's `xsrf_token` and rejects state-changing
//!    form posts that do not echo it in `_csrf`.
//! 3) `login_required` / `admin_required` guard member and admin routes.
//! 4) Controllers drive the [`SessionStore`], [`RateLimiter`] and [`TokenVault`].
//! 5) Cookies queued during the request are appended to the response.
//!
//! ## Login Rate Limiting
//!
//! Failed passwords are counted per account: three free attempts, then a
//! 30-second cooldown between attempts, and a lockout for the rest of the hour
//! at ten. A successful login clears the counter.
//!
//! ## Verification tokens
//!
//! Signup, password reset and email change links carry single-use tokens that
//! expire after 24 hours. Each flow burns its token before applying the change.

pub(crate) mod admin;
pub(crate) mod context;
pub(crate) mod csrf;
mod error;
pub(crate) mod login;
pub(crate) mod password;
pub(crate) mod principal;
pub(crate) mod rate_limit;
pub(crate) mod session;
pub(crate) mod settings;
pub(crate) mod signup;
mod state;
pub(crate) mod tokens;
mod utils;

pub use context::RequestContext;
pub use error::AuthError;
pub use rate_limit::{CONTACT_POLICY, LOGIN_POLICY, RateLimitPolicy, RateLimiter};
pub use session::{Session, SessionStore};
pub use state::{AuthConfig, AuthState};
pub use tokens::{ChangeEmailToken, ResetToken, SignupToken, TokenVault, VerificationToken};
pub use utils::format_duration_coarse;
pub(crate) use utils::{normalize_email, valid_email};

#[cfg(test)]
mod tests;
