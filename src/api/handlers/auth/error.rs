use super::utils::format_duration_coarse;
use std::time::Duration;

/// Failure taxonomy shared by the session store, rate limiter, token vault and
/// authentication context. Controllers turn these into a flash message and a
/// redirect via [`AuthError::user_message`].
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("not found")]
    NotFound,
    #[error("expired")]
    Expired,
    #[error("permission denied")]
    PermissionDenied,
    #[error("rate limited for {retry_after:?}")]
    RateLimited { retry_after: Duration },
    /// `remaining` is set when this very attempt started the cooldown; it is
    /// `None` when the attempt was refused because a cooldown was already running.
    #[error("cooldown active for {wait:?}")]
    CooldownActive {
        wait: Duration,
        remaining: Option<u32>,
    },
    #[error("{0}")]
    Validation(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("not a valid user account")]
    InvalidSubject,
    #[error("not logged in")]
    NotLoggedIn,
}

impl AuthError {
    /// Text safe to show the visitor.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound | Self::Expired => {
                "This link is invalid or has expired. Please start over.".to_string()
            }
            Self::PermissionDenied => "You do not have permission to do that.".to_string(),
            Self::RateLimited { retry_after } => format!(
                "You have hit the rate limit; please wait {} before trying again.",
                format_duration_coarse(*retry_after)
            ),
            Self::CooldownActive {
                wait,
                remaining: Some(remaining),
            } => format!(
                "Please wait {} before trying again. You have {remaining} more attempt(s) remaining before you will be locked out.",
                format_duration_coarse(*wait)
            ),
            Self::CooldownActive {
                wait,
                remaining: None,
            } => format!(
                "You are doing that too often. Please wait {} before trying again.",
                format_duration_coarse(*wait)
            ),
            Self::Validation(message) => message.clone(),
            Self::BackendUnavailable(_) => {
                "The service is temporarily unavailable. Please try again later.".to_string()
            }
            Self::InvalidSubject => "That is not a valid user account.".to_string(),
            Self::NotLoggedIn => "You must be signed in to view this page.".to_string(),
        }
    }

    /// The attempt was counted and started a cooldown, as opposed to being
    /// refused outright.
    #[must_use]
    pub const fn started_cooldown(&self) -> bool {
        matches!(
            self,
            Self::CooldownActive {
                remaining: Some(_),
                ..
            }
        )
    }
}
