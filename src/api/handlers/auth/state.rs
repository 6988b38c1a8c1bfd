//! Auth configuration and shared state.

use super::{
    rate_limit::{RateLimitPolicy, RateLimiter},
    session::{SESSION_TTL, SessionStore},
    tokens::TokenVault,
};
use crate::{cache::Cache, mail::Mailer, store::UserStore};
use std::{sync::Arc, time::Duration};

const DEFAULT_TOKEN_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_MAX_FORM_BYTES: usize = 64 * 1024;
const DEFAULT_SITE_TITLE: &str = "Portico";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    site_title: String,
    admin_email: Option<String>,
    session_ttl_seconds: u64,
    token_ttl_seconds: u64,
    skip_email_verification: bool,
    use_forwarded_for: bool,
    max_form_bytes: usize,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            site_title: DEFAULT_SITE_TITLE.to_string(),
            admin_email: None,
            session_ttl_seconds: SESSION_TTL.as_secs(),
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            skip_email_verification: false,
            use_forwarded_for: false,
            max_form_bytes: DEFAULT_MAX_FORM_BYTES,
        }
    }

    #[must_use]
    pub fn with_site_title(mut self, title: String) -> Self {
        self.site_title = title;
        self
    }

    #[must_use]
    pub fn with_admin_email(mut self, admin_email: Option<String>) -> Self {
        self.admin_email = admin_email.filter(|email| !email.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_skip_email_verification(mut self, skip: bool) -> Self {
        self.skip_email_verification = skip;
        self
    }

    #[must_use]
    pub fn with_use_forwarded_for(mut self, enabled: bool) -> Self {
        self.use_forwarded_for = enabled;
        self
    }

    #[must_use]
    pub fn with_max_form_bytes(mut self, bytes: usize) -> Self {
        self.max_form_bytes = bytes;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn site_title(&self) -> &str {
        &self.site_title
    }

    #[must_use]
    pub fn admin_email(&self) -> Option<&str> {
        self.admin_email.as_deref()
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    #[must_use]
    pub fn skip_email_verification(&self) -> bool {
        self.skip_email_verification
    }

    #[must_use]
    pub fn use_forwarded_for(&self) -> bool {
        self.use_forwarded_for
    }

    #[must_use]
    pub fn max_form_bytes(&self) -> usize {
        self.max_form_bytes
    }

    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    /// Absolute link to `path` on this site.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Everything the auth handlers share, built once at startup.
pub struct AuthState {
    config: AuthConfig,
    cache: Arc<dyn Cache>,
    store: Arc<dyn UserStore>,
    mailer: Mailer,
    sessions: SessionStore,
    vault: TokenVault,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        cache: Arc<dyn Cache>,
        store: Arc<dyn UserStore>,
        mailer: Mailer,
    ) -> Self {
        let sessions = SessionStore::new(cache.clone(), config.session_ttl())
            .with_secure_cookie(config.secure_cookies())
            .with_impersonation_notice(mailer.clone(), config.admin_email.clone());
        let vault = TokenVault::new(cache.clone(), config.token_ttl());
        Self {
            config,
            cache,
            store,
            mailer,
            sessions,
            vault,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &dyn Cache {
        self.cache.as_ref()
    }

    #[must_use]
    pub fn store(&self) -> &dyn UserStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn vault(&self) -> &TokenVault {
        &self.vault
    }

    #[must_use]
    pub fn rate_limiter(
        &self,
        namespace: &str,
        subject: &str,
        policy: RateLimitPolicy,
    ) -> RateLimiter {
        RateLimiter::new(self.cache.clone(), namespace, subject, policy)
    }
}
