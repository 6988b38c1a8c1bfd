//! Server-side sessions bound to the `session_id` cookie.
//!
//! The cookie only carries a random UUID; everything else lives in the cache
//! under `session/<uuid>` and is rewritten (with a fresh TTL) on every
//! mutation. A missing, malformed, unknown or unreadable cookie yields a new
//! anonymous session with a new id, so a client can never choose its own id.
//! The id is also rotated whenever the session changes identity (login,
//! impersonation), and the record under the old id is deleted.

use super::{context::RequestContext, error::AuthError};
use crate::{
    cache::{self, Cache, keys},
    mail::{EmailMessage, Mailer},
    store::{User, UserStore},
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const SESSION_COOKIE_NAME: &str = "session_id";

/// Default cookie max-age and cache TTL: 30 days.
pub const SESSION_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30);

/// `last_login_at` is only rewritten when older than this.
pub const LAST_LOGIN_COOLDOWN: Duration = Duration::from_secs(8 * 60 * 60);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(skip)]
    id: String,
    #[serde(skip)]
    retired_id: Option<String>,
    #[serde(default)]
    logged_in: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<u64>,
    #[serde(default)]
    flashes: Vec<String>,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default, rename = "impersonator", skip_serializing_if = "Option::is_none")]
    impersonator_id: Option<u64>,
    #[serde(default)]
    last_seen: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// An anonymous session with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            retired_id: None,
            logged_in: false,
            user_id: None,
            flashes: Vec::new(),
            errors: Vec::new(),
            impersonator_id: None,
            last_seen: Utc::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// The user this session acts as, if logged in.
    #[must_use]
    pub fn user_id(&self) -> Option<u64> {
        self.user_id.filter(|_| self.logged_in)
    }

    #[must_use]
    pub fn impersonator_id(&self) -> Option<u64> {
        self.impersonator_id.filter(|_| self.logged_in)
    }

    #[must_use]
    pub const fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    #[must_use]
    pub fn flashes(&self) -> &[String] {
        &self.flashes
    }

    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn push_flash(&mut self, message: impl Into<String>) {
        self.flashes.push(message.into());
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Pop both message lists.
    pub fn take_messages(&mut self) -> (Vec<String>, Vec<String>) {
        (
            std::mem::take(&mut self.flashes),
            std::mem::take(&mut self.errors),
        )
    }

    /// # Errors
    /// Returns `InvalidSubject` for user id zero.
    pub fn set_logged_in(&mut self, user_id: u64) -> Result<(), AuthError> {
        if user_id == 0 {
            return Err(AuthError::InvalidSubject);
        }
        self.logged_in = true;
        self.user_id = Some(user_id);
        self.impersonator_id = None;
        self.rotate();
        Ok(())
    }

    pub fn set_logged_out(&mut self) {
        self.logged_in = false;
        self.user_id = None;
        self.impersonator_id = None;
    }

    /// Act as `target` on behalf of `admin`. Nothing changes on error.
    ///
    /// # Errors
    /// `PermissionDenied` unless `admin` is an administrator, `InvalidSubject`
    /// for a zero id on either side.
    pub fn set_impersonating(&mut self, target: u64, admin: &User) -> Result<(), AuthError> {
        if !admin.is_admin {
            return Err(AuthError::PermissionDenied);
        }
        if target == 0 || admin.id == 0 {
            return Err(AuthError::InvalidSubject);
        }
        self.logged_in = true;
        self.user_id = Some(target);
        self.impersonator_id = Some(admin.id);
        self.rotate();
        Ok(())
    }

    fn rotate(&mut self) {
        let previous = std::mem::replace(&mut self.id, Uuid::new_v4().to_string());
        if self.retired_id.is_none() {
            self.retired_id = Some(previous);
        }
    }

    // Records written by older code may carry zero ids instead of omitting them.
    fn normalize(&mut self) {
        if self.user_id == Some(0) {
            self.user_id = None;
        }
        if self.impersonator_id == Some(0) {
            self.impersonator_id = None;
        }
        if self.logged_in && self.user_id.is_none() {
            self.set_logged_out();
        }
        if !self.logged_in {
            self.impersonator_id = None;
        }
    }
}

fn is_session_id(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

/// Loads and persists [`Session`] records and queues their cookies.
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
    secure: bool,
    mailer: Mailer,
    admin_email: Option<String>,
}

impl SessionStore {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            secure: false,
            mailer: Mailer::disabled(),
            admin_email: None,
        }
    }

    /// Add `Secure` to the session cookie.
    #[must_use]
    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Notify `admin_email` whenever impersonation is used.
    #[must_use]
    pub fn with_impersonation_notice(mut self, mailer: Mailer, admin_email: Option<String>) -> Self {
        self.mailer = mailer;
        self.admin_email = admin_email;
        self
    }

    /// Resolve the request cookie to a session, falling back to a new anonymous one.
    pub async fn load_or_create(&self, cookie: Option<&str>) -> Session {
        let Some(id) = cookie.filter(|id| is_session_id(id)) else {
            return Session::new();
        };

        match cache::get_json::<Session>(self.cache.as_ref(), &keys::session(id)).await {
            Ok(Some(mut session)) => {
                session.id = id.to_string();
                session.normalize();
                session
            }
            Ok(None) => {
                debug!("session cookie did not match a stored session");
                Session::new()
            }
            Err(err) => {
                error!("Failed to load session, starting a new one: {err}");
                Session::new()
            }
        }
    }

    /// Persist the session and return the `Set-Cookie` value for it.
    ///
    /// A failed cache write is logged; the cookie is still returned so the
    /// browser keeps its id.
    pub async fn save(&self, session: &mut Session) -> String {
        if !is_session_id(&session.id) {
            session.id = Uuid::new_v4().to_string();
        }
        session.last_seen = Utc::now();

        if let Err(err) =
            cache::set_json(self.cache.as_ref(), &keys::session(&session.id), &*session, self.ttl)
                .await
        {
            error!("Failed to save session: {err}");
        }

        if let Some(retired) = session.retired_id.take() {
            if let Err(err) = self.cache.delete(&keys::session(&retired)).await {
                warn!("Failed to delete rotated session: {err}");
            }
        }

        self.cookie(&session.id)
    }

    #[must_use]
    pub fn cookie(&self, id: &str) -> String {
        let mut cookie = format!(
            "{SESSION_COOKIE_NAME}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.ttl.as_secs()
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Save and queue the cookie on the response.
    pub async fn commit(&self, ctx: &RequestContext, session: &mut Session) {
        let cookie = self.save(session).await;
        ctx.queue_cookie(&cookie);
    }

    /// Pop the flash and error lists, saving only when there was something to pop.
    pub async fn read_and_clear(&self, ctx: &RequestContext) -> (Vec<String>, Vec<String>) {
        let mut session = ctx.session().await;
        let (flashes, errors) = session.take_messages();
        if !flashes.is_empty() || !errors.is_empty() {
            self.commit(ctx, &mut session).await;
        }
        (flashes, errors)
    }

    pub async fn flash(&self, ctx: &RequestContext, message: impl Into<String>) {
        let mut session = ctx.session().await;
        session.push_flash(message);
        self.commit(ctx, &mut session).await;
    }

    pub async fn flash_error(&self, ctx: &RequestContext, message: impl Into<String>) {
        let mut session = ctx.session().await;
        session.push_error(message);
        self.commit(ctx, &mut session).await;
    }

    /// Log `user` in on this request's session.
    ///
    /// # Errors
    /// Returns `InvalidSubject` for a zero user id.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        user: &User,
        store: &dyn UserStore,
    ) -> Result<(), AuthError> {
        {
            let mut session = ctx.session().await;
            session.set_logged_in(user.id)?;
            self.commit(ctx, &mut session).await;
        }
        info!(user_id = user.id, "user logged in");

        let user = refresh_last_login(store, user.clone()).await;
        ctx.remember_user(user).await;
        Ok(())
    }

    pub async fn logout(&self, ctx: &RequestContext) {
        let mut session = ctx.session().await;
        let user_id = session.user_id();
        session.set_logged_out();
        self.commit(ctx, &mut session).await;
        if let Some(user_id) = user_id {
            info!(user_id, "user logged out");
        }
    }

    /// Switch this session to `target`, remembering `admin` as the impersonator.
    ///
    /// # Errors
    /// `PermissionDenied` when `admin` is not an administrator.
    pub async fn impersonate(
        &self,
        ctx: &RequestContext,
        target: &User,
        admin: &User,
        reason: &str,
    ) -> Result<(), AuthError> {
        {
            let mut session = ctx.session().await;
            session.set_impersonating(target.id, admin)?;
            self.commit(ctx, &mut session).await;
        }
        warn!(
            admin_id = admin.id,
            target_id = target.id,
            reason,
            "admin is impersonating a user"
        );
        ctx.remember_user(target.clone()).await;

        if let Some(admin_email) = &self.admin_email {
            let message = EmailMessage::new(
                admin_email,
                "Admin 'user impersonate' has been used",
                "email/generic.html",
                json!({
                    "message": format!(
                        "The admin {} has impersonated user {} (id {}).",
                        admin.username, target.username, target.id
                    ),
                    "reason": reason,
                }),
            );
            if let Err(err) = self.mailer.send(message) {
                warn!("Failed to send impersonation notice: {err}");
            }
        }
        Ok(())
    }
}

/// Bump `last_login_at` unless it was updated recently. Save failures are logged
/// and the caller keeps the unchanged record.
pub(crate) async fn refresh_last_login(store: &dyn UserStore, mut user: User) -> User {
    let now = Utc::now();
    let cooldown = TimeDelta::from_std(LAST_LOGIN_COOLDOWN).unwrap_or(TimeDelta::MAX);
    if now.signed_duration_since(user.last_login_at) <= cooldown {
        return user;
    }

    let previous = user.last_login_at;
    user.last_login_at = now;
    if let Err(err) = store.save(&user).await {
        error!(user_id = user.id, "Failed to update last login time: {err}");
        user.last_login_at = previous;
    }
    user
}
