//! Request-scoped authentication state.
//!
//! The session middleware loads the session, wraps it in a [`RequestContext`]
//! and inserts that into the request extensions. Handlers and guards reach the
//! session, the CSRF token and the current user through it, and any cookie
//! they queue is appended to the response once the handler returns.

use super::{error::AuthError, session::{SESSION_COOKIE_NAME, Session}, state::AuthState, utils};
use crate::store::{User, UserStore};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, header::SET_COOKIE},
    middleware::Next,
    response::Response,
};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex as StdMutex, OnceLock},
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error};

struct Inner {
    session: Mutex<Session>,
    // `(user_id, lookup result)` for the first current-user lookup.
    current_user: Mutex<Option<(u64, Option<User>)>>,
    csrf_token: OnceLock<String>,
    cookies: StdMutex<Vec<HeaderValue>>,
    client_ip: Option<String>,
}

#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

impl RequestContext {
    #[must_use]
    pub fn new(session: Session, client_ip: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                current_user: Mutex::new(None),
                csrf_token: OnceLock::new(),
                cookies: StdMutex::new(Vec::new()),
                client_ip,
            }),
        }
    }

    /// Exclusive access to the session. Do not hold the guard across calls
    /// into [`super::session::SessionStore`], which lock it themselves.
    pub async fn session(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock().await
    }

    pub async fn snapshot(&self) -> Session {
        self.inner.session.lock().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.inner.session.lock().await.is_logged_in()
    }

    pub async fn is_impersonated(&self) -> bool {
        self.inner.session.lock().await.impersonator_id().is_some()
    }

    #[must_use]
    pub fn csrf_token(&self) -> &str {
        self.inner.csrf_token.get().map_or("", String::as_str)
    }

    pub(crate) fn set_csrf_token(&self, token: String) {
        let _ = self.inner.csrf_token.set(token);
    }

    #[must_use]
    pub fn client_ip(&self) -> Option<&str> {
        self.inner.client_ip.as_deref()
    }

    pub(crate) fn queue_cookie(&self, cookie: &str) {
        let value = match HeaderValue::from_str(cookie) {
            Ok(value) => value,
            Err(err) => {
                error!("Refusing to emit invalid cookie header: {err}");
                return;
            }
        };
        match self.inner.cookies.lock() {
            Ok(mut cookies) => cookies.push(value),
            Err(_) => error!("Cookie queue lock poisoned"),
        }
    }

    pub(crate) fn take_cookies(&self) -> Vec<HeaderValue> {
        self.inner
            .cookies
            .lock()
            .map(|mut cookies| std::mem::take(&mut *cookies))
            .unwrap_or_default()
    }

    /// The logged-in user, looked up at most once per request.
    ///
    /// # Errors
    /// `NotLoggedIn` when the session is anonymous or its user cannot be loaded.
    pub async fn current_user(&self, store: &dyn UserStore) -> Result<User, AuthError> {
        let user_id = self
            .inner
            .session
            .lock()
            .await
            .user_id()
            .ok_or(AuthError::NotLoggedIn)?;

        let mut memo = self.inner.current_user.lock().await;
        if let Some((memo_id, cached)) = memo.as_ref() {
            if *memo_id == user_id {
                return cached.clone().ok_or(AuthError::NotLoggedIn);
            }
        }

        let found = match store.get_by_id(user_id).await {
            Ok(user) => Some(user),
            Err(err) => {
                debug!(user_id, "Session user could not be loaded: {err}");
                None
            }
        };
        *memo = Some((user_id, found.clone()));
        found.ok_or(AuthError::NotLoggedIn)
    }

    /// Replace the memoized current user after it was changed or switched.
    pub(crate) async fn remember_user(&self, user: User) {
        *self.inner.current_user.lock().await = Some((user.id, Some(user)));
    }
}

/// Load the session, expose it as a [`RequestContext`], and emit queued cookies.
pub async fn session_layer(
    State(state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let cookie = utils::cookie_value(request.headers(), SESSION_COOKIE_NAME);
    let session = state.sessions().load_or_create(cookie.as_deref()).await;

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client_ip = utils::client_ip(
        request.headers(),
        peer,
        state.config().use_forwarded_for(),
    );

    let ctx = RequestContext::new(session, client_ip);
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    for cookie in ctx.take_cookies() {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}
