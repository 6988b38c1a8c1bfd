//! Route handlers and the shared page-view helpers.
//!
//! Pages are returned as a JSON [`PageView`]: the template a renderer should
//! use, its variables, the CSRF token for forms, and any flash messages popped
//! from the session. State-changing handlers answer with a 302 back to a page
//! and carry their outcome in flashes.

pub mod auth;
pub mod contact;
pub mod health;
pub mod me;
pub mod root;

use auth::{AuthState, RequestContext};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::error;

#[derive(Debug, Serialize)]
pub struct PageView {
    pub template: String,
    pub title: String,
    pub csrf_token: String,
    pub logged_in: bool,
    pub current_user: Option<String>,
    pub impersonating: bool,
    pub flashes: Vec<String>,
    pub errors: Vec<String>,
    pub vars: Value,
}

/// 302 Found to `location`.
pub(crate) fn redirect(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(err) => {
            error!("Invalid redirect target {location:?}: {err}");
            (StatusCode::FOUND, [(LOCATION, HeaderValue::from_static("/"))]).into_response()
        }
    }
}

/// A stand-alone error page that does not touch the session.
pub(crate) fn error_page(status: StatusCode, title: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "template": "errors/error.html",
            "title": title,
            "vars": { "message": message },
        })),
    )
        .into_response()
}

/// Render `template` for the current visitor, consuming their flash messages.
pub(crate) async fn render(
    state: &AuthState,
    ctx: &RequestContext,
    template: &str,
    vars: Value,
) -> Response {
    let (flashes, errors) = state.sessions().read_and_clear(ctx).await;
    let current_user = ctx
        .current_user(state.store())
        .await
        .ok()
        .map(|user| user.username);

    Json(PageView {
        template: template.to_string(),
        title: state.config().site_title().to_string(),
        csrf_token: ctx.csrf_token().to_string(),
        logged_in: current_user.is_some(),
        current_user,
        impersonating: ctx.is_impersonated().await,
        flashes,
        errors,
        vars,
    })
    .into_response()
}
