//! Route guards for member-only and admin-only pages.
//!
//! Both read the user through the request context, so the lookup they do is
//! the same one the handler gets back from `current_user`.

use super::{context::RequestContext, session::refresh_last_login, state::AuthState};
use crate::api::handlers::{error_page, redirect};
use crate::store::User;
use axum::{
    Extension,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

fn requested_path(request: &Request) -> String {
    request
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_string(), |path| path.as_str().to_string())
}

fn login_redirect(requested: &str) -> Response {
    let next: String = url::form_urlencoded::byte_serialize(requested.as_bytes()).collect();
    redirect(&format!("/login?next={next}"))
}

/// Resolve the current user or produce the response that sends the visitor away.
async fn require_member(
    state: &AuthState,
    ctx: &RequestContext,
    requested: &str,
) -> Result<User, Response> {
    let user = match ctx.current_user(state.store()).await {
        Ok(user) => user,
        Err(err) => {
            state.sessions().flash_error(ctx, err.user_message()).await;
            return Err(login_redirect(requested));
        }
    };

    if !user.is_active() {
        state.sessions().logout(ctx).await;
        state
            .sessions()
            .flash_error(
                ctx,
                format!(
                    "Your account has been {} and you are now logged out.",
                    user.status
                ),
            )
            .await;
        return Err(redirect("/"));
    }

    // Long-lived sessions still record recent activity, but not while an
    // admin is looking around as someone else.
    if !ctx.is_impersonated().await {
        let user = refresh_last_login(state.store(), user.clone()).await;
        ctx.remember_user(user.clone()).await;
        return Ok(user);
    }
    Ok(user)
}

/// Only logged-in, active members pass.
pub async fn login_required(
    State(state): State<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    request: Request,
    next: Next,
) -> Response {
    let requested = requested_path(&request);
    match require_member(&state, &ctx, &requested).await {
        Ok(_) => next.run(request).await,
        Err(response) => response,
    }
}

/// Only logged-in administrators pass; other members get a 403 page.
pub async fn admin_required(
    State(state): State<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    request: Request,
    next: Next,
) -> Response {
    let requested = requested_path(&request);
    match require_member(&state, &ctx, &requested).await {
        Ok(user) if user.is_admin => next.run(request).await,
        Ok(_) => error_page(
            StatusCode::FORBIDDEN,
            "Admin Required",
            "You do not have permission for this page.",
        ),
        Err(response) => response,
    }
}
