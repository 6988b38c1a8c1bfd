//! Login and logout controllers.

use super::{
    context::RequestContext,
    rate_limit::{LOGIN_NAMESPACE, LOGIN_POLICY},
    state::AuthState,
    utils::local_redirect_target,
};
use crate::{
    api::handlers::{redirect, render},
    store::StoreError,
};
use axum::{
    Extension, Form,
    extract::Query,
    response::Response,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

const LOGIN_PATH: &str = "/login";
const INCORRECT_LOGIN: &str = "Incorrect username or password.";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NextQuery {
    pub next: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub next: String,
}

pub async fn login_page(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<NextQuery>,
) -> Response {
    render(&state, &ctx, "account/login.html", json!({ "next": query.next })).await
}

pub async fn login(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<LoginForm>,
) -> Response {
    let sessions = state.sessions();
    let username = form.username.trim().to_lowercase();

    let user = match state.store().find_by_username_or_email(&username).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            sessions.flash_error(&ctx, INCORRECT_LOGIN).await;
            return redirect(LOGIN_PATH);
        }
        Err(err) => {
            error!("Failed to look up user for login: {err}");
            sessions
                .flash_error(&ctx, "Unable to log in right now. Please try again later.")
                .await;
            return redirect(LOGIN_PATH);
        }
    };

    // Only wrong passwords are counted; a right one is never blocked.
    let limiter = state.rate_limiter(LOGIN_NAMESPACE, &user.id.to_string(), LOGIN_POLICY);
    if state
        .store()
        .check_password(&user, &form.password)
        .await
        .is_err() {
        let message = match limiter.ping().await {
            Ok(()) => INCORRECT_LOGIN.to_string(),
            Err(err) => err.user_message(),
        };
        sessions.flash_error(&ctx, message).await;
        return redirect(LOGIN_PATH);
    }

    if !user.is_active() {
        sessions
            .flash_error(
                &ctx,
                format!(
                    "Your account has been {}. If you believe this was done in error, please contact support.",
                    user.status
                ),
            )
            .await;
        return redirect(LOGIN_PATH);
    }

    if let Err(err) = sessions.login(&ctx, &user, state.store()).await {
        sessions.flash_error(&ctx, err.user_message()).await;
        return redirect(LOGIN_PATH);
    }

    if let Err(err) = limiter.clear().await {
        error!("Failed to clear login rate limiter: {err}");
    }

    sessions.flash(&ctx, "Login successful.").await;
    redirect(local_redirect_target(&form.next).unwrap_or("/me"))
}

pub async fn logout(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    state.sessions().logout(&ctx).await;
    state
        .sessions()
        .flash(&ctx, "You have been successfully logged out.")
        .await;
    redirect("/")
}
