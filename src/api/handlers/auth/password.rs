//! Forgot-password flow.
//!
//! `/forgot-password` has two steps on one route: without a token it accepts a
//! username or email and mails a reset link; with a token it accepts the new
//! password pair. Both lookup outcomes give the same answer so the form cannot
//! be used to probe for accounts.

use super::{
    context::RequestContext,
    signup::TokenQuery,
    state::AuthState,
    tokens::ResetToken,
};
use crate::{
    api::handlers::{redirect, render},
    mail::EmailMessage,
    store::StoreError,
};
use axum::{Extension, Form, extract::Query, response::Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

const FORGOT_PATH: &str = "/forgot-password";
const INVALID_TOKEN: &str = "Invalid password reset token. Please try again from the beginning.";
const RESET_SENT: &str = "If that username or email existed, we have sent an email to the address on file with a link to reset your password. Please check your email inbox for the link.";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ForgotPasswordForm {
    pub token: String,
    pub username: String,
    pub password: String,
    pub password2: String,
}

pub async fn forgot_password_page(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let token = query.token.trim();
    if !token.is_empty() && state.vault().validate::<ResetToken>(token).await.is_err() {
        state.sessions().flash_error(&ctx, INVALID_TOKEN).await;
        return redirect(FORGOT_PATH);
    }
    render(
        &state,
        &ctx,
        "account/forgot_password.html",
        json!({ "token": token }),
    )
    .await
}

pub async fn forgot_password(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<ForgotPasswordForm>,
) -> Response {
    if form.token.trim().is_empty() {
        begin_reset(&state, &ctx, form.username.trim()).await
    } else {
        complete_reset(&state, &ctx, &form).await
    }
}

async fn begin_reset(state: &AuthState, ctx: &RequestContext, login: &str) -> Response {
    let sessions = state.sessions();
    if login.is_empty() {
        sessions
            .flash_error(ctx, "Username or email address is required.")
            .await;
        return redirect(FORGOT_PATH);
    }

    match state
        .store()
        .find_by_username_or_email(&login.to_lowercase())
        .await
    {
        Ok(user) => match state.vault().issue(&ResetToken { user_id: user.id }).await {
            Ok(token) => {
                let message = EmailMessage::new(
                    &user.email,
                    "Reset your password",
                    "email/reset_password.html",
                    json!({
                        "title": state.config().site_title(),
                        "username": user.username,
                        "url": state.config().url(&format!("{FORGOT_PATH}?token={token}")),
                    }),
                );
                if let Err(err) = state.mailer().send(message) {
                    error!(user_id = user.id, "Failed to queue password reset email: {err}");
                } else {
                    info!(user_id = user.id, "password reset requested");
                }
            }
            Err(err) => error!(user_id = user.id, "Failed to issue password reset token: {err}"),
        },
        Err(StoreError::NotFound) => {}
        Err(err) => error!("Failed to look up user for password reset: {err}"),
    }

    sessions.flash(ctx, RESET_SENT).await;
    redirect(FORGOT_PATH)
}

async fn complete_reset(
    state: &AuthState,
    ctx: &RequestContext,
    form: &ForgotPasswordForm,
) -> Response {
    let sessions = state.sessions();
    let token = form.token.trim();
    let back = format!("{FORGOT_PATH}?token={token}");

    if state.vault().validate::<ResetToken>(token).await.is_err() {
        sessions.flash_error(ctx, INVALID_TOKEN).await;
        return redirect(FORGOT_PATH);
    }

    let password = form.password.trim();
    if password.is_empty() {
        sessions.flash_error(ctx, "Please enter a new password.").await;
        return redirect(&back);
    }
    if password != form.password2.trim() {
        sessions.flash_error(ctx, "Your passwords do not match.").await;
        return redirect(&back);
    }

    let claim = match state.vault().consume::<ResetToken>(token).await {
        Ok(claim) => claim,
        Err(_) => {
            sessions.flash_error(ctx, INVALID_TOKEN).await;
            return redirect(FORGOT_PATH);
        }
    };

    let mut user = match state.store().get_by_id(claim.user_id).await {
        Ok(user) => user,
        Err(err) => {
            error!(user_id = claim.user_id, "Failed to load user for password reset: {err}");
            sessions.flash_error(ctx, INVALID_TOKEN).await;
            return redirect(FORGOT_PATH);
        }
    };

    user.hashed_password = match state.store().hash_password(password).await {
        Ok(hash) => hash,
        Err(err) => {
            error!(user_id = user.id, "Failed to hash new password: {err}");
            sessions
                .flash_error(ctx, "Unable to reset your password right now. Please try again later.")
                .await;
            return redirect(FORGOT_PATH);
        }
    };
    if let Err(err) = state.store().save(&user).await {
        error!(user_id = user.id, "Failed to save reset password: {err}");
        sessions
            .flash_error(ctx, "Unable to reset your password right now. Please try again later.")
            .await;
        return redirect(FORGOT_PATH);
    }
    info!(user_id = user.id, "password reset completed");

    if !user.is_active() {
        sessions
            .flash(ctx, "Your password was reset and you can now log in.")
            .await;
        return redirect("/login");
    }
    if let Err(err) = sessions.login(ctx, &user, state.store()).await {
        error!(user_id = user.id, "Failed to log in after password reset: {err}");
        sessions
            .flash(ctx, "Your password was reset and you can now log in.")
            .await;
        return redirect("/login");
    }
    sessions
        .flash(
            ctx,
            "Your password has been reset and you are now logged in to your account.",
        )
        .await;
    redirect("/me")
}
