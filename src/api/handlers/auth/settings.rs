//! Account settings: email and password changes.

use super::{
    context::RequestContext,
    signup::TokenQuery,
    state::AuthState,
    tokens::ChangeEmailToken,
    utils::{normalize_email, valid_email},
};
use crate::{
    api::handlers::{redirect, render},
    mail::EmailMessage,
    store::{StoreError, User},
};
use axum::{Extension, Form, extract::Query, response::Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

const SETTINGS_PATH: &str = "/settings";
const EMAIL_IN_USE: &str =
    "Couldn't update your email address: it is already in use by another member.";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SettingsForm {
    pub intent: String,
    pub old_password: String,
    pub change_email: String,
    pub new_password: String,
    pub new_password2: String,
}

pub async fn settings_page(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    let email = match ctx.current_user(state.store()).await {
        Ok(user) => user.email,
        Err(err) => {
            state.sessions().flash_error(&ctx, err.user_message()).await;
            return redirect("/login");
        }
    };
    render(
        &state,
        &ctx,
        "account/settings.html",
        json!({ "email": email }),
    )
    .await
}

pub async fn settings(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<SettingsForm>,
) -> Response {
    let sessions = state.sessions();
    let mut user = match ctx.current_user(state.store()).await {
        Ok(user) => user,
        Err(err) => {
            sessions.flash_error(&ctx, err.user_message()).await;
            return redirect("/login");
        }
    };

    if form.intent != "settings" {
        sessions
            .flash_error(&ctx, "Unknown POST intent value. Please try again.")
            .await;
        return redirect(SETTINGS_PATH);
    }

    if state
        .store()
        .check_password(&user, &form.old_password)
        .await
        .is_err()
    {
        sessions
            .flash_error(
                &ctx,
                "Could not make changes to your account settings as the 'current password' you entered was incorrect.",
            )
            .await;
        return redirect(SETTINGS_PATH);
    }

    let change_email = normalize_email(&form.change_email);
    if !change_email.is_empty() && change_email != user.email {
        if let Err(message) = request_email_change(&state, user.id, &change_email).await {
            sessions.flash_error(&ctx, message).await;
            return redirect(SETTINGS_PATH);
        }
        sessions
            .flash(
                &ctx,
                format!(
                    "Please verify your new email address. A link has been sent to {change_email} to confirm."
                ),
            )
            .await;
    }

    let password = form.new_password.trim();
    if !password.is_empty() {
        if password != form.new_password2.trim() {
            sessions
                .flash_error(
                    &ctx,
                    "Couldn't change your password: your new passwords do not match.",
                )
                .await;
            return redirect(SETTINGS_PATH);
        }

        match change_password(&state, &mut user, password).await {
            Ok(()) => {
                info!(user_id = user.id, "password changed");
                sessions.flash(&ctx, "Your password has been updated.").await;
                ctx.remember_user(user).await;
            }
            Err(err) => {
                error!(user_id = user.id, "Failed to change password: {err}");
                sessions
                    .flash_error(
                        &ctx,
                        "Couldn't change your password right now. Please try again later.",
                    )
                    .await;
            }
        }
    }

    redirect(SETTINGS_PATH)
}

async fn request_email_change(
    state: &AuthState,
    user_id: u64,
    new_email: &str,
) -> Result<(), String> {
    if !valid_email(new_email) {
        return Err("The email address you entered is not valid.".to_string());
    }

    match state.store().find_by_username_or_email(new_email).await {
        Ok(_) => return Err("That email address is already in use.".to_string()),
        Err(StoreError::NotFound) => {}
        Err(err) => {
            error!(user_id, "Failed to check email availability: {err}");
            return Err("Couldn't check that email address. Please try again later.".to_string());
        }
    }

    let token = state
        .vault()
        .issue(&ChangeEmailToken {
            user_id,
            new_email: new_email.to_string(),
        })
        .await
        .map_err(|err| format!("Failed to create change email token: {}", err.user_message()))?;

    let message = EmailMessage::new(
        new_email,
        "Verify your e-mail address",
        "email/verify_email.html",
        json!({
            "title": state.config().site_title(),
            "url": state
                .config()
                .url(&format!("{SETTINGS_PATH}/confirm-email?token={token}")),
            "change_email": true,
        }),
    );
    state
        .mailer()
        .send(message)
        .map_err(|err| format!("Error sending a confirmation email to {new_email}: {err}"))
}

async fn change_password(
    state: &AuthState,
    user: &mut User,
    password: &str,
) -> Result<(), StoreError> {
    user.hashed_password = state.store().hash_password(password).await?;
    state.store().save(user).await
}

/// `GET /settings/confirm-email?token=`: apply a verified email change.
pub async fn confirm_email(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let sessions = state.sessions();
    let token = query.token.trim();
    if token.is_empty() {
        sessions
            .flash_error(&ctx, "Invalid change email token. Please try again.")
            .await;
        return redirect("/");
    }

    // Burn first so a replayed link can never apply twice.
    let claim = match state.vault().consume::<ChangeEmailToken>(token).await {
        Ok(claim) => claim,
        Err(_) => {
            sessions
                .flash_error(
                    &ctx,
                    "Invalid token. Please try again to change your email address.",
                )
                .await;
            return redirect("/");
        }
    };

    match state.store().find_by_username_or_email(&claim.new_email).await {
        Ok(_) => {
            sessions.flash_error(&ctx, EMAIL_IN_USE).await;
            return redirect("/");
        }
        Err(StoreError::NotFound) => {}
        Err(err) => {
            error!(user_id = claim.user_id, "Failed to check email availability: {err}");
            sessions
                .flash_error(&ctx, "Couldn't update your email address. Please try again later.")
                .await;
            return redirect("/");
        }
    }

    let mut user = match state.store().get_by_id(claim.user_id).await {
        Ok(user) => user,
        Err(err) => {
            error!(user_id = claim.user_id, "Failed to load user for email change: {err}");
            sessions
                .flash_error(
                    &ctx,
                    "Didn't find the user that this email change was for. Please try again.",
                )
                .await;
            return redirect("/");
        }
    };

    user.email = claim.new_email;
    match state.store().save(&user).await {
        Ok(()) => {}
        Err(StoreError::AlreadyExists(_)) => {
            sessions.flash_error(&ctx, EMAIL_IN_USE).await;
            return redirect("/");
        }
        Err(err) => {
            error!(user_id = user.id, "Failed to save email change: {err}");
            sessions
                .flash_error(&ctx, "Couldn't update your email address. Please try again later.")
                .await;
            return redirect("/");
        }
    }
    info!(user_id = user.id, "email address changed");

    sessions
        .flash(&ctx, "Your email address has been confirmed and updated.")
        .await;
    if ctx.snapshot().await.user_id() == Some(user.id) {
        ctx.remember_user(user).await;
    }
    redirect("/")
}
