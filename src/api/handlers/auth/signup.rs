//! Two-step signup: verify an email address, then create the account.
//!
//! Flow Overview:
//! 1) The visitor posts an email address; we mail a `/signup?token=` link.
//! 2) Following the link shows the full form with the verified email filled in.
//! 3) Posting the full form checks every field, burns the token, creates the
//!    account and logs the new member in.
//!
//! With email verification switched off step 1 is skipped and the full form is
//! accepted directly.

use super::{
    context::RequestContext,
    state::AuthState,
    tokens::SignupToken,
    utils::{is_reserved_username, normalize_email, valid_email, valid_username},
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
use tracing::error;

const SIGNUP_PATH: &str = "/signup";
const INVALID_TOKEN: &str = "Invalid email verification token. Please try signing up again.";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SignupForm {
    pub token: String,
    pub email: String,
    pub confirm: String,
    pub username: String,
    pub password: String,
    pub password2: String,
}

pub async fn signup_page(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let token = query.token.trim();
    let mut email = String::new();
    if !token.is_empty() {
        match state.vault().validate::<SignupToken>(token).await {
            Ok(claim) => email = claim.email,
            Err(_) => {
                state.sessions().flash_error(&ctx, INVALID_TOKEN).await;
                return redirect(SIGNUP_PATH);
            }
        }
    }

    let vars = json!({
        "signup_token": token,
        "email": email,
        "skip_email_verification": state.config().skip_email_verification(),
    });
    render(&state, &ctx, "account/signup.html", vars).await
}

pub async fn signup(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<SignupForm>,
) -> Response {
    let sessions = state.sessions();
    let token = form.token.trim();

    let verified_email = if token.is_empty() {
        None
    } else {
        match state.vault().validate::<SignupToken>(token).await {
            Ok(claim) => Some(claim.email),
            Err(_) => {
                sessions.flash_error(&ctx, INVALID_TOKEN).await;
                return redirect(SIGNUP_PATH);
            }
        }
    };
    let back = if token.is_empty() {
        SIGNUP_PATH.to_string()
    } else {
        format!("{SIGNUP_PATH}?token={token}")
    };

    let email = normalize_email(&form.email);
    let username = form.username.trim().to_lowercase();
    let password = form.password.trim();
    let password2 = form.password2.trim();

    // The verified address cannot be swapped on the full form.
    if verified_email.as_ref().is_some_and(|verified| *verified != email) {
        sessions
            .flash_error(
                &ctx,
                "This email address is not verified. Please start over from the beginning.",
            )
            .await;
        return redirect(SIGNUP_PATH);
    }

    if is_reserved_username(&username) {
        sessions
            .flash_error(
                &ctx,
                "That username is reserved, please choose a different username.",
            )
            .await;
        return redirect(&back);
    }

    if !valid_email(&email) {
        sessions
            .flash_error(&ctx, "The email address you entered is not valid.")
            .await;
        return redirect(&back);
    }

    if form.confirm != "true" {
        sessions
            .flash_error(&ctx, "Confirm that you have read the rules.")
            .await;
        return redirect(&back);
    }

    match state.store().find_by_username_or_email(&email).await {
        Ok(_) => {
            sessions
                .flash_error(&ctx, "There is already an account with that e-mail address.")
                .await;
            return redirect(SIGNUP_PATH);
        }
        Err(StoreError::NotFound) => {}
        Err(err) => {
            error!("Failed to check email availability: {err}");
            sessions
                .flash_error(&ctx, "Unable to sign up right now. Please try again later.")
                .await;
            return redirect(&back);
        }
    }

    if verified_email.is_none() && !state.config().skip_email_verification() {
        return send_verification(&state, &ctx, &email).await;
    }

    let mut problems = Vec::new();
    if password.len() < 3 {
        problems.push("Please enter a password longer than 3 characters.");
    } else if password != password2 {
        problems.push("Your passwords do not match.");
    }
    if !valid_username(&username) {
        problems.push(
            "Your username must consist of only numbers, letters, - . and be 3-32 characters.",
        );
    }
    if !problems.is_empty() {
        for problem in problems {
            sessions.flash_error(&ctx, problem).await;
        }
        return redirect(&back);
    }

    match state.store().find_by_username_or_email(&username).await {
        Ok(_) => {
            sessions
                .flash_error(
                    &ctx,
                    "That username already exists. Please try a different username.",
                )
                .await;
            return redirect(&back);
        }
        Err(StoreError::NotFound) => {}
        Err(err) => {
            error!("Failed to check username availability: {err}");
            sessions
                .flash_error(&ctx, "Unable to sign up right now. Please try again later.")
                .await;
            return redirect(&back);
        }
    }

    // Burn the token before creating anything; a second submission loses.
    if verified_email.is_some() {
        match state.vault().consume::<SignupToken>(token).await {
            Ok(claim) if claim.email == email => {}
            _ => {
                sessions.flash_error(&ctx, INVALID_TOKEN).await;
                return redirect(SIGNUP_PATH);
            }
        }
    }

    let user = match state.store().create(&username, &email, password).await {
        Ok(user) => user,
        Err(StoreError::AlreadyExists(field)) => {
            sessions
                .flash_error(
                    &ctx,
                    format!("That {field} is already in use. Please start over."),
                )
                .await;
            return redirect(SIGNUP_PATH);
        }
        Err(err) => {
            error!("Failed to create user: {err}");
            sessions
                .flash_error(&ctx, "Unable to sign up right now. Please try again later.")
                .await;
            return redirect(SIGNUP_PATH);
        }
    };

    sessions
        .flash(
            &ctx,
            format!("User account created. Now logged in as {}.", user.username),
        )
        .await;
    if let Err(err) = sessions.login(&ctx, &user, state.store()).await {
        sessions.flash_error(&ctx, err.user_message()).await;
        return redirect("/login");
    }
    redirect("/me")
}

async fn send_verification(state: &AuthState, ctx: &RequestContext, email: &str) -> Response {
    let sessions = state.sessions();
    if !state.mailer().enabled() {
        sessions
            .flash_error(
                ctx,
                "This app is not configured to send email so you can not sign up at this time. Please contact the website administrator about this issue!",
            )
            .await;
        return redirect(SIGNUP_PATH);
    }

    let token = match state
        .vault()
        .issue(&SignupToken {
            email: email.to_string(),
        })
        .await
    {
        Ok(token) => token,
        Err(err) => {
            sessions
                .flash_error(ctx, format!("Error creating a link to send you: {}", err.user_message()))
                .await;
            return redirect(SIGNUP_PATH);
        }
    };

    let message = EmailMessage::new(
        email,
        "Verify your e-mail address",
        "email/verify_email.html",
        json!({
            "title": state.config().site_title(),
            "url": state.config().url(&format!("{SIGNUP_PATH}?token={token}")),
        }),
    );
    if let Err(err) = state.mailer().send(message) {
        sessions
            .flash_error(ctx, format!("Error sending an email: {err}"))
            .await;
    }

    sessions
        .flash(
            ctx,
            format!(
                "We have sent an e-mail to {email} with a link to continue signing up your account. Please go and check your e-mail."
            ),
        )
        .await;
    redirect(SIGNUP_PATH)
}
