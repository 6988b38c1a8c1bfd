//! Contact form that mails the site administrator.
//!
//! Anonymous visitors are throttled by client IP with the contact policy:
//! one message every two minutes and ten per hour. Members are not limited.

use super::{
    auth::{AuthError, AuthState, CONTACT_POLICY, RequestContext, rate_limit::CONTACT_NAMESPACE},
    redirect, render,
};
use crate::mail::EmailMessage;
use axum::{Extension, Form, response::Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

const CONTACT_PATH: &str = "/contact";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactForm {
    pub subject: String,
    pub message: String,
    pub reply_to: String,
}

pub async fn contact_page(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    render(&state, &ctx, "contact.html", json!({})).await
}

pub async fn contact(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<ContactForm>,
) -> Response {
    let sessions = state.sessions();
    let message = form.message.trim();
    if message.is_empty() {
        sessions.flash_error(&ctx, "A message is required.").await;
        return redirect(CONTACT_PATH);
    }

    let Some(admin_email) = state.config().admin_email() else {
        sessions
            .flash_error(&ctx, "The contact form is not available right now.")
            .await;
        return redirect(CONTACT_PATH);
    };
    if !state.mailer().enabled() {
        sessions
            .flash_error(&ctx, "The contact form is not available right now.")
            .await;
        return redirect(CONTACT_PATH);
    }

    let sender = ctx.current_user(state.store()).await.ok();
    if sender.is_none() {
        let subject = format!("ip:{}", ctx.client_ip().unwrap_or("unknown"));
        let limiter = state.rate_limiter(CONTACT_NAMESPACE, &subject, CONTACT_POLICY);
        match limiter.ping().await {
            Ok(()) => {}
            // This message counted and started the cooldown: deliver it and warn.
            Err(err @ AuthError::CooldownActive { .. }) if err.started_cooldown() => {
                sessions.flash_error(&ctx, err.user_message()).await;
            }
            Err(err) => {
                sessions.flash_error(&ctx, err.user_message()).await;
                return redirect(CONTACT_PATH);
            }
        }
    }

    let subject = match form.subject.trim() {
        "" => "(no subject)",
        subject => subject,
    };
    let from = sender.as_ref().map_or_else(
        || format!("anonymous ({})", ctx.client_ip().unwrap_or("unknown")),
        |user| format!("{} (id {})", user.username, user.id),
    );
    let email = EmailMessage::new(
        admin_email,
        &format!("Contact form: {subject}"),
        "email/contact_admin.html",
        json!({
            "title": state.config().site_title(),
            "subject": subject,
            "message": message,
            "from": from,
            "reply_to": form.reply_to.trim(),
        }),
    );
    if let Err(err) = state.mailer().send(email) {
        error!("Failed to queue contact message: {err}");
        sessions
            .flash_error(&ctx, "Couldn't send your message. Please try again later.")
            .await;
        return redirect(CONTACT_PATH);
    }
    info!(from = %from, "contact message queued");

    sessions
        .flash(
            &ctx,
            "Thank you for your feedback! Your message has been delivered to the website administrators.",
        )
        .await;
    redirect(CONTACT_PATH)
}
