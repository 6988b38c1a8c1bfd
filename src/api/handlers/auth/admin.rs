//! Administrator actions.

use super::{context::RequestContext, state::AuthState};
use crate::api::handlers::redirect;
use axum::{Extension, Form, response::Response};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

const ADMIN_FALLBACK: &str = "/";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImpersonateForm {
    pub user_id: String,
    pub reason: String,
}

/// `POST /admin/impersonate`: log in as another member, keeping the admin's
/// identity as the impersonator. The admin contact is notified by email.
pub async fn impersonate(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<ImpersonateForm>,
) -> Response {
    let sessions = state.sessions();

    let Ok(user_id) = form.user_id.trim().parse::<u64>() else {
        sessions
            .flash_error(&ctx, "Invalid or missing user_id parameter.")
            .await;
        return redirect(ADMIN_FALLBACK);
    };

    let reason = form.reason.trim();
    if reason.is_empty() {
        sessions.flash_error(&ctx, "A reason is required.").await;
        return redirect(ADMIN_FALLBACK);
    }

    let admin = match ctx.current_user(state.store()).await {
        Ok(admin) => admin,
        Err(err) => {
            sessions.flash_error(&ctx, err.user_message()).await;
            return redirect("/login");
        }
    };

    let target = match state.store().get_by_id(user_id).await {
        Ok(target) => target,
        Err(err) => {
            error!(user_id, "Failed to load impersonation target: {err}");
            sessions
                .flash_error(&ctx, "Didn't find user ID in database.")
                .await;
            return redirect(ADMIN_FALLBACK);
        }
    };

    if let Err(err) = sessions.impersonate(&ctx, &target, &admin, reason).await {
        sessions.flash_error(&ctx, err.user_message()).await;
        return redirect(ADMIN_FALLBACK);
    }

    sessions
        .flash(&ctx, format!("You are now impersonating {}.", target.username))
        .await;
    redirect("/me")
}
