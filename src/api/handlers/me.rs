//! Member dashboard and the JSON session probe.

use super::{
    auth::{AuthState, RequestContext},
    render,
};
use axum::{
    Extension, Json,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginOk {
    pub success: bool,
    pub user_id: u64,
    pub username: String,
}

pub async fn dashboard(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    let vars = match ctx.current_user(state.store()).await {
        Ok(user) => json!({
            "username": user.username,
            "email": user.email,
            "is_admin": user.is_admin,
            "created_at": user.created_at,
            "last_login_at": user.last_login_at,
        }),
        Err(_) => json!({}),
    };
    render(&state, &ctx, "account/dashboard.html", vars).await
}

#[utoipa::path(
    get,
    path= "/v1/users/me",
    responses (
        (status = 200, description = "Whether the session cookie belongs to a member", body = LoginOk)
    ),
    tag= "users"
)]
pub async fn users_me(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
) -> impl IntoResponse {
    let body = match ctx.current_user(state.store()).await {
        Ok(user) => LoginOk {
            success: true,
            user_id: user.id,
            username: user.username,
        },
        Err(_) => LoginOk::default(),
    };
    Json(body)
}
