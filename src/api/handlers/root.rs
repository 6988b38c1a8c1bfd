use super::{
    auth::{AuthState, RequestContext},
    render,
};
use axum::{Extension, response::Response};
use serde_json::json;
use std::sync::Arc;

// axum handler for the landing page
pub async fn root(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    render(&state, &ctx, "index.html", json!({})).await
}
