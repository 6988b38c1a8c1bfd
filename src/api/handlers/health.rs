use super::auth::AuthState;
use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
    cache: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Version {
    name: String,
    version: String,
    build: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "User store and cache are healthy", body = [Health]),
        (status = 503, description = "User store or cache is unhealthy", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let database = match state.store().ping().await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("Failed to ping user store: {}", err);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    let cache = match state.cache().ping().await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("Failed to ping cache: {}", err);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: status_label(database.is_ok()),
        cache: status_label(cache.is_ok()),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let headers = x_app_headers(&health.name, &health.version, &health.commit);

    if database.is_ok() && cache.is_ok() {
        debug!("User store and cache are healthy");
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

#[utoipa::path(
    get,
    path= "/v1/version",
    responses (
        (status = 200, description = "Build information", body = Version)
    ),
    tag= "health"
)]
pub async fn version() -> impl IntoResponse {
    let version = Version {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: GIT_COMMIT_HASH.to_string(),
    };
    let headers = x_app_headers(&version.name, &version.version, &version.build);
    (headers, Json(version))
}

fn status_label(ok: bool) -> String {
    if ok { "ok" } else { "error" }.to_string()
}

fn x_app_headers(name: &str, version: &str, commit: &str) -> HeaderMap {
    let short_hash = if commit.len() > 7 { &commit[0..7] } else { "" };

    format!("{name}:{version}:{short_hash}")
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .unwrap_or_else(|err| {
            error!("Failed to parse X-App header: {}", err);
            HeaderMap::new()
        })
}
