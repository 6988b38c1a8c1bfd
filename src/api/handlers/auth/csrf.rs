//! Double-submit CSRF protection.
//!
//! Every browser gets a random token in the `xsrf_token` cookie, and templates
//! echo it back in the `_csrf` form field. Any request with a non-safe method
//! must carry both, with equal values, or it is rejected with 403 before the
//! handler runs. Urlencoded and multipart bodies are buffered up to the form
//! size limit to read the field, then handed on unchanged. JSON requests are
//! exempt: browsers cannot send them cross-origin without a CORS preflight.

use super::{context::RequestContext, state::AuthState, utils};
use crate::api::handlers::error_page;
use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{FromRequest, Multipart, Request, State},
    http::{HeaderMap, Method, StatusCode, header::CONTENT_TYPE},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

pub const CSRF_COOKIE_NAME: &str = "xsrf_token";
pub const CSRF_INPUT_NAME: &str = "_csrf";

fn media_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
}

fn is_json(headers: &HeaderMap) -> bool {
    media_type(headers).is_some_and(|media| media == "application/json")
}

fn is_form(headers: &HeaderMap) -> bool {
    media_type(headers).is_some_and(|media| media == "application/x-www-form-urlencoded")
}

fn is_multipart(headers: &HeaderMap) -> bool {
    media_type(headers).is_some_and(|media| media == "multipart/form-data")
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// The `_csrf` field of an urlencoded body.
fn form_token(body: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, _)| key == CSRF_INPUT_NAME)
        .map(|(_, value)| value.into_owned())
}

/// The first `_csrf` part of a multipart body.
async fn multipart_token(headers: &HeaderMap, body: Bytes) -> Option<String> {
    let mut request = Request::new(Body::from(body));
    if let Some(content_type) = headers.get(CONTENT_TYPE) {
        request
            .headers_mut()
            .insert(CONTENT_TYPE, content_type.clone());
    }
    let mut multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(err) => {
            warn!("Could not read multipart body: {err}");
            return None;
        }
    };
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(CSRF_INPUT_NAME) => {
                return field.text().await.ok();
            }
            Ok(Some(_)) => {}
            Ok(None) => return None,
            Err(err) => {
                warn!("Malformed multipart body: {err}");
                return None;
            }
        }
    }
}

/// Cookie value for a freshly minted token. Session-scoped: no max-age.
fn csrf_cookie(token: &str) -> String {
    format!("{CSRF_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax")
}

fn rejection() -> Response {
    error_page(
        StatusCode::FORBIDDEN,
        "CSRF Error",
        "An error occurred while processing your request. Please go back and try again.",
    )
}

/// Attach the browser's CSRF token to the request context and enforce it on
/// state-changing requests.
pub async fn csrf_layer(
    State(state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ctx) = request.extensions().get::<RequestContext>().cloned() else {
        error!("CSRF layer ran without a request context");
        return error_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
            "Something went wrong.",
        );
    };

    let token = match utils::cookie_value(request.headers(), CSRF_COOKIE_NAME)
        .filter(|token| !token.is_empty())
    {
        Some(token) => token,
        None => {
            let token = Uuid::new_v4().to_string();
            ctx.queue_cookie(&csrf_cookie(&token));
            token
        }
    };
    ctx.set_csrf_token(token.clone());

    if is_safe(request.method()) || is_json(request.headers()) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let multipart = is_multipart(&parts.headers);
    let submitted = if multipart || is_form(&parts.headers) {
        let bytes = match to_bytes(body, state.config().max_form_bytes()).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %parts.uri.path(), "Could not buffer form body: {err}");
                return error_page(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Request Too Large",
                    "The submitted form was too large.",
                );
            }
        };
        let submitted = if multipart {
            multipart_token(&parts.headers, bytes.clone()).await
        } else {
            form_token(&bytes)
        };
        if submitted.as_deref() == Some(token.as_str()) {
            return next.run(Request::from_parts(parts, Body::from(bytes))).await;
        }
        submitted
    } else {
        None
    };

    warn!(
        client_ip = ctx.client_ip().unwrap_or("unknown"),
        token_present = submitted.is_some(),
        "CSRF check failed"
    );
    rejection()
}
