//! Small helpers shared by the auth controllers and middleware.

use anyhow::{Context, Result};
use axum::http::{HeaderMap, header::COOKIE};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

/// Usernames nobody may register.
pub const RESERVED_USERNAMES: &[&str] = &[
    "admin",
    "admins",
    "administrator",
    "moderator",
    "support",
    "staff",
];

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

pub(crate) fn valid_username(username: &str) -> bool {
    Regex::new(r"^[a-z0-9_-]{3,32}$").is_ok_and(|regex| regex.is_match(username))
}

pub(crate) fn is_reserved_username(username: &str) -> bool {
    RESERVED_USERNAMES.contains(&username)
}

/// Create a new opaque token for verification links.
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate verification token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Tokens become part of a cache key, so only URL-safe base64 is accepted.
pub(crate) fn looks_like_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 128
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Read one cookie value from every `Cookie` header on the request.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|part| {
            let (key, value) = part.trim().split_once('=')?;
            (key == name).then(|| value.trim().to_string())
        })
}

/// Only same-site absolute paths are followed after login.
pub(crate) fn local_redirect_target(next: &str) -> Option<&str> {
    let next = next.trim();
    (next.starts_with('/') && !next.starts_with("//") && !next.contains('\\')).then_some(next)
}

/// Client address for rate limiting and logs.
///
/// With `use_forwarded_for` the first `X-Forwarded-For` entry wins (the
/// deployment sits behind a trusted proxy); otherwise the socket peer is used.
/// Port suffixes are dropped.
pub(crate) fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    use_forwarded_for: bool,
) -> Option<String> {
    if use_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(forwarded) = forwarded {
            return Some(strip_port(forwarded));
        }
    }
    peer.map(|addr| addr.ip().to_string())
}

fn strip_port(addr: &str) -> String {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return ip.to_string();
    }
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return socket.ip().to_string();
    }
    addr.to_string()
}

/// Render a duration the way people say it: "30 seconds", "1 hour", "2 months".
pub fn format_duration_coarse(duration: Duration) -> String {
    let plural = |unit: &str, value: u64| {
        if value == 1 {
            format!("{value} {unit}")
        } else {
            format!("{value} {unit}s")
        }
    };

    let seconds = duration.as_secs();
    if seconds < 60 {
        return plural("second", seconds);
    }
    if seconds < 60 * 60 {
        return plural("minute", seconds / 60);
    }
    if seconds < 24 * 60 * 60 {
        return plural("hour", seconds / (60 * 60));
    }

    let days = seconds / (24 * 60 * 60);
    if days < 30 {
        return plural("day", days);
    }
    let months = days / 30;
    if months < 12 {
        return plural("month", months);
    }
    plural("year", days / 365)
}
