//! # Portico (membership site front door)
//!
//! `portico` sits between browsers and the member records of a membership
//! website. It binds browsers to server-held sessions, guards form posts
//! against cross-site request forgery, throttles logins and contact messages,
//! and runs the email-verified account flows.
//!
//! ## Sessions
//!
//! A `session_id` cookie names a JSON record in the cache (`session/<uuid>`)
//! that lives for 30 days. Logging in or impersonating rotates the identifier
//! and deletes the old record.
//!
//! ## Verification tokens
//!
//! Signup, password reset and email change links carry random single-use
//! tokens stored under `signup-token/`, `reset-password/` and `change-email/`.
//! Every flow burns its token before applying the change, so a replayed link
//! never mutates anything twice.
//!
//! ## Rate limiting
//!
//! Counters live at `rate-limit/<namespace>/<subject>` and are updated with a
//! compare-and-swap loop. Reads that fail let the request through; writes that
//! fail refuse it.
//!
//! ## Backends
//!
//! Production uses Redis and `PostgreSQL`. Passing `memory://` as the Redis URL
//! keeps everything in process memory for development and tests.

pub mod api;
pub mod cache;
pub mod cli;
pub mod mail;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
