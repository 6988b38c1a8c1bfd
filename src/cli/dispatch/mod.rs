//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to the action to run, currently always the
//! HTTP server with its full configuration.

use crate::{
    api::MEMORY_BACKEND,
    cli::{
        actions::{Action, server::Args},
        commands::{self, auth, cache, mail},
    },
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);

    let cache_opts = cache::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;
    let mail_opts = mail::Options::parse(matches)?;

    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .filter(|dsn| !dsn.trim().is_empty());
    let dsn = if cache_opts.redis_url == MEMORY_BACKEND {
        dsn
    } else {
        Some(dsn.context("missing required argument: --dsn")?)
    };

    let db_password = matches
        .get_one::<String>(commands::ARG_DB_PASSWORD)
        .filter(|password| !password.is_empty())
        .map(|password| SecretString::from(password.clone()));

    Ok(Action::Server(Args {
        port,
        dsn,
        db_password,
        redis_url: cache_opts.redis_url,
        base_url: auth_opts.base_url,
        site_title: auth_opts.site_title,
        admin_email: auth_opts.admin_email,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        token_ttl_seconds: auth_opts.token_ttl_seconds,
        skip_email_verification: auth_opts.skip_email_verification,
        use_forwarded_for: auth_opts.use_forwarded_for,
        max_form_bytes: auth_opts.max_form_bytes,
        mail_enabled: mail_opts.enabled,
        mail_from: mail_opts.from,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENV_VARS: [&str; 6] = [
        "PORTICO_DSN",
        "PORTICO_DB_PASSWORD",
        "PORTICO_REDIS_URL",
        "PORTICO_BASE_URL",
        "PORTICO_MAIL_ENABLED",
        "PORTICO_MAIL_FROM",
    ];

    fn run(args: &[&str]) -> Result<Action> {
        temp_env::with_vars(
            ENV_VARS.iter().map(|name| (*name, None::<&str>)).collect::<Vec<_>>(),
            || {
                let mut argv = vec!["portico"];
                argv.extend_from_slice(args);
                let matches = commands::new().get_matches_from(argv);
                handler(&matches)
            },
        )
    }

    #[test]
    fn dsn_required_for_redis() {
        let result = run(&[]);
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(err.to_string().contains("missing required argument: --dsn"));
        }
    }

    #[test]
    fn memory_backend_needs_no_dsn() {
        let Ok(Action::Server(args)) = run(&["--redis-url", "memory://"]) else {
            panic!("expected a server action");
        };
        assert_eq!(args.dsn, None);
        assert_eq!(args.redis_url, "memory://");
        assert!(!args.mail_enabled);
    }

    #[test]
    fn server_args_are_collected() {
        let Ok(Action::Server(args)) = run(&[
            "--port",
            "9000",
            "--dsn",
            "postgres://portico@localhost/portico",
            "--db-password",
            "secret",
            "--base-url",
            "https://members.example.com",
            "--mail-enabled",
            "--use-x-forwarded-for",
        ]) else {
            panic!("expected a server action");
        };
        assert_eq!(args.port, 9000);
        assert_eq!(
            args.dsn.as_deref(),
            Some("postgres://portico@localhost/portico")
        );
        assert!(args.db_password.is_some());
        assert_eq!(args.base_url, "https://members.example.com");
        assert!(args.mail_enabled);
        assert!(args.use_forwarded_for);
    }

    #[test]
    fn base_url_must_be_http() {
        let result = run(&["--redis-url", "memory://", "--base-url", "ftp://example.com"]);
        assert!(result.is_err());
    }
}
