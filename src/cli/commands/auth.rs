use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_BASE_URL: &str = "base-url";
pub const ARG_SITE_TITLE: &str = "site-title";
pub const ARG_ADMIN_EMAIL: &str = "admin-email";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_SKIP_EMAIL_VERIFICATION: &str = "skip-email-verification";
pub const ARG_USE_X_FORWARDED_FOR: &str = "use-x-forwarded-for";
pub const ARG_MAX_FORM_BYTES: &str = "max-form-bytes";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_site_args(command);
    with_session_args(command)
}

fn with_site_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BASE_URL)
                .long(ARG_BASE_URL)
                .help("Public base URL used for links in emails")
                .env("PORTICO_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_SITE_TITLE)
                .long(ARG_SITE_TITLE)
                .help("Site title shown on pages and in emails")
                .env("PORTICO_SITE_TITLE")
                .default_value("Portico"),
        )
        .arg(
            Arg::new(ARG_ADMIN_EMAIL)
                .long(ARG_ADMIN_EMAIL)
                .help("Administrator address for contact messages and impersonation notices")
                .env("PORTICO_ADMIN_EMAIL"),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie and record TTL in seconds")
                .env("PORTICO_SESSION_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Verification token TTL in seconds")
                .env("PORTICO_TOKEN_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SKIP_EMAIL_VERIFICATION)
                .long(ARG_SKIP_EMAIL_VERIFICATION)
                .help("Create accounts without verifying the email address first")
                .env("PORTICO_SKIP_EMAIL_VERIFICATION")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_USE_X_FORWARDED_FOR)
                .long(ARG_USE_X_FORWARDED_FOR)
                .help("Trust X-Forwarded-For for the client address (only behind a proxy)")
                .env("PORTICO_USE_X_FORWARDED_FOR")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_MAX_FORM_BYTES)
                .long(ARG_MAX_FORM_BYTES)
                .help("Largest form body accepted, in bytes")
                .env("PORTICO_MAX_FORM_BYTES")
                .default_value("65536")
                .value_parser(clap::value_parser!(usize)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub base_url: String,
    pub site_title: String,
    pub admin_email: Option<String>,
    pub session_ttl_seconds: u64,
    pub token_ttl_seconds: u64,
    pub skip_email_verification: bool,
    pub use_forwarded_for: bool,
    pub max_form_bytes: usize,
}

impl Options {
    /// Parse session and account arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the base URL is not an absolute http(s) URL.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let base_url = matches
            .get_one::<String>(ARG_BASE_URL)
            .cloned()
            .unwrap_or_default();
        let parsed = url::Url::parse(&base_url)
            .map_err(|err| anyhow::anyhow!("invalid --{ARG_BASE_URL} {base_url:?}: {err}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("--{ARG_BASE_URL} must use http or https");
        }

        // Helper to filter empty strings which clap might pass through if env vars are set to ""
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Ok(Self {
            base_url,
            site_title: get_non_empty(ARG_SITE_TITLE).unwrap_or_else(|| "Portico".to_string()),
            admin_email: get_non_empty(ARG_ADMIN_EMAIL),
            session_ttl_seconds: matches
                .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(2_592_000),
            token_ttl_seconds: matches
                .get_one::<u64>(ARG_TOKEN_TTL_SECONDS)
                .copied()
                .unwrap_or(86_400),
            skip_email_verification: matches.get_flag(ARG_SKIP_EMAIL_VERIFICATION),
            use_forwarded_for: matches.get_flag(ARG_USE_X_FORWARDED_FOR),
            max_form_bytes: matches
                .get_one::<usize>(ARG_MAX_FORM_BYTES)
                .copied()
                .unwrap_or(65_536),
        })
    }
}
