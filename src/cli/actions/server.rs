use crate::{
    api::{self, handlers::auth::AuthConfig},
    cli::telemetry,
    mail::{LogEmailSender, Mailer},
};
use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub db_password: Option<SecretString>,
    pub redis_url: String,
    pub base_url: String,
    pub site_title: String,
    pub admin_email: Option<String>,
    pub session_ttl_seconds: u64,
    pub token_ttl_seconds: u64,
    pub skip_email_verification: bool,
    pub use_forwarded_for: bool,
    pub max_form_bytes: usize,
    pub mail_enabled: bool,
    pub mail_from: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the DSN is invalid, a backend is unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let dsn = args
        .dsn
        .as_deref()
        .map(|dsn| with_password(dsn, args.db_password.as_ref()))
        .transpose()?;

    let auth_config = AuthConfig::new(args.base_url)
        .with_site_title(args.site_title)
        .with_admin_email(args.admin_email)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_token_ttl_seconds(args.token_ttl_seconds)
        .with_skip_email_verification(args.skip_email_verification)
        .with_use_forwarded_for(args.use_forwarded_for)
        .with_max_form_bytes(args.max_form_bytes);

    let mailer = if args.mail_enabled {
        Mailer::new(Arc::new(LogEmailSender), &args.mail_from)
    } else {
        Mailer::disabled()
    };

    let result = api::new(args.port, dsn, &args.redis_url, auth_config, mailer).await;

    telemetry::shutdown_tracer();

    result
}

/// Inject the database password into `dsn`, if one was given separately.
fn with_password(dsn: &str, password: Option<&SecretString>) -> Result<String> {
    let Some(password) = password else {
        return Ok(dsn.to_string());
    };

    let mut dsn = Url::parse(dsn).context("Invalid database connection string")?;

    dsn.set_password(Some(password.expose_secret()))
        .map_err(|()| anyhow!("Error setting password"))?;

    debug!("Injected database password into DSN for user {}", dsn.username());

    Ok(dsn.to_string())
}
