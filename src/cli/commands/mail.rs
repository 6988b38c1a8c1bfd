use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_MAIL_ENABLED: &str = "mail-enabled";
pub const ARG_MAIL_FROM: &str = "mail-from";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAIL_ENABLED)
                .long(ARG_MAIL_ENABLED)
                .help("Send verification, reset and notification emails")
                .env("PORTICO_MAIL_ENABLED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_MAIL_FROM)
                .long(ARG_MAIL_FROM)
                .help("Sender address for outgoing email")
                .env("PORTICO_MAIL_FROM")
                .default_value("no-reply@localhost"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub enabled: bool,
    pub from: String,
}

impl Options {
    /// Parse mail arguments from matches.
    ///
    /// # Errors
    /// Returns an error if mail is enabled without a sender address.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let enabled = matches.get_flag(ARG_MAIL_ENABLED);
        let from = matches
            .get_one::<String>(ARG_MAIL_FROM)
            .map(|value| value.trim().to_string())
            .unwrap_or_default();
        if enabled && from.is_empty() {
            anyhow::bail!("missing required argument: --{ARG_MAIL_FROM}");
        }
        Ok(Self { enabled, from })
    }
}
