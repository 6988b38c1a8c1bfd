use clap::{Arg, ArgMatches, Command};

pub const ARG_REDIS_URL: &str = "redis-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_REDIS_URL)
            .long(ARG_REDIS_URL)
            .help("Redis URL for sessions, tokens and rate limits")
            .long_help(
                "Redis URL for sessions, tokens and rate limits. Use memory:// to keep everything, users included, in process memory.",
            )
            .env("PORTICO_REDIS_URL")
            .default_value("redis://127.0.0.1:6379"),
    )
}

#[derive(Debug)]
pub struct Options {
    pub redis_url: String,
}

impl Options {
    /// Parse cache arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the Redis URL is blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let redis_url = match matches.get_one::<String>(ARG_REDIS_URL) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => anyhow::bail!("missing required argument: --{ARG_REDIS_URL}"),
        };
        Ok(Self { redis_url })
    }
}
