use clap::{Arg, ArgMatches, Command};

pub const ARG_APP_NAME: &str = "app-name";
pub const ARG_MAIL_SENDER: &str = "mail-sender";
pub const ARG_MAIL_REPLY_TO: &str = "mail-reply-to";
pub const ARG_MAIL_MAX_ATTEMPTS: &str = "mail-max-attempts";
pub const ARG_MAIL_BACKOFF_BASE_SECONDS: &str = "mail-backoff-base-seconds";
pub const ARG_MAIL_BACKOFF_MAX_SECONDS: &str = "mail-backoff-max-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub app_name: String,
    pub sender: String,
    pub reply_to: Vec<String>,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

impl Options {
    /// Parse mail arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the sender address is empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let sender = match matches.get_one::<String>(ARG_MAIL_SENDER) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => anyhow::bail!("missing required argument: --{ARG_MAIL_SENDER}"),
        };

        Ok(Self {
            app_name: matches
                .get_one::<String>(ARG_APP_NAME)
                .cloned()
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            sender,
            reply_to: matches
                .get_many::<String>(ARG_MAIL_REPLY_TO)
                .map(|values| {
                    values
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            max_attempts: matches
                .get_one::<u32>(ARG_MAIL_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(5),
            backoff_base_seconds: matches
                .get_one::<u64>(ARG_MAIL_BACKOFF_BASE_SECONDS)
                .copied()
                .unwrap_or(5),
            backoff_max_seconds: matches
                .get_one::<u64>(ARG_MAIL_BACKOFF_MAX_SECONDS)
                .copied()
                .unwrap_or(300),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_APP_NAME)
                .long(ARG_APP_NAME)
                .help("Application name used in mail subjects and bodies")
                .env("XAUTH_APP_NAME")
                .default_value(env!("CARGO_PKG_NAME")),
        )
        .arg(
            Arg::new(ARG_MAIL_SENDER)
                .long(ARG_MAIL_SENDER)
                .help("Sender address for outgoing mail")
                .env("XAUTH_MAIL_SENDER")
                .default_value("no-reply@localhost"),
        )
        .arg(
            Arg::new(ARG_MAIL_REPLY_TO)
                .long(ARG_MAIL_REPLY_TO)
                .help("Reply-to addresses, comma separated")
                .env("XAUTH_MAIL_REPLY_TO")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_MAIL_MAX_ATTEMPTS)
                .long(ARG_MAIL_MAX_ATTEMPTS)
                .help("Delivery attempts per message before giving up")
                .env("XAUTH_MAIL_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_MAIL_BACKOFF_BASE_SECONDS)
                .long(ARG_MAIL_BACKOFF_BASE_SECONDS)
                .help("Base delay for mail retry backoff")
                .env("XAUTH_MAIL_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAIL_BACKOFF_MAX_SECONDS)
                .long(ARG_MAIL_BACKOFF_MAX_SECONDS)
                .help("Max delay for mail retry backoff")
                .env("XAUTH_MAIL_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}
