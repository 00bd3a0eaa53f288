use anyhow::anyhow;
use clap::{builder::PossibleValuesParser, Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::token::SigningAlgorithm;

pub const ARG_SECRET_KEY: &str = "secret-key";
pub const ARG_ENCRYPTION_KEY: &str = "encryption-key";
pub const ARG_TOKEN_ALGORITHM: &str = "token-algorithm";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_VERIFICATION_TTL_SECONDS: &str = "verification-ttl-seconds";
pub const ARG_PASSWORD_RESET_TTL_SECONDS: &str = "password-reset-ttl-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub secret_key: SecretString,
    pub encryption_key: Option<SecretString>,
    pub algorithm: SigningAlgorithm,
    pub ttl_seconds: i64,
    pub verification_ttl_seconds: i64,
    pub password_reset_ttl_seconds: i64,
}

impl Options {
    /// Parse token arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the secret key is missing or the algorithm is unknown.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret_key = match matches.get_one::<String>(ARG_SECRET_KEY) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_SECRET_KEY}"),
        };

        let encryption_key = matches
            .get_one::<String>(ARG_ENCRYPTION_KEY)
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.clone()));

        let algorithm = matches
            .get_one::<String>(ARG_TOKEN_ALGORITHM)
            .map_or("HS256", String::as_str)
            .parse::<SigningAlgorithm>()
            .map_err(|e| anyhow!("invalid --{ARG_TOKEN_ALGORITHM}: {e}"))?;

        let seconds = |id: &str, default: i64| matches.get_one::<i64>(id).copied().unwrap_or(default);

        Ok(Self {
            secret_key,
            encryption_key,
            algorithm,
            ttl_seconds: seconds(ARG_TOKEN_TTL_SECONDS, 5_184_000),
            verification_ttl_seconds: seconds(ARG_VERIFICATION_TTL_SECONDS, 3_600),
            password_reset_ttl_seconds: seconds(ARG_PASSWORD_RESET_TTL_SECONDS, 1_800),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SECRET_KEY)
                .long(ARG_SECRET_KEY)
                .help("Token signing key, at least 32 bytes")
                .env("XAUTH_SECRET_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_ENCRYPTION_KEY)
                .long(ARG_ENCRYPTION_KEY)
                .help("Separate token encryption key (default: derived from the signing key)")
                .env("XAUTH_ENCRYPTION_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ALGORITHM)
                .long(ARG_TOKEN_ALGORITHM)
                .help("Token signing algorithm")
                .env("XAUTH_TOKEN_ALGORITHM")
                .default_value("HS256")
                .value_parser(PossibleValuesParser::new(["HS256", "HS384", "HS512"])),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Lifetime of general-purpose tokens in seconds")
                .env("XAUTH_TOKEN_TTL_SECONDS")
                .default_value("5184000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_VERIFICATION_TTL_SECONDS)
                .long(ARG_VERIFICATION_TTL_SECONDS)
                .help("Lifetime of verification codes and their tokens in seconds")
                .env("XAUTH_VERIFICATION_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_RESET_TTL_SECONDS)
                .long(ARG_PASSWORD_RESET_TTL_SECONDS)
                .help("Lifetime of temporary passwords and their tokens in seconds")
                .env("XAUTH_PASSWORD_RESET_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
}
