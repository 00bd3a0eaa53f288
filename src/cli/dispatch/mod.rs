//! Map parsed arguments to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{account, mail, token, ARG_CORS_ORIGIN, ARG_DSN, ARG_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let get_non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };

    Ok(Action::Server(Args {
        port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
        dsn: get_non_empty(ARG_DSN),
        cors_origin: get_non_empty(ARG_CORS_ORIGIN),
        token: token::Options::parse(matches)?,
        account: account::Options::parse(matches),
        mail: mail::Options::parse(matches)?,
    }))
}
