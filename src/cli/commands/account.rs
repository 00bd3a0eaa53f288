use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_PASSWORD_PEPPER: &str = "password-pepper";
pub const ARG_VERIFICATION_CODE_ALPHABET: &str = "verification-code-alphabet";
pub const ARG_VERIFICATION_CODE_LENGTH: &str = "verification-code-length";
pub const ARG_RESET_CODE_ALPHABET: &str = "reset-code-alphabet";
pub const ARG_RESET_CODE_LENGTH: &str = "reset-code-length";
pub const ARG_NEWBIE_WINDOW_SECONDS: &str = "newbie-window-seconds";
pub const ARG_USERNAME_FIELD: &str = "username-field";
pub const ARG_EMAIL_FIELD: &str = "email-field";
pub const ARG_PASSWORD_FIELD: &str = "password-field";

#[derive(Debug, Clone)]
pub struct CodeOptions {
    pub alphabet: Option<String>,
    pub length: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub password_pepper: Option<SecretString>,
    pub verification: CodeOptions,
    pub password_reset: CodeOptions,
    pub newbie_window_seconds: i64,
    pub username_field: String,
    pub email_field: String,
    pub password_field: String,
}

impl Options {
    /// Parse account arguments from matches.
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Self {
            password_pepper: get_non_empty(ARG_PASSWORD_PEPPER).map(SecretString::from),
            verification: CodeOptions {
                alphabet: get_non_empty(ARG_VERIFICATION_CODE_ALPHABET),
                length: matches.get_one::<usize>(ARG_VERIFICATION_CODE_LENGTH).copied(),
            },
            password_reset: CodeOptions {
                alphabet: get_non_empty(ARG_RESET_CODE_ALPHABET),
                length: matches.get_one::<usize>(ARG_RESET_CODE_LENGTH).copied(),
            },
            newbie_window_seconds: matches
                .get_one::<i64>(ARG_NEWBIE_WINDOW_SECONDS)
                .copied()
                .unwrap_or(86_400),
            username_field: get_non_empty(ARG_USERNAME_FIELD)
                .unwrap_or_else(|| "username".to_string()),
            email_field: get_non_empty(ARG_EMAIL_FIELD).unwrap_or_else(|| "email".to_string()),
            password_field: get_non_empty(ARG_PASSWORD_FIELD)
                .unwrap_or_else(|| "password".to_string()),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_code_args(command);
    command
        .arg(
            Arg::new(ARG_PASSWORD_PEPPER)
                .long(ARG_PASSWORD_PEPPER)
                .help("Secret mixed into every Argon2 hash")
                .env("XAUTH_PASSWORD_PEPPER")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_NEWBIE_WINDOW_SECONDS)
                .long(ARG_NEWBIE_WINDOW_SECONDS)
                .help("Accounts younger than this get the welcome text in verification mails")
                .env("XAUTH_NEWBIE_WINDOW_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_USERNAME_FIELD)
                .long(ARG_USERNAME_FIELD)
                .help("Form field holding the username")
                .env("XAUTH_USERNAME_FIELD")
                .default_value("username"),
        )
        .arg(
            Arg::new(ARG_EMAIL_FIELD)
                .long(ARG_EMAIL_FIELD)
                .help("Form field holding the email when a principal is looked up without a password")
                .env("XAUTH_EMAIL_FIELD")
                .default_value("email"),
        )
        .arg(
            Arg::new(ARG_PASSWORD_FIELD)
                .long(ARG_PASSWORD_FIELD)
                .help("Form field holding the password")
                .env("XAUTH_PASSWORD_FIELD")
                .default_value("password"),
        )
}

fn with_code_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERIFICATION_CODE_ALPHABET)
                .long(ARG_VERIFICATION_CODE_ALPHABET)
                .help("Characters verification codes are drawn from (default: digits)")
                .env("XAUTH_VERIFICATION_CODE_ALPHABET"),
        )
        .arg(
            Arg::new(ARG_VERIFICATION_CODE_LENGTH)
                .long(ARG_VERIFICATION_CODE_LENGTH)
                .help("Fixed verification code length (default: random 8 to 10)")
                .env("XAUTH_VERIFICATION_CODE_LENGTH")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_RESET_CODE_ALPHABET)
                .long(ARG_RESET_CODE_ALPHABET)
                .help("Characters temporary passwords are drawn from (default: letters and digits)")
                .env("XAUTH_RESET_CODE_ALPHABET"),
        )
        .arg(
            Arg::new(ARG_RESET_CODE_LENGTH)
                .long(ARG_RESET_CODE_LENGTH)
                .help("Fixed temporary password length (default: random 8 to 10)")
                .env("XAUTH_RESET_CODE_LENGTH")
                .value_parser(clap::value_parser!(usize)),
        )
}
