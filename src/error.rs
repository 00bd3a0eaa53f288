//! Error kinds shared across the token, resolver and lifecycle layers.
//!
//! Each module keeps its own `thiserror` enum; `ErrorKind` is the flattened view
//! the API layer uses to pick a response class.

use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No recognized scheme or credentials; the next resolver may apply.
    NoCredentials,
    InvalidCredentials,
    PrincipalNotFound,
    InactiveAccount,
    TokenExpired,
    TokenNotYetValid,
    TokenInvalid,
    CodeExpired,
    CodeIncorrect,
    /// Username or email already taken.
    Conflict,
    InvalidInput,
    /// Programming or deployment error (e.g. not-before at or after expiry).
    ConfigurationFault,
    /// Persistence or hashing backend failure.
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoCredentials => "no_credentials",
            Self::InvalidCredentials => "invalid_credentials",
            Self::PrincipalNotFound => "principal_not_found",
            Self::InactiveAccount => "inactive_account",
            Self::TokenExpired => "token_expired",
            Self::TokenNotYetValid => "token_not_yet_valid",
            Self::TokenInvalid => "token_invalid",
            Self::CodeExpired => "code_expired",
            Self::CodeIncorrect => "code_incorrect",
            Self::Conflict => "conflict",
            Self::InvalidInput => "invalid_input",
            Self::ConfigurationFault => "configuration_fault",
            Self::Internal => "internal",
        }
    }

    /// Authentication failures share the "not authenticated" response class.
    #[must_use]
    pub const fn is_authentication_failure(self) -> bool {
        matches!(
            self,
            Self::NoCredentials
                | Self::InvalidCredentials
                | Self::TokenExpired
                | Self::TokenNotYetValid
                | Self::TokenInvalid
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
