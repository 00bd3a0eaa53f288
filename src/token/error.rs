use crate::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token not ready for use")]
    NotYetValid,
    /// Signature, decryption or format failure. The detail is for debug logs only.
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("invalid token configuration: {0}")]
    Configuration(String),
    #[error("failed to encode token: {0}")]
    Encoding(String),
}

impl TokenError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Expired => ErrorKind::TokenExpired,
            Self::NotYetValid => ErrorKind::TokenNotYetValid,
            Self::Invalid(_) => ErrorKind::TokenInvalid,
            Self::Configuration(_) => ErrorKind::ConfigurationFault,
            Self::Encoding(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        Self::Invalid(detail.into())
    }
}
