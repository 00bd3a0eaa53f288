//! Credential resolution for inbound requests.
//!
//! Flow Overview: parse the `Authorization` header into an [`AuthScheme`], then either
//! decode a bearer token, decode Basic credentials, or fall back to username and
//! password fields. `Ok(None)` means "no credentials here" so another mechanism may
//! take over; every other failure is final.

mod request;
mod resolver;
mod scheme;

pub use request::InboundRequest;
pub use resolver::{Authenticated, CredentialResolver, ResolverConfig};
pub use scheme::AuthScheme;

use crate::{error::ErrorKind, store::StoreError, token::TokenError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication credentials were not provided")]
    NoCredentials,
    #[error("principal not found")]
    PrincipalNotFound,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("principal is inactive")]
    InactiveAccount,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoCredentials => ErrorKind::NoCredentials,
            Self::PrincipalNotFound => ErrorKind::PrincipalNotFound,
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::InactiveAccount => ErrorKind::InactiveAccount,
            Self::Token(err) => err.kind(),
            Self::Store(err) => err.kind(),
        }
    }
}
