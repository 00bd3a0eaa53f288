//! Principals, their housekeeping metadata and the one-time-code lifecycle.

mod lifecycle;
mod metadata;
mod principal;
mod service;

pub use lifecycle::{AccountLifecycle, CodePolicy, LifecycleConfig, LifecycleError};
pub use metadata::{
    AccessEvent, AccessLog, CodeKind, IssuedCode, Metadata, PasswordResetLog, PasswordResetType,
};
pub use principal::{
    derive_verified, normalize_email, normalize_for_save, AgeUnit, Principal, PrincipalField,
    Profile, Projection, Provider,
};
pub use service::{Accounts, NewPrincipal};

use crate::{error::ErrorKind, hashing::HashError, store::StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("email is required")]
    EmailRequired,
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    #[error("superuser password is required")]
    SuperuserPasswordRequired,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Hash(#[from] HashError),
}

impl AccountError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmailRequired | Self::InvalidEmail(_) | Self::SuperuserPasswordRequired => {
                ErrorKind::InvalidInput
            }
            Self::Store(err) => err.kind(),
            Self::Hash(err) => err.kind(),
        }
    }
}
