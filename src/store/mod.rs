//! Persistence boundary for principals and their housekeeping metadata.
//!
//! `PgStore` is the production backend; `MemoryStore` backs tests and the
//! database-less development mode.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    account::{
        AccessLog, CodeKind, IssuedCode, Metadata, PasswordResetLog, PasswordResetType, Principal,
        PrincipalField,
    },
    error::ErrorKind,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound => ErrorKind::PrincipalNotFound,
            Self::Backend(_) => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db_err)
                if db_err.code().is_some_and(|code| code.as_ref() == "23505") =>
            {
                Self::Conflict(db_err.constraint().unwrap_or("record").to_string())
            }
            _ => Self::Backend(err.to_string()),
        }
    }
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, StoreError>;

    /// Insert a normalized principal and return it with its assigned id.
    async fn insert(&self, principal: &Principal) -> Result<Principal, StoreError>;

    /// Write only `fields` (plus the update timestamp).
    async fn update(&self, principal: &Principal, fields: &[PrincipalField])
        -> Result<(), StoreError>;

    /// Backend liveness for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn metadata(&self, principal_id: i64) -> Result<Option<Metadata>, StoreError>;

    /// Obtain-or-create the metadata row and overwrite the kind's digest and timestamp.
    async fn store_code(
        &self,
        principal_id: i64,
        kind: CodeKind,
        digest: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Null the kind's pair only if it still holds `expected_digest`.
    ///
    /// Returns `false` when another writer cleared or replaced it first.
    async fn clear_code(
        &self,
        principal_id: i64,
        kind: CodeKind,
        expected_digest: &str,
    ) -> Result<bool, StoreError>;

    /// Put back a code claimed by [`MetadataStore::clear_code`] whose follow-up failed.
    ///
    /// Writes only while the kind's pair is still empty, so a code requested in the
    /// meantime wins. Returns whether the code was restored.
    async fn restore_code(
        &self,
        principal_id: i64,
        kind: CodeKind,
        code: &IssuedCode,
    ) -> Result<bool, StoreError>;

    async fn open_reset_log(
        &self,
        principal_id: i64,
        kind: PasswordResetType,
        request_time: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Stamp the latest open log of `kind` with `change_time`, creating one if none is open.
    async fn close_reset_log(
        &self,
        principal_id: i64,
        kind: PasswordResetType,
        change_time: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Newest first.
    async fn reset_logs(&self, principal_id: i64) -> Result<Vec<PasswordResetLog>, StoreError>;

    async fn record_access(&self, log: &AccessLog) -> Result<(), StoreError>;

    /// Newest first.
    async fn access_logs(&self, principal_id: i64) -> Result<Vec<AccessLog>, StoreError>;
}
