use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr};

use crate::token::TokenWindow;

/// The two one-time-code workflows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    /// Numeric code proving control of the address.
    Verification,
    /// Temporary password that authorizes setting a new password.
    PasswordReset,
}

impl CodeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::PasswordReset => "password_reset",
        }
    }

    #[must_use]
    pub const fn token_window(self) -> TokenWindow {
        match self {
            Self::Verification => TokenWindow::Verification,
            Self::PasswordReset => TokenWindow::PasswordReset,
        }
    }

    /// Digest and timestamp columns backing this kind.
    #[must_use]
    pub const fn columns(self) -> (&'static str, &'static str) {
        match self {
            Self::Verification => ("verification_code", "verification_code_generated_at"),
            Self::PasswordReset => ("temporary_password", "temporary_password_generated_at"),
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outstanding code digest and when it was generated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCode {
    pub digest: String,
    pub generated_at: DateTime<Utc>,
}

/// Per-principal housekeeping record, created on the first code request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    pub principal_id: i64,
    pub temporary_password: Option<IssuedCode>,
    pub verification_code: Option<IssuedCode>,
}

impl Metadata {
    #[must_use]
    pub fn new(principal_id: i64) -> Self {
        Self {
            principal_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn code(&self, kind: CodeKind) -> Option<&IssuedCode> {
        match kind {
            CodeKind::Verification => self.verification_code.as_ref(),
            CodeKind::PasswordReset => self.temporary_password.as_ref(),
        }
    }

    pub fn code_mut(&mut self, kind: CodeKind) -> &mut Option<IssuedCode> {
        match kind {
            CodeKind::Verification => &mut self.verification_code,
            CodeKind::PasswordReset => &mut self.temporary_password,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PasswordResetType {
    /// Forgotten password, completed with a temporary password.
    Reset,
    /// Authenticated change with the old password.
    Change,
}

impl PasswordResetType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reset => "RESET",
            Self::Change => "CHANGE",
        }
    }
}

/// Audit row for a password reset or change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordResetLog {
    pub principal_id: i64,
    pub kind: PasswordResetType,
    pub request_time: DateTime<Utc>,
    pub change_time: Option<DateTime<Utc>>,
}

/// Which side of a session an [`AccessLog`] row records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessEvent {
    SignIn,
    SignOut,
}

impl AccessEvent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SignIn => "SIGN_IN",
            Self::SignOut => "SIGN_OUT",
        }
    }
}

impl fmt::Display for AccessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit row for a sign-in or a sign-out.
///
/// The two events never share a row, so only one of the ip/time pairs is ever set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessLog {
    pub principal_id: i64,
    pub event: AccessEvent,
    pub ip: Option<IpAddr>,
    pub time: DateTime<Utc>,
}

impl AccessLog {
    #[must_use]
    pub fn sign_in(principal_id: i64, ip: Option<IpAddr>, time: DateTime<Utc>) -> Self {
        Self {
            principal_id,
            event: AccessEvent::SignIn,
            ip,
            time,
        }
    }

    #[must_use]
    pub fn sign_out(principal_id: i64, ip: Option<IpAddr>, time: DateTime<Utc>) -> Self {
        Self {
            principal_id,
            event: AccessEvent::SignOut,
            ip,
            time,
        }
    }
}
