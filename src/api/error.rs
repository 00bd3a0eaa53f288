use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use utoipa::ToSchema;

use crate::{
    account::{AccountError, LifecycleError},
    auth::AuthError,
    error::ErrorKind,
    token::TokenError,
};

/// JSON error body.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub message: String,
    /// Underlying error detail, only in debug builds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_message: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    detail: Option<String>,
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ErrorKind, detail: impl ToString) -> Self {
        Self {
            kind,
            message: public_message(kind).to_string(),
            detail: Some(detail.to_string()),
        }
    }

    /// A 400 with a caller-facing message.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        status_for(self.kind)
    }
}

/// Response class of each error kind.
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NoCredentials
        | ErrorKind::InvalidCredentials
        | ErrorKind::TokenExpired
        | ErrorKind::TokenNotYetValid
        | ErrorKind::TokenInvalid => StatusCode::UNAUTHORIZED,
        ErrorKind::InactiveAccount => StatusCode::FORBIDDEN,
        ErrorKind::PrincipalNotFound => StatusCode::NOT_FOUND,
        ErrorKind::CodeExpired | ErrorKind::CodeIncorrect | ErrorKind::InvalidInput => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::ConfigurationFault | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

const fn public_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NoCredentials => "Authentication credentials were not provided",
        ErrorKind::InvalidCredentials => "Invalid username or password",
        ErrorKind::PrincipalNotFound => "User not found",
        ErrorKind::InactiveAccount => "Account is inactive",
        ErrorKind::TokenExpired => "Token has expired",
        ErrorKind::TokenNotYetValid => "Token is not yet valid",
        ErrorKind::TokenInvalid => "Invalid token",
        ErrorKind::CodeExpired => "Code has expired",
        ErrorKind::CodeIncorrect => "Incorrect code",
        ErrorKind::Conflict => "User with the specified username or email already exists",
        ErrorKind::InvalidInput => "Invalid input",
        ErrorKind::ConfigurationFault | ErrorKind::Internal => "Internal server error",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self.kind {
            ErrorKind::ConfigurationFault => {
                error!("configuration fault: {}", self.detail.as_deref().unwrap_or("-"));
            }
            ErrorKind::Internal => {
                error!("internal error: {}", self.detail.as_deref().unwrap_or("-"));
            }
            kind => debug!(%kind, "request failed: {}", self.detail.as_deref().unwrap_or("-")),
        }

        let body = ErrorBody {
            message: self.message,
            debug_message: if cfg!(debug_assertions) {
                self.detail
            } else {
                None
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::new(err.kind(), err)
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        Self::new(err.kind(), err)
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match &err {
            AccountError::EmailRequired
            | AccountError::InvalidEmail(_)
            | AccountError::SuperuserPasswordRequired => Self::invalid_input(err.to_string()),
            _ => Self::new(err.kind(), err),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        Self::new(err.kind(), err)
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::new(err.kind(), err)
    }
}
