use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::SecretString;
use tracing::instrument;

use super::{inbound, lookup, required, Message, OperationParams, PasswordResetForm, Session};
use crate::{
    account::CodeKind,
    api::{error::ApiError, error::ErrorBody, AppState},
    auth::AuthError,
};

#[utoipa::path(
    post,
    path= "/password-reset",
    params(OperationParams),
    request_body(
        content(
            (PasswordResetForm = "application/x-www-form-urlencoded"),
            (PasswordResetForm = "application/json")
        )
    ),
    responses (
        (status = 200, description = "Password replaced, or temporary password sent to the authenticated user", body = Session),
        (status = 202, description = "Temporary password sent", body = Message),
        (status = 400, description = "Unknown operation, missing fields, expired or incorrect temporary password", body = ErrorBody),
        (status = 401, description = "Invalid credentials or old password", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    tag= "password-reset"
)]
/// `operation=request` mails a temporary password to the authenticated user or the one
/// named by `username`/`email`.
///
/// `operation=reset` sets `new_password` after checking either `temporary_password`, or
/// `old_password` for an authenticated user.
#[instrument(skip_all, fields(operation))]
pub async fn password_reset(
    Extension(state): Extension<AppState>,
    Query(params): Query<OperationParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let operation = params.operation.unwrap_or_default().to_ascii_lowercase();
    tracing::Span::current().record("operation", operation.as_str());

    let request = inbound(&headers, &body)?;
    let authenticated = state.resolver.resolve(&request).await?;

    match operation.as_str() {
        "request" => {
            if let Some(authenticated) = authenticated {
                let principal = authenticated.principal;
                let (token, _) = state
                    .lifecycle
                    .request(&principal, CodeKind::PasswordReset)
                    .await?;
                let session = Session {
                    token: token.pair(),
                    profile: principal.profile(),
                };
                return Ok((StatusCode::OK, Json(session)).into_response());
            }

            let principal = lookup(&state, &request).await?;
            state
                .lifecycle
                .request(&principal, CodeKind::PasswordReset)
                .await?;
            let message = Message {
                message: "A temporary password has been sent".to_string(),
            };
            Ok((StatusCode::ACCEPTED, Json(message)).into_response())
        }
        "reset" => {
            let new_password = SecretString::from(required(&request, "new_password")?);

            let (token, principal) = if let Some(old_password) =
                request.field("old_password").filter(|p| !p.is_empty())
            {
                let mut principal = authenticated.ok_or(AuthError::NoCredentials)?.principal;
                let token = state
                    .lifecycle
                    .change_password(&mut principal, &SecretString::from(old_password), new_password)
                    .await?;
                (token, principal)
            } else {
                let temporary_password = required(&request, "temporary_password")?;
                let mut principal = match authenticated {
                    Some(authenticated) => authenticated.principal,
                    None => lookup(&state, &request).await?,
                };
                let token = state
                    .lifecycle
                    .reset_password(&mut principal, &temporary_password, new_password)
                    .await?;
                (token, principal)
            };

            let session = Session {
                token: token.pair(),
                profile: principal.profile(),
            };
            Ok((StatusCode::OK, Json(session)).into_response())
        }
        _ => Err(ApiError::invalid_input("operation must be reset or request")),
    }
}
