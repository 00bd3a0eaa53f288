use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::instrument;

use super::{inbound, required, CodeForm, OperationParams, Session};
use crate::{
    account::CodeKind,
    api::{error::ApiError, error::ErrorBody, AppState},
};

#[utoipa::path(
    post,
    path= "/verification",
    params(OperationParams),
    request_body(
        content(
            (CodeForm = "application/x-www-form-urlencoded"),
            (CodeForm = "application/json")
        )
    ),
    responses (
        (status = 200, description = "`verify`: account verified, fresh session. `request`: code sent, short-lived token", body = Session),
        (status = 400, description = "Unknown operation, missing code, expired or incorrect code", body = ErrorBody),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 404, description = "No outstanding code for this user", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "verification"
)]
/// `operation=verify` checks the `code` field; `operation=request` issues a new code.
#[instrument(skip_all, fields(operation))]
pub async fn verification(
    Extension(state): Extension<AppState>,
    Query(params): Query<OperationParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let operation = params.operation.unwrap_or_default().to_ascii_lowercase();
    tracing::Span::current().record("operation", operation.as_str());

    let request = inbound(&headers, &body)?;
    let mut principal = state.resolver.require(&request).await?.principal;

    let token = match operation.as_str() {
        "verify" => {
            let code = required(&request, "code")?;
            state.lifecycle.verify(&mut principal, &code).await?
        }
        "request" => {
            let (token, _code) = state
                .lifecycle
                .request(&principal, CodeKind::Verification)
                .await?;
            token
        }
        _ => return Err(ApiError::invalid_input("operation must be verify or request")),
    };

    Ok((
        StatusCode::OK,
        Json(Session {
            token: token.pair(),
            profile: principal.profile(),
        }),
    ))
}
