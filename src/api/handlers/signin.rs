use axum::{
    body::Bytes,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use std::net::SocketAddr;
use tracing::{error, info, instrument};

use super::{client_ip, inbound, session, CredentialsForm, Session};
use crate::{
    account::AccessLog,
    api::{error::ApiError, error::ErrorBody, AppState},
};

#[utoipa::path(
    post,
    path= "/signin",
    request_body(
        description = "Form credentials, read only when no Authorization header is sent",
        content(
            (CredentialsForm = "application/x-www-form-urlencoded"),
            (CredentialsForm = "application/json")
        )
    ),
    responses (
        (status = 200, description = "Signed in", body = Session, content_type = "application/json"),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Account is inactive", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    security(("basic" = []), ("bearer" = [])),
    tag= "auth"
)]
/// Resolve the request's credentials and issue a fresh token pair.
///
/// Every successful sign-in is recorded in the principal's access log.
#[instrument(skip_all)]
pub async fn signin(
    Extension(state): Extension<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let request = inbound(&headers, &body)?;
    let authenticated = state.resolver.require(&request).await?;
    let principal = authenticated.principal;

    let log = AccessLog::sign_in(
        principal.id,
        client_ip(&headers, peer.map(|ConnectInfo(addr)| addr)),
        Utc::now(),
    );
    // Audit failures do not fail the sign-in.
    if let Err(err) = state.metadata.record_access(&log).await {
        error!("Failed to record sign-in: {}", err);
    }

    info!(id = principal.id, event = %log.event, ip = ?log.ip, "signed in");
    Ok((StatusCode::OK, Json(session(&state, &principal)?)))
}
