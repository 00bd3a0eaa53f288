use axum::{
    body::Bytes,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use std::net::SocketAddr;
use tracing::{info, instrument};

use super::{client_ip, inbound, CredentialsForm, Message};
use crate::{
    account::AccessLog,
    api::{error::ApiError, error::ErrorBody, AppState},
};

#[utoipa::path(
    post,
    path= "/signout",
    request_body(
        description = "Form credentials, read only when no Authorization header is sent",
        content(
            (CredentialsForm = "application/x-www-form-urlencoded"),
            (CredentialsForm = "application/json")
        )
    ),
    responses (
        (status = 200, description = "Sign-out recorded", body = Message),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Account is inactive", body = ErrorBody),
    ),
    security(("bearer" = []), ("basic" = [])),
    tag= "auth"
)]
/// Record a sign-out for the authenticated principal.
///
/// Tokens are stateless, so this only writes the access log.
#[instrument(skip_all)]
pub async fn signout(
    Extension(state): Extension<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let request = inbound(&headers, &body)?;
    let principal = state.resolver.require(&request).await?.principal;

    let log = AccessLog::sign_out(
        principal.id,
        client_ip(&headers, peer.map(|ConnectInfo(addr)| addr)),
        Utc::now(),
    );
    state.metadata.record_access(&log).await?;

    info!(id = principal.id, event = %log.event, ip = ?log.ip, "signed out");
    Ok((
        StatusCode::OK,
        Json(Message {
            message: "Signed out".to_string(),
        }),
    ))
}
