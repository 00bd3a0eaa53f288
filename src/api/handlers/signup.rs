use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::NaiveDate;
use secrecy::SecretString;
use tracing::{error, info, instrument};

use super::{inbound, required, session, Session, SignupForm};
use crate::{
    account::{CodeKind, NewPrincipal},
    api::{error::ApiError, error::ErrorBody, AppState},
};

#[utoipa::path(
    post,
    path= "/signup",
    request_body(
        content(
            (SignupForm = "application/x-www-form-urlencoded"),
            (SignupForm = "application/json")
        )
    ),
    responses (
        (status = 201, description = "Registration successful", body = Session, content_type = "application/json"),
        (status = 400, description = "Missing or malformed fields", body = ErrorBody),
        (status = 409, description = "User with the specified username or email already exists", body = ErrorBody),
    ),
    tag= "auth"
)]
/// Register an email account.
///
/// Unverified accounts are sent a verification code right away.
#[instrument(skip_all)]
pub async fn signup(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let request = inbound(&headers, &body)?;

    let mut new = NewPrincipal::new(required(&request, "email")?);
    if let Some(username) = request.field("username").filter(|u| !u.trim().is_empty()) {
        new = new.with_username(username);
    }
    if let Some(password) = request.field("password").filter(|p| !p.is_empty()) {
        new = new.with_password(SecretString::from(password));
    }
    if let Some(surname) = request.field("surname") {
        new = new.with_surname(surname);
    }
    if let Some(first_name) = request.field("first_name") {
        new = new.with_first_name(first_name);
    }
    if let Some(last_name) = request.field("last_name") {
        new = new.with_last_name(last_name);
    }
    if let Some(mobile_number) = request.field("mobile_number") {
        new = new.with_mobile_number(mobile_number);
    }
    if let Some(date_of_birth) = request.field("date_of_birth").filter(|d| !d.trim().is_empty()) {
        let date_of_birth = NaiveDate::parse_from_str(date_of_birth.trim(), "%Y-%m-%d")
            .map_err(|_| ApiError::invalid_input("date_of_birth must be YYYY-MM-DD"))?;
        new = new.with_date_of_birth(date_of_birth);
    }

    let principal = state.accounts.create_user(new).await?;
    info!(id = principal.id, "principal registered");

    if !principal.is_verified {
        // The account exists either way; a failed request can be retried from /verification.
        if let Err(err) = state
            .lifecycle
            .request(&principal, CodeKind::Verification)
            .await
        {
            error!("Failed to issue verification code: {}", err);
        }
    }

    Ok((StatusCode::CREATED, Json(session(&state, &principal)?)))
}
