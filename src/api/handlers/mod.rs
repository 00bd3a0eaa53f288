pub mod health;
pub mod password_reset;
pub mod profile;
pub mod signin;
pub mod signout;
pub mod signup;
pub mod verification;

use axum::{
    body::Bytes,
    http::{header, HeaderMap},
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use utoipa::{IntoParams, ToSchema};

use super::{error::ApiError, AppState};
use crate::{
    account::{normalize_email, Principal, Profile},
    auth::{AuthError, InboundRequest},
    token::{TokenPair, TokenWindow},
};

/// Token pair plus the principal it was issued for.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Session {
    pub token: TokenPair,
    pub profile: Profile,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Message {
    pub message: String,
}

/// Form credentials for `/signin` and `/signout` when no `Authorization` header is sent.
///
/// Field names follow the configured username and password fields.
#[derive(ToSchema, Deserialize, Debug)]
pub struct CredentialsForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct SignupForm {
    pub email: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub surname: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub mobile_number: Option<String>,
    /// `YYYY-MM-DD`.
    pub date_of_birth: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct CodeForm {
    /// Required for `operation=verify`.
    pub code: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct PasswordResetForm {
    /// Names the user for an unauthenticated `operation=request`.
    pub username: Option<String>,
    pub email: Option<String>,
    pub temporary_password: Option<String>,
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OperationParams {
    /// Which step of the workflow to run.
    pub operation: Option<String>,
}

/// Collect the header, form and JSON fields credential resolution reads.
pub(crate) fn inbound(headers: &HeaderMap, body: &Bytes) -> Result<InboundRequest, ApiError> {
    let mut request = InboundRequest::new();
    // A value that is not visible ASCII counts as no header at all.
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        request = request.with_authorization(value);
    }

    if body.is_empty() {
        return Ok(request);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let form = url::form_urlencoded::parse(body).into_owned().collect();
        Ok(request.with_form(form))
    } else {
        let value = serde_json::from_slice(body)
            .map_err(|err| ApiError::invalid_input(format!("malformed request body: {err}")))?;
        Ok(request.with_body(value))
    }
}

pub(crate) fn required(request: &InboundRequest, name: &str) -> Result<String, ApiError> {
    request
        .field(name)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::invalid_input(format!("{name} is required")))
}

/// A fresh general-purpose session for `principal`.
pub(crate) fn session(state: &AppState, principal: &Principal) -> Result<Session, ApiError> {
    let token = state
        .codec
        .issue_for(&principal.projection(), TokenWindow::General)?;
    Ok(Session {
        token: token.pair(),
        profile: principal.profile(),
    })
}

/// Identify a principal by the configured username or email field of an
/// unauthenticated request.
pub(crate) async fn lookup(state: &AppState, request: &InboundRequest) -> Result<Principal, ApiError> {
    let config = state.resolver.config();
    let present = |name: &str| request.field(name).filter(|value| !value.trim().is_empty());

    let store = state.accounts.store();
    let found = if let Some(username) = present(config.username_field()) {
        store.find_by_username(username.trim()).await?
    } else if let Some(email) = present(config.email_field()) {
        store.find_by_email(&normalize_email(&email)).await?
    } else {
        return Err(ApiError::invalid_input(format!(
            "{} or {} is required",
            config.username_field(),
            config.email_field()
        )));
    };

    let principal = found.ok_or_else(|| ApiError::from(AuthError::PrincipalNotFound))?;
    if !principal.is_active {
        return Err(AuthError::InactiveAccount.into());
    }
    Ok(principal)
}

/// First `x-forwarded-for` hop, then `x-real-ip`, then the socket peer.
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next());
    let real = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok());

    [forwarded, real]
        .into_iter()
        .flatten()
        .find_map(|value| value.trim().parse().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn form_bodies_are_decoded() -> Result<(), ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let body = Bytes::from_static(b"username=jane&password=p%40ss");
        let request = inbound(&headers, &body)?;
        assert_eq!(request.field("password").as_deref(), Some("p@ss"));
        assert_eq!(request.authorization(), None);
        Ok(())
    }

    #[test]
    fn json_bodies_are_decoded() -> Result<(), ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        let body = Bytes::from_static(br#"{"code": "12345678"}"#);
        let request = inbound(&headers, &body)?;
        assert_eq!(request.field("code").as_deref(), Some("12345678"));
        assert_eq!(request.authorization(), Some("Bearer abc"));
        Ok(())
    }

    #[test]
    fn opaque_authorization_is_dropped() -> Result<(), ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_bytes(b"Basic \xffjane").map_err(|e| ApiError::invalid_input(e.to_string()))?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let body = Bytes::from_static(b"username=jane&password=secret");
        let request = inbound(&headers, &body)?;
        assert_eq!(request.authorization(), None);
        assert_eq!(request.field("username").as_deref(), Some("jane"));
        Ok(())
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        let body = Bytes::from_static(b"{nope");
        let result = inbound(&HeaderMap::new(), &body);
        assert!(matches!(result, Err(err) if err.kind() == crate::ErrorKind::InvalidInput));
    }

    #[test]
    fn empty_required_field_is_rejected() {
        let request = InboundRequest::new().with_form_field("code", "");
        assert!(required(&request, "code").is_err());
    }

    #[test]
    fn client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        let peer = SocketAddr::from(([10, 0, 0, 1], 4000));
        assert_eq!(
            client_ip(&headers, Some(peer)),
            Some(IpAddr::from([1, 2, 3, 4]))
        );
    }

    #[test]
    fn client_ip_skips_unparsable_hops() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("unknown"));
        headers.insert("x-real-ip", HeaderValue::from_static(" ::1 "));
        assert_eq!(
            client_ip(&headers, None),
            Some(IpAddr::from([0, 0, 0, 0, 0, 0, 0, 1]))
        );
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        let peer = SocketAddr::from(([10, 0, 0, 1], 4000));
        assert_eq!(
            client_ip(&HeaderMap::new(), Some(peer)),
            Some(peer.ip())
        );
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }
}
