use base64ct::{Base64, Encoding};
use serde_json::Value;
use std::{fmt, sync::Arc};
use tracing::{debug, instrument};

use super::{AuthError, AuthScheme, InboundRequest};
use crate::{
    account::{Accounts, Principal},
    token::TokenCodec,
};

/// Names of the form fields checked when no `Authorization` header is present.
///
/// `email_field` is only read where a principal is looked up without a password.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverConfig {
    username_field: String,
    email_field: String,
    password_field: String,
}

impl ResolverConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            username_field: "username".to_string(),
            email_field: "email".to_string(),
            password_field: "password".to_string(),
        }
    }

    #[must_use]
    pub fn with_username_field(mut self, name: impl Into<String>) -> Self {
        self.username_field = name.into();
        self
    }

    #[must_use]
    pub fn with_email_field(mut self, name: impl Into<String>) -> Self {
        self.email_field = name.into();
        self
    }

    #[must_use]
    pub fn with_password_field(mut self, name: impl Into<String>) -> Self {
        self.password_field = name.into();
        self
    }

    #[must_use]
    pub fn username_field(&self) -> &str {
        &self.username_field
    }

    #[must_use]
    pub fn email_field(&self) -> &str {
        &self.email_field
    }

    #[must_use]
    pub fn password_field(&self) -> &str {
        &self.password_field
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A resolved principal plus the raw bearer token when one was presented.
#[derive(Clone, Debug)]
pub struct Authenticated {
    pub principal: Principal,
    pub evidence: Option<String>,
}

#[derive(Clone)]
pub struct CredentialResolver {
    accounts: Accounts,
    codec: Arc<TokenCodec>,
    config: ResolverConfig,
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CredentialResolver {
    #[must_use]
    pub fn new(accounts: Accounts, codec: Arc<TokenCodec>, config: ResolverConfig) -> Self {
        Self {
            accounts,
            codec,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve the request to a principal.
    ///
    /// `Ok(None)` means the request carries nothing this resolver understands.
    ///
    /// # Errors
    ///
    /// Returns the token error kind for undecodable bearer tokens, `PrincipalNotFound`
    /// on a lookup miss, `InvalidCredentials` on a password mismatch and
    /// `InactiveAccount` for a resolved but inactive principal.
    #[instrument(skip_all)]
    pub async fn resolve(
        &self,
        request: &InboundRequest,
    ) -> Result<Option<Authenticated>, AuthError> {
        let resolved = match AuthScheme::parse(request.authorization()) {
            AuthScheme::Bearer(token) => self.from_bearer(token).await?,
            AuthScheme::Basic(encoded) => match decode_basic(&encoded) {
                Some((username, password)) => self.from_password(&username, &password).await?,
                None => None,
            },
            AuthScheme::FormCredentials => {
                let username = request.field(&self.config.username_field);
                let password = request.field(&self.config.password_field);
                match (username, password) {
                    (Some(username), Some(password)) => {
                        self.from_password(&username, &password).await?
                    }
                    _ => None,
                }
            }
            AuthScheme::Unrecognized => {
                debug!("unrecognized authorization header");
                None
            }
        };

        match resolved {
            Some(authenticated) if !authenticated.principal.is_active => {
                Err(AuthError::InactiveAccount)
            }
            resolved => Ok(resolved),
        }
    }

    /// [`CredentialResolver::resolve`], treating "no credentials" as an error.
    ///
    /// # Errors
    ///
    /// As [`CredentialResolver::resolve`], plus `NoCredentials`.
    pub async fn require(&self, request: &InboundRequest) -> Result<Authenticated, AuthError> {
        self.resolve(request).await?.ok_or(AuthError::NoCredentials)
    }

    async fn from_bearer(&self, token: String) -> Result<Option<Authenticated>, AuthError> {
        let payload = self.codec.decode(&token).map_err(|err| {
            debug!("bearer token rejected: {err}");
            err
        })?;

        let Some(id) = principal_id(&payload) else {
            debug!("bearer payload carries no principal id");
            return Ok(None);
        };

        let principal = self
            .accounts
            .store()
            .find_by_id(id)
            .await?
            .ok_or(AuthError::PrincipalNotFound)?;

        Ok(Some(Authenticated {
            principal,
            evidence: Some(token),
        }))
    }

    async fn from_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Authenticated>, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Ok(None);
        }

        let principal = self
            .accounts
            .store()
            .find_by_username(username)
            .await?
            .ok_or(AuthError::PrincipalNotFound)?;

        if !self.accounts.check_password(&principal, password) {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(Some(Authenticated {
            principal,
            evidence: None,
        }))
    }
}

/// `username:password`, split on the first colon.
fn decode_basic(encoded: &str) -> Option<(String, String)> {
    let decoded = Base64::decode_vec(encoded)
        .map_err(|err| debug!("basic credentials are not base64: {err}"))
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// A plain id, or an object with an `id` field.
fn principal_id(payload: &Value) -> Option<i64> {
    match payload {
        Value::Number(id) => id.as_i64(),
        Value::String(id) => id.trim().parse().ok(),
        Value::Object(map) => match map.get("id")? {
            Value::Object(_) => None,
            id => principal_id(id),
        },
        _ => None,
    }
}
