//! Claims codec: issue and decode signed (and optionally encrypted) tokens.
//!
//! Flow Overview: a payload and a `[nbf, exp)` window become a claims set, the claims
//! set is signed into the `normal` rendering, and the `normal` rendering is sealed
//! into the `encrypted` rendering. Decoding accepts either rendering, detected by its
//! segment count, and returns the payload only while `nbf <= now < exp`.

mod error;
mod jwe;
mod jws;

pub use error::TokenError;
pub use jws::SigningAlgorithm;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Claim key the payload is stored under.
pub const PAYLOAD_CLAIM: &str = "payload";

const MIN_SECRET_LEN: usize = 32;
const ENCRYPTION_KEY_LABEL: &[u8] = b"xauth token encryption v1";

/// Validity window a token is issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenWindow {
    /// Sign-in and post-verification tokens.
    General,
    Verification,
    PasswordReset,
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    secret: SecretString,
    encryption_secret: Option<SecretString>,
    algorithm: SigningAlgorithm,
    general_window: Duration,
    verification_window: Duration,
    password_reset_window: Duration,
}

impl TokenConfig {
    /// Defaults: HS256, 60 day general window, 1 hour verification window and
    /// 30 minute password-reset window.
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            encryption_secret: None,
            algorithm: SigningAlgorithm::default(),
            general_window: Duration::days(60),
            verification_window: Duration::hours(1),
            password_reset_window: Duration::minutes(30),
        }
    }

    #[must_use]
    pub fn with_encryption_secret(mut self, secret: SecretString) -> Self {
        self.encryption_secret = Some(secret);
        self
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_general_window(mut self, window: Duration) -> Self {
        self.general_window = window;
        self
    }

    #[must_use]
    pub fn with_verification_window(mut self, window: Duration) -> Self {
        self.verification_window = window;
        self
    }

    #[must_use]
    pub fn with_password_reset_window(mut self, window: Duration) -> Self {
        self.password_reset_window = window;
        self
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn window(&self, window: TokenWindow) -> Duration {
        match window {
            TokenWindow::General => self.general_window,
            TokenWindow::Verification => self.verification_window,
            TokenWindow::PasswordReset => self.password_reset_window,
        }
    }

    /// Reject key material and windows that could never produce a usable token.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` for a short secret or a non-positive window.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(TokenError::Configuration(format!(
                "token secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        for (name, window) in [
            ("general", self.general_window),
            ("verification", self.verification_window),
            ("password reset", self.password_reset_window),
        ] {
            if window <= Duration::zero() {
                return Err(TokenError::Configuration(format!(
                    "{name} token window must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// The claims set embedded in both renderings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    pub payload: Value,
}

/// Both renderings, as returned to clients.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct TokenPair {
    pub normal: String,
    pub encrypted: String,
}

#[derive(Clone, Debug)]
pub struct Token {
    claims: Claims,
    normal: String,
    encrypted: String,
}

impl Token {
    #[must_use]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.claims.payload
    }

    #[must_use]
    pub fn normal(&self) -> &str {
        &self.normal
    }

    #[must_use]
    pub fn encrypted(&self) -> &str {
        &self.encrypted
    }

    #[must_use]
    pub fn pair(&self) -> TokenPair {
        TokenPair {
            normal: self.normal.clone(),
            encrypted: self.encrypted.clone(),
        }
    }
}

pub struct TokenCodec {
    config: TokenConfig,
    encryption_key: [u8; 32],
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.config.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec, validating the configuration first.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the configuration is unusable.
    pub fn new(config: TokenConfig) -> Result<Self, TokenError> {
        config.validate()?;
        let encryption_key = derive_encryption_key(&config)?;
        Ok(Self {
            config,
            encryption_key,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue a token for `payload` with an explicit or default window.
    ///
    /// `not_before` defaults to now and `expiry` to `not_before` plus the general
    /// window.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if `not_before` is not earlier than `expiry`.
    pub fn issue<P: Serialize>(
        &self,
        payload: &P,
        not_before: Option<DateTime<Utc>>,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<Token, TokenError> {
        self.issue_at(payload, Utc::now(), not_before, expiry)
    }

    /// Issue a token valid from now for the given window.
    ///
    /// # Errors
    ///
    /// See [`TokenCodec::issue`].
    pub fn issue_for<P: Serialize>(
        &self,
        payload: &P,
        window: TokenWindow,
    ) -> Result<Token, TokenError> {
        let now = Utc::now();
        self.issue_at(payload, now, Some(now), Some(now + self.config.window(window)))
    }

    /// Issue with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`TokenCodec::issue`].
    #[instrument(skip(self, payload))]
    pub fn issue_at<P: Serialize>(
        &self,
        payload: &P,
        now: DateTime<Utc>,
        not_before: Option<DateTime<Utc>>,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<Token, TokenError> {
        let nbf = not_before.unwrap_or(now);
        let exp = expiry.unwrap_or(nbf + self.config.general_window);

        // Compared at claim precision so a sub-second window cannot slip through.
        if nbf.timestamp() >= exp.timestamp() {
            return Err(TokenError::Configuration(
                "expiration date must be a date later than activation date".to_string(),
            ));
        }

        let payload =
            serde_json::to_value(payload).map_err(|e| TokenError::Encoding(e.to_string()))?;
        let claims = Claims {
            iat: now.timestamp(),
            nbf: nbf.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
            payload,
        };

        let normal = jws::sign(self.config.algorithm, self.signing_key(), &claims)?;
        let encrypted = jwe::seal(&self.encryption_key, &normal)?;

        Ok(Token {
            claims,
            normal,
            encrypted,
        })
    }

    /// Verify either rendering and return its payload.
    ///
    /// # Errors
    ///
    /// Returns `Expired`, `NotYetValid` or `Invalid` depending on what failed.
    pub fn decode(&self, raw: &str) -> Result<Value, TokenError> {
        self.decode_at(raw, Utc::now())
    }

    /// Verify either rendering and deserialize its payload.
    ///
    /// # Errors
    ///
    /// See [`TokenCodec::decode`]; a payload of the wrong shape is `Invalid`.
    pub fn decode_as<T: DeserializeOwned>(&self, raw: &str) -> Result<T, TokenError> {
        let payload = self.decode(raw)?;
        serde_json::from_value(payload).map_err(|e| TokenError::invalid(e.to_string()))
    }

    /// Verify with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`TokenCodec::decode`].
    pub fn decode_at(&self, raw: &str, now: DateTime<Utc>) -> Result<Value, TokenError> {
        Ok(self.claims_at(raw, now)?.payload)
    }

    fn claims_at(&self, raw: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let raw = raw.trim();
        let signed = match raw.split('.').count() {
            3 => raw.to_string(),
            5 => jwe::open(&self.encryption_key, raw)?,
            _ => return Err(TokenError::invalid("unrecognized token format")),
        };

        let claims: Claims = jws::verify(self.config.algorithm, self.signing_key(), &signed)?;

        let now = now.timestamp();
        if claims.exp <= now {
            debug!(exp = claims.exp, now, "token expired");
            return Err(TokenError::Expired);
        }
        if claims.nbf > now {
            debug!(nbf = claims.nbf, now, "token not yet valid");
            return Err(TokenError::NotYetValid);
        }

        Ok(claims)
    }

    fn signing_key(&self) -> &[u8] {
        self.config.secret.expose_secret().as_bytes()
    }
}

fn derive_encryption_key(config: &TokenConfig) -> Result<[u8; 32], TokenError> {
    if let Some(secret) = &config.encryption_secret {
        return Ok(Sha256::digest(secret.expose_secret().as_bytes()).into());
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(config.secret.expose_secret().as_bytes())
        .map_err(|e| TokenError::Configuration(format!("encryption key: {e}")))?;
    mac.update(ENCRYPTION_KEY_LABEL);
    Ok(mac.finalize().into_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-secret-test-secret-test-secret!";

    fn codec() -> Result<TokenCodec, TokenError> {
        TokenCodec::new(TokenConfig::new(SecretString::from(SECRET)))
    }

    fn tamper(token: &str) -> String {
        // Flip a character in the middle of the longest segment.
        let mut offset = 0;
        let mut longest = (0, 0);
        for segment in token.split('.') {
            if segment.len() > longest.1 {
                longest = (offset, segment.len());
            }
            offset += segment.len() + 1;
        }
        let index = longest.0 + longest.1 / 2;
        let mut bytes = token.as_bytes().to_vec();
        if let Some(byte) = bytes.get_mut(index) {
            *byte = if *byte == b'A' { b'B' } else { b'A' };
        }
        String::from_utf8(bytes).unwrap_or_default()
    }

    #[test]
    fn tokens_contain_both_renderings() -> Result<(), TokenError> {
        let token = codec()?.issue(&1, None, None)?;
        assert_eq!(token.normal().split('.').count(), 3);
        assert_eq!(token.encrypted().split('.').count(), 5);
        assert_eq!(
            token.pair(),
            TokenPair {
                normal: token.normal().to_string(),
                encrypted: token.encrypted().to_string(),
            }
        );
        Ok(())
    }

    #[test]
    fn default_window_starts_now_and_lasts_sixty_days() -> Result<(), TokenError> {
        let now = Utc::now();
        let token = codec()?.issue_at(&1, now, None, None)?;
        let claims = token.claims();
        assert_eq!(claims.iat, now.timestamp());
        assert_eq!(claims.nbf, now.timestamp());
        assert_eq!(claims.exp, (now + Duration::days(60)).timestamp());
        assert_eq!(claims.payload, json!(1));
        Ok(())
    }

    #[test]
    fn default_expiry_follows_activation_date() -> Result<(), TokenError> {
        let now = Utc::now();
        let activation = now + Duration::minutes(5);
        let token = codec()?.issue_at(&1, now, Some(activation), None)?;
        assert_eq!(token.claims().nbf, activation.timestamp());
        assert_eq!(
            token.claims().exp,
            (activation + Duration::days(60)).timestamp()
        );
        Ok(())
    }

    #[test]
    fn not_before_at_or_after_expiry_is_a_configuration_fault() -> Result<(), TokenError> {
        let codec = codec()?;
        let now = Utc::now();
        let result = codec.issue_at(
            &1,
            now,
            Some(now + Duration::days(5)),
            Some(now + Duration::minutes(5)),
        );
        assert!(matches!(result, Err(TokenError::Configuration(_))));

        let result = codec.issue_at(&1, now, Some(now), Some(now));
        assert!(matches!(result, Err(TokenError::Configuration(_))));
        Ok(())
    }

    #[test]
    fn decode_returns_payload_for_both_renderings() -> Result<(), TokenError> {
        let codec = codec()?;
        let payload = json!({"id": 7, "username": "alice"});
        let token = codec.issue(&payload, None, None)?;
        assert_eq!(codec.decode(token.normal())?, payload);
        assert_eq!(codec.decode(token.encrypted())?, payload);
        Ok(())
    }

    #[test]
    fn decode_window_is_half_open() -> Result<(), TokenError> {
        let codec = codec()?;
        let now = Utc::now();
        let nbf = now + Duration::minutes(10);
        let exp = now + Duration::minutes(20);
        let token = codec.issue_at(&"p", now, Some(nbf), Some(exp))?;

        for raw in [token.normal(), token.encrypted()] {
            assert!(matches!(
                codec.decode_at(raw, now),
                Err(TokenError::NotYetValid)
            ));
            assert_eq!(codec.decode_at(raw, nbf)?, json!("p"));
            assert_eq!(codec.decode_at(raw, exp - Duration::seconds(1))?, json!("p"));
            assert!(matches!(codec.decode_at(raw, exp), Err(TokenError::Expired)));
        }
        Ok(())
    }

    #[test]
    fn tampered_renderings_are_invalid() -> Result<(), TokenError> {
        let codec = codec()?;
        let token = codec.issue(&1, None, None)?;
        for raw in [token.normal(), token.encrypted()] {
            let tampered = tamper(raw);
            assert_ne!(tampered, raw);
            assert!(matches!(
                codec.decode(&tampered),
                Err(TokenError::Invalid(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn tokens_from_another_secret_are_invalid() -> Result<(), TokenError> {
        let other = TokenCodec::new(TokenConfig::new(SecretString::from(
            "another-secret-another-secret-another",
        )))?;
        let token = other.issue(&1, None, None)?;
        let codec = codec()?;
        assert!(matches!(
            codec.decode(token.normal()),
            Err(TokenError::Invalid(_))
        ));
        assert!(matches!(
            codec.decode(token.encrypted()),
            Err(TokenError::Invalid(_))
        ));
        Ok(())
    }

    #[test]
    fn garbage_is_invalid() -> Result<(), TokenError> {
        let codec = codec()?;
        assert!(matches!(codec.decode("nope"), Err(TokenError::Invalid(_))));
        assert!(matches!(codec.decode("a.b"), Err(TokenError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn issue_for_uses_the_selected_window() -> Result<(), TokenError> {
        let codec = codec()?;
        let token = codec.issue_for(&1, TokenWindow::PasswordReset)?;
        let claims = token.claims();
        assert_eq!(claims.exp - claims.nbf, 30 * 60);

        let token = codec.issue_for(&1, TokenWindow::Verification)?;
        let claims = token.claims();
        assert_eq!(claims.exp - claims.nbf, 60 * 60);
        Ok(())
    }

    #[test]
    fn hs512_codec_round_trips() -> Result<(), TokenError> {
        let codec = TokenCodec::new(
            TokenConfig::new(SecretString::from(SECRET)).with_algorithm(SigningAlgorithm::HS512),
        )?;
        let token = codec.issue(&json!({"id": 3}), None, None)?;
        assert_eq!(codec.decode(token.encrypted())?, json!({"id": 3}));
        Ok(())
    }

    #[test]
    fn separate_encryption_secret_is_required_to_open() -> Result<(), TokenError> {
        let sealed_with = TokenCodec::new(
            TokenConfig::new(SecretString::from(SECRET))
                .with_encryption_secret(SecretString::from("outer-key")),
        )?;
        let token = sealed_with.issue(&1, None, None)?;
        assert!(matches!(
            codec()?.decode(token.encrypted()),
            Err(TokenError::Invalid(_))
        ));
        // The signed rendering only depends on the signing secret.
        assert_eq!(codec()?.decode(token.normal())?, json!(1));
        Ok(())
    }

    #[test]
    fn config_validation_rejects_short_secret_and_empty_window() {
        let short = TokenCodec::new(TokenConfig::new(SecretString::from("short")));
        assert!(matches!(short, Err(TokenError::Configuration(_))));

        let zero = TokenCodec::new(
            TokenConfig::new(SecretString::from(SECRET)).with_verification_window(Duration::zero()),
        );
        assert!(matches!(zero, Err(TokenError::Configuration(_))));
    }

    #[test]
    fn decode_as_deserializes_payload() -> Result<(), TokenError> {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Subject {
            id: i64,
        }
        let codec = codec()?;
        let token = codec.issue(&Subject { id: 9 }, None, None)?;
        assert_eq!(codec.decode_as::<Subject>(token.normal())?, Subject { id: 9 });
        Ok(())
    }
}
