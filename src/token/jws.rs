//! Compact JWS signing with HMAC-SHA2.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use std::{fmt, str::FromStr};

use super::error::TokenError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    #[default]
    HS256,
    HS384,
    HS512,
}

impl SigningAlgorithm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            other => Err(format!("unsupported signing algorithm: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct JwsHeader {
    alg: String,
    typ: String,
}

pub(super) fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|e| TokenError::Encoding(e.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

pub(super) fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s)
        .map_err(|_| TokenError::invalid("invalid base64url encoding"))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::invalid(format!("invalid json: {e}")))
}

fn mac(alg: SigningAlgorithm, key: &[u8], input: &[u8]) -> Result<Vec<u8>, TokenError> {
    let tag = match alg {
        SigningAlgorithm::HS256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key)
                .map_err(|e| TokenError::Configuration(format!("signing key: {e}")))?;
            mac.update(input);
            mac.finalize().into_bytes().to_vec()
        }
        SigningAlgorithm::HS384 => {
            let mut mac = Hmac::<Sha384>::new_from_slice(key)
                .map_err(|e| TokenError::Configuration(format!("signing key: {e}")))?;
            mac.update(input);
            mac.finalize().into_bytes().to_vec()
        }
        SigningAlgorithm::HS512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key)
                .map_err(|e| TokenError::Configuration(format!("signing key: {e}")))?;
            mac.update(input);
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(tag)
}

// Constant-time comparison through `verify_slice`.
fn verify_mac(alg: SigningAlgorithm, key: &[u8], input: &[u8], tag: &[u8]) -> bool {
    match alg {
        SigningAlgorithm::HS256 => Hmac::<Sha256>::new_from_slice(key).is_ok_and(|mut mac| {
            mac.update(input);
            mac.verify_slice(tag).is_ok()
        }),
        SigningAlgorithm::HS384 => Hmac::<Sha384>::new_from_slice(key).is_ok_and(|mut mac| {
            mac.update(input);
            mac.verify_slice(tag).is_ok()
        }),
        SigningAlgorithm::HS512 => Hmac::<Sha512>::new_from_slice(key).is_ok_and(|mut mac| {
            mac.update(input);
            mac.verify_slice(tag).is_ok()
        }),
    }
}

/// Serialize and sign `claims` into `header.claims.signature`.
///
/// # Errors
///
/// Returns an error if the claims cannot be encoded or the key is rejected.
pub(super) fn sign<T: Serialize>(
    alg: SigningAlgorithm,
    key: &[u8],
    claims: &T,
) -> Result<String, TokenError> {
    let header = JwsHeader {
        alg: alg.as_str().to_string(),
        typ: "JWT".to_string(),
    };
    let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(claims)?);
    let signature = mac(alg, key, signing_input.as_bytes())?;
    Ok(format!(
        "{signing_input}.{}",
        Base64UrlUnpadded::encode_string(&signature)
    ))
}

/// Verify a compact JWS and decode its claims. Time claims are not checked here.
///
/// # Errors
///
/// Returns `TokenError::Invalid` for malformed tokens, algorithm mismatches and bad
/// signatures.
pub(super) fn verify<T: for<'de> Deserialize<'de>>(
    alg: SigningAlgorithm,
    key: &[u8],
    token: &str,
) -> Result<T, TokenError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::invalid("invalid token format"));
    };

    let header: JwsHeader = b64d_json(header_b64)?;
    if header.alg != alg.as_str() {
        return Err(TokenError::invalid(format!(
            "unexpected algorithm: {}",
            header.alg
        )));
    }

    let signature = Base64UrlUnpadded::decode_vec(sig_b64)
        .map_err(|_| TokenError::invalid("invalid signature encoding"))?;
    let signing_input = format!("{header_b64}.{claims_b64}");
    if !verify_mac(alg, key, signing_input.as_bytes(), &signature) {
        return Err(TokenError::invalid("invalid signature"));
    }

    b64d_json(claims_b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn sign_then_verify_each_algorithm() -> Result<(), TokenError> {
        for alg in [
            SigningAlgorithm::HS256,
            SigningAlgorithm::HS384,
            SigningAlgorithm::HS512,
        ] {
            let token = sign(alg, KEY, &json!({"sub": 1}))?;
            let claims: Value = verify(alg, KEY, &token)?;
            assert_eq!(claims, json!({"sub": 1}));
        }
        Ok(())
    }

    #[test]
    fn rejects_wrong_key() -> Result<(), TokenError> {
        let token = sign(SigningAlgorithm::HS256, KEY, &json!({"sub": 1}))?;
        let result: Result<Value, _> =
            verify(SigningAlgorithm::HS256, b"another-key-another-key-another!", &token);
        assert!(matches!(result, Err(TokenError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn rejects_algorithm_mismatch() -> Result<(), TokenError> {
        let token = sign(SigningAlgorithm::HS512, KEY, &json!({"sub": 1}))?;
        let result: Result<Value, _> = verify(SigningAlgorithm::HS256, KEY, &token);
        assert!(matches!(result, Err(TokenError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn rejects_extra_segments() -> Result<(), TokenError> {
        let token = sign(SigningAlgorithm::HS256, KEY, &json!({"sub": 1}))?;
        let result: Result<Value, _> =
            verify(SigningAlgorithm::HS256, KEY, &format!("{token}.extra"));
        assert!(matches!(result, Err(TokenError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn algorithm_parses_case_insensitively() {
        assert_eq!("hs384".parse::<SigningAlgorithm>(), Ok(SigningAlgorithm::HS384));
        assert!("RS256".parse::<SigningAlgorithm>().is_err());
    }
}
