//! Authenticated-encryption envelope for signed tokens.
//!
//! Output is a five-part compact serialization with direct key agreement:
//! `protected..nonce.ciphertext.tag`. The protected header is bound as AAD.

use base64ct::{Base64UrlUnpadded, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::error::TokenError;
use super::jws::{b64d_json, b64e_json};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const ENC: &str = "C20P";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct JweHeader {
    alg: String,
    enc: String,
    cty: String,
}

/// Encrypt a signed token under a 32-byte key.
///
/// # Errors
///
/// Returns an error if the header cannot be encoded or encryption fails.
pub(super) fn seal(key: &[u8; 32], signed: &str) -> Result<String, TokenError> {
    let header = JweHeader {
        alg: "dir".to_string(),
        enc: ENC.to_string(),
        cty: "JWT".to_string(),
    };
    let protected = b64e_json(&header)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: signed.as_bytes(),
                aad: protected.as_bytes(),
            },
        )
        .map_err(|e| TokenError::Encoding(format!("encryption failure: {e}")))?;

    let split = sealed.len().saturating_sub(TAG_LEN);
    let (ciphertext, tag) = sealed.split_at(split);

    Ok(format!(
        "{protected}..{}.{}.{}",
        Base64UrlUnpadded::encode_string(&nonce_bytes),
        Base64UrlUnpadded::encode_string(ciphertext),
        Base64UrlUnpadded::encode_string(tag),
    ))
}

/// Decrypt an envelope back into the inner signed token.
///
/// # Errors
///
/// Returns `TokenError::Invalid` for malformed envelopes and failed decryption.
pub(super) fn open(key: &[u8; 32], token: &str) -> Result<String, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    let &[protected, encrypted_key, nonce_b64, ciphertext_b64, tag_b64] = parts.as_slice() else {
        return Err(TokenError::invalid("invalid envelope format"));
    };
    if !encrypted_key.is_empty() {
        return Err(TokenError::invalid("unexpected encrypted key"));
    }

    let header: JweHeader = b64d_json(protected)?;
    if header.alg != "dir" || header.enc != ENC {
        return Err(TokenError::invalid(format!(
            "unsupported envelope: {}/{}",
            header.alg, header.enc
        )));
    }

    let decode = |value: &str| {
        Base64UrlUnpadded::decode_vec(value)
            .map_err(|_| TokenError::invalid("invalid envelope encoding"))
    };
    let nonce_bytes = decode(nonce_b64)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(TokenError::invalid("invalid nonce length"));
    }
    let mut sealed = decode(ciphertext_b64)?;
    sealed.extend_from_slice(&decode(tag_b64)?);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &sealed,
                aad: protected.as_bytes(),
            },
        )
        .map_err(|_| TokenError::invalid("decryption failure"))?;

    String::from_utf8(plaintext).map_err(|_| TokenError::invalid("envelope is not utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [42u8; 32];

    #[test]
    fn seal_open_roundtrip() -> Result<(), TokenError> {
        let sealed = seal(&KEY, "a.b.c")?;
        assert_eq!(sealed.split('.').count(), 5);
        assert!(!sealed.contains("a.b.c"));
        assert_eq!(open(&KEY, &sealed)?, "a.b.c");
        Ok(())
    }

    #[test]
    fn nonce_differs_between_seals() -> Result<(), TokenError> {
        assert_ne!(seal(&KEY, "a.b.c")?, seal(&KEY, "a.b.c")?);
        Ok(())
    }

    #[test]
    fn open_fails_with_wrong_key() -> Result<(), TokenError> {
        let sealed = seal(&KEY, "a.b.c")?;
        let result = open(&[7u8; 32], &sealed);
        assert!(matches!(result, Err(TokenError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn open_rejects_three_part_tokens() {
        let result = open(&KEY, "a.b.c");
        assert!(matches!(result, Err(TokenError::Invalid(_))));
    }
}
