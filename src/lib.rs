//! # xauth (Token, Credential & Account Lifecycle Core)
//!
//! `xauth` issues and verifies bearer tokens, resolves request credentials across
//! several authentication schemes, and runs the one-time-code workflows used for
//! account verification and password reset.
//!
//! ## Tokens
//!
//! Every token carries `iat`, `nbf`, `exp` and a `payload` claim. It is rendered
//! twice: a signed form (`normal`) and the same signed form wrapped in an
//! authenticated-encryption envelope (`encrypted`). Tokens are never stored; their
//! validity is a function of the embedded timestamps and the configured keys.
//!
//! ## Credential Resolution
//!
//! A single resolver accepts `Bearer`/`Token` headers, `Basic` headers, and
//! `username`/`password` form fields, in that order. Anything it cannot interpret
//! resolves to "no credentials" so another resolver may take over; a principal that
//! is resolved but inactive is always rejected.
//!
//! ## One-Time Codes
//!
//! Verification codes and temporary passwords are hashed before storage, expire on
//! a per-kind window and are cleared with a compare-and-clear write after a single
//! successful check. Expiry is checked before the code itself.

pub mod account;
pub mod api;
pub mod auth;
pub mod cli;
pub mod error;
pub mod hashing;
pub mod mail;
pub mod store;
pub mod token;

pub use error::ErrorKind;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }
}
