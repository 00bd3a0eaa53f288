//! Verification codes and temporary passwords.
//!
//! Both workflows share one shape: `request` stores the hash of a fresh code with its
//! generation time and returns a short-lived token; the matching check rejects an
//! expired code before comparing it, then claims the code with a compare-and-clear
//! write, applies its side effect and returns a fresh general-purpose token. A side
//! effect that fails to persist hands the claimed code back.

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, Rng};
use secrecy::SecretString;
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use super::{
    AccountError, Accounts, CodeKind, IssuedCode, PasswordResetType, Principal, PrincipalField,
};
use crate::{
    error::ErrorKind,
    hashing::HashError,
    mail::Mailer,
    store::{MetadataStore, StoreError},
    token::{Token, TokenCodec, TokenError, TokenWindow},
};

const DIGITS: &str = "0123456789";
const ALPHANUMERIC: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const DEFAULT_LENGTH: std::ops::RangeInclusive<usize> = 8..=10;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("no outstanding code for this principal")]
    PrincipalNotFound,
    #[error("code expired")]
    CodeExpired,
    #[error("incorrect code")]
    CodeIncorrect,
    #[error("incorrect password")]
    InvalidCredentials,
    #[error("invalid code policy: {0}")]
    Configuration(String),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Hash(#[from] HashError),
}

impl LifecycleError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PrincipalNotFound => ErrorKind::PrincipalNotFound,
            Self::CodeExpired => ErrorKind::CodeExpired,
            Self::CodeIncorrect => ErrorKind::CodeIncorrect,
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::Configuration(_) => ErrorKind::ConfigurationFault,
            Self::Token(err) => err.kind(),
            Self::Account(err) => err.kind(),
            Self::Store(err) => err.kind(),
            Self::Hash(err) => err.kind(),
        }
    }
}

/// Alphabet, length and expiry of one code kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodePolicy {
    alphabet: Vec<char>,
    length: Option<usize>,
    window: Option<Duration>,
}

impl CodePolicy {
    /// Digits only, random length in 8..=10.
    #[must_use]
    pub fn numeric() -> Self {
        Self {
            alphabet: DIGITS.chars().collect(),
            length: None,
            window: None,
        }
    }

    /// ASCII letters and digits, random length in 8..=10.
    #[must_use]
    pub fn alphanumeric() -> Self {
        Self {
            alphabet: ALPHANUMERIC.chars().collect(),
            length: None,
            window: None,
        }
    }

    #[must_use]
    pub fn with_alphabet(mut self, alphabet: &str) -> Self {
        self.alphabet = alphabet.chars().collect();
        self
    }

    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Expiry window; without one the codec's window for the kind applies.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// # Errors
    ///
    /// Returns `LifecycleError::Configuration` for an empty alphabet, a zero length or
    /// a non-positive window.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.alphabet.is_empty() {
            return Err(LifecycleError::Configuration(
                "code alphabet must not be empty".to_string(),
            ));
        }
        if self.length == Some(0) {
            return Err(LifecycleError::Configuration(
                "code length must be positive".to_string(),
            ));
        }
        if self.window.is_some_and(|window| window <= Duration::zero()) {
            return Err(LifecycleError::Configuration(
                "code window must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Draw a fresh code from the OS RNG.
    ///
    /// # Errors
    ///
    /// See [`CodePolicy::validate`].
    pub fn generate(&self) -> Result<String, LifecycleError> {
        self.validate()?;
        let mut rng = OsRng;
        let length = self
            .length
            .unwrap_or_else(|| rng.gen_range(DEFAULT_LENGTH));
        Ok((0..length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect())
    }
}

#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    verification: CodePolicy,
    password_reset: CodePolicy,
    newbie_window: Duration,
}

impl LifecycleConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            verification: CodePolicy::numeric(),
            password_reset: CodePolicy::alphanumeric(),
            newbie_window: Duration::days(1),
        }
    }

    #[must_use]
    pub fn with_verification(mut self, policy: CodePolicy) -> Self {
        self.verification = policy;
        self
    }

    #[must_use]
    pub fn with_password_reset(mut self, policy: CodePolicy) -> Self {
        self.password_reset = policy;
        self
    }

    #[must_use]
    pub fn with_newbie_window(mut self, window: Duration) -> Self {
        self.newbie_window = window;
        self
    }

    #[must_use]
    pub fn policy(&self, kind: CodeKind) -> &CodePolicy {
        match kind {
            CodeKind::Verification => &self.verification,
            CodeKind::PasswordReset => &self.password_reset,
        }
    }

    #[must_use]
    pub fn newbie_window(&self) -> Duration {
        self.newbie_window
    }

    /// # Errors
    ///
    /// Returns the first invalid code policy.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        self.verification.validate()?;
        self.password_reset.validate()
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives verification and password-reset state transitions.
#[derive(Clone)]
pub struct AccountLifecycle {
    accounts: Accounts,
    metadata: Arc<dyn MetadataStore>,
    codec: Arc<TokenCodec>,
    config: LifecycleConfig,
    mailer: Option<Mailer>,
}

impl fmt::Debug for AccountLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountLifecycle")
            .field("config", &self.config)
            .field("mailer", &self.mailer.is_some())
            .finish_non_exhaustive()
    }
}

impl AccountLifecycle {
    /// # Errors
    ///
    /// Returns `LifecycleError::Configuration` if a code policy is invalid.
    pub fn new(
        accounts: Accounts,
        metadata: Arc<dyn MetadataStore>,
        codec: Arc<TokenCodec>,
        config: LifecycleConfig,
    ) -> Result<Self, LifecycleError> {
        config.validate()?;
        Ok(Self {
            accounts,
            metadata,
            codec,
            config,
            mailer: None,
        })
    }

    /// Mail each requested code to the principal.
    #[must_use]
    pub fn with_mailer(mut self, mailer: Mailer) -> Self {
        self.mailer = Some(mailer);
        self
    }

    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Expiry window of `kind`.
    #[must_use]
    pub fn window(&self, kind: CodeKind) -> Duration {
        self.config
            .policy(kind)
            .window
            .unwrap_or_else(|| self.codec.config().window(kind.token_window()))
    }

    /// Issue a new code of `kind`, replacing any outstanding one.
    ///
    /// Returns the kind-window token and the raw code, which is never persisted.
    ///
    /// # Errors
    ///
    /// Returns a hashing, storage or token error.
    pub async fn request(
        &self,
        principal: &Principal,
        kind: CodeKind,
    ) -> Result<(Token, String), LifecycleError> {
        self.request_at(principal, kind, Utc::now()).await
    }

    /// [`AccountLifecycle::request`] with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`AccountLifecycle::request`].
    #[instrument(skip(self, principal), fields(id = principal.id))]
    pub async fn request_at(
        &self,
        principal: &Principal,
        kind: CodeKind,
        now: DateTime<Utc>,
    ) -> Result<(Token, String), LifecycleError> {
        let code = self.config.policy(kind).generate()?;
        let digest = self.accounts.hasher().hash(&code)?;
        self.metadata
            .store_code(principal.id, kind, &digest, now)
            .await?;

        if kind == CodeKind::PasswordReset {
            self.metadata
                .open_reset_log(principal.id, PasswordResetType::Reset, now)
                .await?;
        }

        let window = self.window(kind);
        let token = self.issue(principal, now, window)?;

        if let Some(mailer) = &self.mailer {
            match kind {
                CodeKind::Verification => mailer.send_verification(
                    principal,
                    &code,
                    window,
                    principal.is_newbie_at(now, self.config.newbie_window),
                ),
                CodeKind::PasswordReset => mailer.send_password_reset(principal, &code, window),
            }
        }

        info!(%kind, "code issued");
        Ok((token, code))
    }

    /// Mark the principal verified if `code` matches the outstanding verification code.
    ///
    /// # Errors
    ///
    /// `PrincipalNotFound` without metadata, `CodeExpired` past the window or with no
    /// outstanding code, `CodeIncorrect` on mismatch.
    pub async fn verify(
        &self,
        principal: &mut Principal,
        code: &str,
    ) -> Result<Token, LifecycleError> {
        self.verify_at(principal, code, Utc::now()).await
    }

    /// [`AccountLifecycle::verify`] with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`AccountLifecycle::verify`].
    #[instrument(skip(self, principal, code), fields(id = principal.id))]
    pub async fn verify_at(
        &self,
        principal: &mut Principal,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Token, LifecycleError> {
        let claimed = self
            .consume(principal.id, CodeKind::Verification, code, now)
            .await?;

        principal.is_verified = true;
        let saved = self
            .accounts
            .save(principal, Some(&[PrincipalField::IsVerified]))
            .await
            .map_err(LifecycleError::from);
        self.release_on_failure(principal.id, CodeKind::Verification, &claimed, saved)
            .await?;

        info!("principal verified");
        self.general_token(principal, now)
    }

    /// Replace the password if `temporary_password` matches the outstanding one.
    ///
    /// # Errors
    ///
    /// As [`AccountLifecycle::verify`].
    pub async fn reset_password(
        &self,
        principal: &mut Principal,
        temporary_password: &str,
        new_password: SecretString,
    ) -> Result<Token, LifecycleError> {
        self.reset_password_at(principal, temporary_password, new_password, Utc::now())
            .await
    }

    /// [`AccountLifecycle::reset_password`] with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`AccountLifecycle::reset_password`].
    #[instrument(skip(self, principal, temporary_password, new_password), fields(id = principal.id))]
    pub async fn reset_password_at(
        &self,
        principal: &mut Principal,
        temporary_password: &str,
        new_password: SecretString,
        now: DateTime<Utc>,
    ) -> Result<Token, LifecycleError> {
        let claimed = self
            .consume(principal.id, CodeKind::PasswordReset, temporary_password, now)
            .await?;

        principal.set_password(new_password);
        let saved = self
            .accounts
            .save(principal, Some(&[PrincipalField::Password]))
            .await
            .map_err(LifecycleError::from);
        self.release_on_failure(principal.id, CodeKind::PasswordReset, &claimed, saved)
            .await?;
        self.log_password_change(principal.id, PasswordResetType::Reset, now)
            .await?;
        self.general_token(principal, now)
    }

    /// Authenticated password change with the current password.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` if `old_password` does not match.
    #[instrument(skip(self, principal, old_password, new_password), fields(id = principal.id))]
    pub async fn change_password(
        &self,
        principal: &mut Principal,
        old_password: &SecretString,
        new_password: SecretString,
    ) -> Result<Token, LifecycleError> {
        if !self.accounts.check_secret_password(principal, old_password) {
            return Err(LifecycleError::InvalidCredentials);
        }

        let now = Utc::now();
        self.replace_password(principal, new_password, PasswordResetType::Change, now)
            .await?;
        self.general_token(principal, now)
    }

    async fn replace_password(
        &self,
        principal: &mut Principal,
        new_password: SecretString,
        kind: PasswordResetType,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        principal.set_password(new_password);
        self.accounts
            .save(principal, Some(&[PrincipalField::Password]))
            .await?;
        self.log_password_change(principal.id, kind, now).await
    }

    async fn log_password_change(
        &self,
        principal_id: i64,
        kind: PasswordResetType,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        self.metadata
            .close_reset_log(principal_id, kind, now)
            .await?;
        info!(kind = kind.as_str(), "password replaced");
        Ok(())
    }

    /// Check and claim the outstanding code of `kind`, returning what was claimed.
    async fn consume(
        &self,
        principal_id: i64,
        kind: CodeKind,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedCode, LifecycleError> {
        let metadata = self
            .metadata
            .metadata(principal_id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;

        let Some(issued) = metadata.code(kind) else {
            debug!(%kind, "no outstanding code");
            return Err(LifecycleError::CodeExpired);
        };

        if issued.generated_at + self.window(kind) <= now {
            return Err(LifecycleError::CodeExpired);
        }

        if !self.accounts.hasher().verify(&issued.digest, raw) {
            return Err(LifecycleError::CodeIncorrect);
        }

        if !self
            .metadata
            .clear_code(principal_id, kind, &issued.digest)
            .await?
        {
            debug!(%kind, "code claimed by a concurrent check");
            return Err(LifecycleError::CodeIncorrect);
        }

        Ok(issued.clone())
    }

    /// Hand a claimed code back when the write it guarded failed, so it can be retried.
    async fn release_on_failure(
        &self,
        principal_id: i64,
        kind: CodeKind,
        claimed: &IssuedCode,
        outcome: Result<(), LifecycleError>,
    ) -> Result<(), LifecycleError> {
        let Err(err) = outcome else {
            return Ok(());
        };
        match self.metadata.restore_code(principal_id, kind, claimed).await {
            Ok(true) => debug!(%kind, "claimed code restored"),
            Ok(false) => debug!(%kind, "claimed code superseded, not restored"),
            Err(restore_err) => error!(%kind, "failed to restore claimed code: {restore_err}"),
        }
        Err(err)
    }

    fn issue(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Token, LifecycleError> {
        self.codec
            .issue_at(&principal.projection(), now, Some(now), Some(now + window))
            .map_err(|err| {
                if let TokenError::Configuration(detail) = &err {
                    error!("token configuration fault: {detail}");
                }
                LifecycleError::Token(err)
            })
    }

    fn general_token(&self, principal: &Principal, now: DateTime<Utc>) -> Result<Token, LifecycleError> {
        self.issue(
            principal,
            now,
            self.codec.config().window(TokenWindow::General),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{AccessLog, Metadata, NewPrincipal, PasswordResetLog, Provider},
        hashing::Argon2Hasher,
        mail::{MailConfig, MailQueue},
        store::{MemoryStore, PrincipalStore},
        token::TokenConfig,
    };
    use serde_json::Value;

    const SECRET: &str = "lifecycle-secret-lifecycle-secret-000";

    struct Fixture {
        accounts: Accounts,
        store: Arc<MemoryStore>,
        hasher: Arc<Argon2Hasher>,
        codec: Arc<TokenCodec>,
    }

    fn fixture() -> Result<Fixture, LifecycleError> {
        let store = Arc::new(MemoryStore::new());
        let hasher = Arc::new(Argon2Hasher::new().with_params(1024, 1, 1)?);
        let codec = Arc::new(TokenCodec::new(TokenConfig::new(SecretString::from(SECRET)))?);
        Ok(Fixture {
            accounts: Accounts::new(store.clone(), hasher.clone()),
            store,
            hasher,
            codec,
        })
    }

    fn lifecycle(fixture: &Fixture, config: LifecycleConfig) -> Result<AccountLifecycle, LifecycleError> {
        AccountLifecycle::new(
            fixture.accounts.clone(),
            fixture.store.clone(),
            fixture.codec.clone(),
            config,
        )
    }

    async fn jane(fixture: &Fixture) -> Result<Principal, LifecycleError> {
        Ok(fixture
            .accounts
            .create_user(
                NewPrincipal::new("jane@example.com").with_password(SecretString::from("old-pw")),
            )
            .await?)
    }

    #[test]
    fn default_codes_follow_policy() -> Result<(), LifecycleError> {
        for _ in 0..50 {
            let code = CodePolicy::numeric().generate()?;
            assert!((8..=10).contains(&code.len()));
            assert!(code.chars().all(|c| c.is_ascii_digit()));

            let code = CodePolicy::alphanumeric().generate()?;
            assert!((8..=10).contains(&code.len()));
            assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        }
        let code = CodePolicy::numeric().with_length(6).generate()?;
        assert_eq!(code.len(), 6);
        Ok(())
    }

    #[test]
    fn invalid_policies_are_rejected() {
        assert!(matches!(
            CodePolicy::numeric().with_alphabet("").generate(),
            Err(LifecycleError::Configuration(_))
        ));
        assert!(matches!(
            CodePolicy::numeric().with_length(0).validate(),
            Err(LifecycleError::Configuration(_))
        ));
        assert!(matches!(
            CodePolicy::numeric().with_window(Duration::zero()).validate(),
            Err(LifecycleError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn request_stores_digest_and_issues_window_token() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let lifecycle = lifecycle(&fixture, LifecycleConfig::new())?;
        let jane = jane(&fixture).await?;

        let (token, code) = lifecycle.request(&jane, CodeKind::Verification).await?;

        let metadata = fixture
            .store
            .metadata(jane.id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;
        let issued = metadata
            .code(CodeKind::Verification)
            .ok_or(LifecycleError::CodeExpired)?;
        assert_ne!(issued.digest, code);
        assert!(metadata.temporary_password.is_none());

        let claims = token.claims();
        assert_eq!(claims.exp - claims.nbf, 60 * 60);
        let payload: Value = fixture.codec.decode(token.normal())?;
        assert_eq!(payload["id"], Value::from(jane.id));
        assert_eq!(payload["is_verified"], Value::Bool(false));
        Ok(())
    }

    #[tokio::test]
    async fn verify_marks_principal_and_clears_code() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let lifecycle = lifecycle(&fixture, LifecycleConfig::new())?;
        let mut jane = jane(&fixture).await?;
        assert!(!jane.is_verified);

        let (_, code) = lifecycle.request(&jane, CodeKind::Verification).await?;
        let token = lifecycle.verify(&mut jane, &code).await?;

        assert!(jane.is_verified);
        let claims = token.claims();
        assert_eq!(claims.exp - claims.nbf, 60 * 24 * 60 * 60);

        let stored = fixture
            .accounts
            .store()
            .find_by_id(jane.id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;
        assert!(stored.is_verified);
        assert!(fixture.accounts.check_password(&stored, "old-pw"));

        let metadata = fixture
            .store
            .metadata(jane.id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;
        assert!(metadata.verification_code.is_none());

        let replay = lifecycle.verify(&mut jane, &code).await;
        assert!(matches!(replay, Err(LifecycleError::CodeExpired)));
        Ok(())
    }

    #[tokio::test]
    async fn expiry_is_checked_before_the_code() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let lifecycle = lifecycle(&fixture, LifecycleConfig::new())?;
        let mut jane = jane(&fixture).await?;

        let issued_at = Utc::now() - Duration::hours(2);
        let (_, code) = lifecycle
            .request_at(&jane, CodeKind::Verification, issued_at)
            .await?;

        let correct = lifecycle.verify(&mut jane, &code).await;
        assert!(matches!(correct, Err(LifecycleError::CodeExpired)));
        let wrong = lifecycle.verify(&mut jane, "nope").await;
        assert!(matches!(wrong, Err(LifecycleError::CodeExpired)));
        assert!(!jane.is_verified);
        Ok(())
    }

    #[tokio::test]
    async fn window_boundary_is_exclusive() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let config = LifecycleConfig::new()
            .with_verification(CodePolicy::numeric().with_window(Duration::minutes(10)));
        let lifecycle = lifecycle(&fixture, config)?;
        let mut jane = jane(&fixture).await?;

        let issued_at = Utc::now();
        let (_, code) = lifecycle
            .request_at(&jane, CodeKind::Verification, issued_at)
            .await?;

        let at_boundary = lifecycle
            .verify_at(&mut jane, &code, issued_at + Duration::minutes(10))
            .await;
        assert!(matches!(at_boundary, Err(LifecycleError::CodeExpired)));

        lifecycle
            .verify_at(&mut jane, &code, issued_at + Duration::minutes(9))
            .await?;
        assert!(jane.is_verified);
        Ok(())
    }

    #[tokio::test]
    async fn incorrect_code_keeps_it_outstanding() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let lifecycle = lifecycle(&fixture, LifecycleConfig::new())?;
        let mut jane = jane(&fixture).await?;

        let (_, code) = lifecycle.request(&jane, CodeKind::Verification).await?;
        let wrong = lifecycle.verify(&mut jane, "not-the-code").await;
        assert!(matches!(wrong, Err(LifecycleError::CodeIncorrect)));

        lifecycle.verify(&mut jane, &code).await?;
        Ok(())
    }

    #[tokio::test]
    async fn check_without_metadata_is_not_found() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let lifecycle = lifecycle(&fixture, LifecycleConfig::new())?;
        let mut jane = jane(&fixture).await?;

        let result = lifecycle.verify(&mut jane, "12345678").await;
        assert!(matches!(result, Err(LifecycleError::PrincipalNotFound)));
        assert_eq!(
            LifecycleError::PrincipalNotFound.kind(),
            ErrorKind::PrincipalNotFound
        );
        Ok(())
    }

    #[tokio::test]
    async fn newer_request_replaces_outstanding_code() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let lifecycle = lifecycle(&fixture, LifecycleConfig::new())?;
        let mut jane = jane(&fixture).await?;

        let (_, first) = lifecycle.request(&jane, CodeKind::PasswordReset).await?;
        let (_, second) = lifecycle.request(&jane, CodeKind::PasswordReset).await?;

        if first != second {
            let stale = lifecycle
                .reset_password(&mut jane, &first, SecretString::from("new-pw"))
                .await;
            assert!(matches!(stale, Err(LifecycleError::CodeIncorrect)));
        }
        lifecycle
            .reset_password(&mut jane, &second, SecretString::from("new-pw"))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn reset_replaces_password_and_logs_it() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let lifecycle = lifecycle(&fixture, LifecycleConfig::new())?;
        let mut jane = jane(&fixture).await?;

        let (token, temporary) = lifecycle.request(&jane, CodeKind::PasswordReset).await?;
        let claims = token.claims();
        assert_eq!(claims.exp - claims.nbf, 30 * 60);
        assert!(temporary.chars().all(|c| c.is_ascii_alphanumeric()));

        lifecycle
            .reset_password(&mut jane, &temporary, SecretString::from("new-pw"))
            .await?;

        let stored = fixture
            .accounts
            .store()
            .find_by_id(jane.id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;
        assert!(fixture.accounts.check_password(&stored, "new-pw"));
        assert!(!fixture.accounts.check_password(&stored, "old-pw"));

        let logs = fixture.store.reset_logs(jane.id).await?;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, PasswordResetType::Reset);
        assert!(logs[0].change_time.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn change_password_requires_old_password() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let lifecycle = lifecycle(&fixture, LifecycleConfig::new())?;
        let mut jane = jane(&fixture).await?;

        let wrong = lifecycle
            .change_password(
                &mut jane,
                &SecretString::from("guess"),
                SecretString::from("new-pw"),
            )
            .await;
        assert!(matches!(wrong, Err(LifecycleError::InvalidCredentials)));

        lifecycle
            .change_password(
                &mut jane,
                &SecretString::from("old-pw"),
                SecretString::from("new-pw"),
            )
            .await?;
        let logs = fixture.store.reset_logs(jane.id).await?;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, PasswordResetType::Change);
        Ok(())
    }

    #[tokio::test]
    async fn requests_are_mailed_with_welcome_for_newbies() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let (queue, mut rx) = MailQueue::channel();
        let lifecycle = lifecycle(&fixture, LifecycleConfig::new())?
            .with_mailer(Mailer::new(queue, MailConfig::new("Xently", "no-reply@xently.dev")));
        let jane = jane(&fixture).await?;

        let (_, code) = lifecycle.request(&jane, CodeKind::Verification).await?;
        let mail = rx.recv().await.ok_or(LifecycleError::PrincipalNotFound)?;
        assert!(mail.plain_body.contains(&code));
        assert!(mail.plain_body.contains("Welcome to Xently"));

        let later = Utc::now() + Duration::days(2);
        lifecycle
            .request_at(&jane, CodeKind::Verification, later)
            .await?;
        let mail = rx.recv().await.ok_or(LifecycleError::PrincipalNotFound)?;
        assert!(!mail.plain_body.contains("Welcome"));
        Ok(())
    }

    #[tokio::test]
    async fn external_principal_needs_no_verification() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let principal = fixture
            .accounts
            .create_user(NewPrincipal::new("apple@example.com").with_provider(Provider::Apple))
            .await?;
        assert!(principal.is_verified);
        Ok(())
    }

    /// Metadata store whose reads wait until two callers have read the same state.
    struct Lockstep {
        inner: Arc<MemoryStore>,
        barrier: tokio::sync::Barrier,
    }

    #[async_trait::async_trait]
    impl MetadataStore for Lockstep {
        async fn metadata(&self, principal_id: i64) -> Result<Option<Metadata>, StoreError> {
            let metadata = self.inner.metadata(principal_id).await?;
            self.barrier.wait().await;
            Ok(metadata)
        }

        async fn store_code(
            &self,
            principal_id: i64,
            kind: CodeKind,
            digest: &str,
            generated_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner
                .store_code(principal_id, kind, digest, generated_at)
                .await
        }

        async fn clear_code(
            &self,
            principal_id: i64,
            kind: CodeKind,
            expected_digest: &str,
        ) -> Result<bool, StoreError> {
            self.inner
                .clear_code(principal_id, kind, expected_digest)
                .await
        }

        async fn restore_code(
            &self,
            principal_id: i64,
            kind: CodeKind,
            code: &IssuedCode,
        ) -> Result<bool, StoreError> {
            self.inner.restore_code(principal_id, kind, code).await
        }

        async fn open_reset_log(
            &self,
            principal_id: i64,
            kind: PasswordResetType,
            request_time: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner
                .open_reset_log(principal_id, kind, request_time)
                .await
        }

        async fn close_reset_log(
            &self,
            principal_id: i64,
            kind: PasswordResetType,
            change_time: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner
                .close_reset_log(principal_id, kind, change_time)
                .await
        }

        async fn reset_logs(&self, principal_id: i64) -> Result<Vec<PasswordResetLog>, StoreError> {
            self.inner.reset_logs(principal_id).await
        }

        async fn record_access(&self, log: &AccessLog) -> Result<(), StoreError> {
            self.inner.record_access(log).await
        }

        async fn access_logs(&self, principal_id: i64) -> Result<Vec<AccessLog>, StoreError> {
            self.inner.access_logs(principal_id).await
        }
    }

    fn lockstep(fixture: &Fixture) -> Result<AccountLifecycle, LifecycleError> {
        AccountLifecycle::new(
            fixture.accounts.clone(),
            Arc::new(Lockstep {
                inner: fixture.store.clone(),
                barrier: tokio::sync::Barrier::new(2),
            }),
            fixture.codec.clone(),
            LifecycleConfig::new(),
        )
    }

    /// Principal store that reads fine but refuses every update.
    struct ReadOnly(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl PrincipalStore for ReadOnly {
        async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
            self.0.find_by_username(username).await
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
            self.0.find_by_email(email).await
        }

        async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, StoreError> {
            self.0.find_by_id(id).await
        }

        async fn insert(&self, principal: &Principal) -> Result<Principal, StoreError> {
            self.0.insert(principal).await
        }

        async fn update(&self, _: &Principal, _: &[PrincipalField]) -> Result<(), StoreError> {
            Err(StoreError::Backend("read-only replica".to_string()))
        }
    }

    fn read_only(fixture: &Fixture) -> Result<AccountLifecycle, LifecycleError> {
        AccountLifecycle::new(
            Accounts::new(Arc::new(ReadOnly(fixture.store.clone())), fixture.hasher.clone()),
            fixture.store.clone(),
            fixture.codec.clone(),
            LifecycleConfig::new(),
        )
    }

    #[tokio::test]
    async fn concurrent_verifications_consume_the_code_once() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let jane = jane(&fixture).await?;
        let now = Utc::now();
        let (_, code) = lifecycle(&fixture, LifecycleConfig::new())?
            .request_at(&jane, CodeKind::Verification, now)
            .await?;

        let racing = lockstep(&fixture)?;
        let (mut first, mut second) = (jane.clone(), jane.clone());
        let (a, b) = tokio::join!(
            racing.verify_at(&mut first, &code, now),
            racing.verify_at(&mut second, &code, now),
        );
        match (&a, &b) {
            (Ok(_), Err(LifecycleError::CodeIncorrect))
            | (Err(LifecycleError::CodeIncorrect), Ok(_)) => {}
            other => panic!("expected exactly one verification to win, got {other:?}"),
        }

        let metadata = fixture
            .store
            .metadata(jane.id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;
        assert!(metadata.code(CodeKind::Verification).is_none());
        let stored = fixture
            .accounts
            .store()
            .find_by_id(jane.id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;
        assert!(stored.is_verified);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_resets_consume_the_code_once() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let jane = jane(&fixture).await?;
        let now = Utc::now();
        let (_, temporary) = lifecycle(&fixture, LifecycleConfig::new())?
            .request_at(&jane, CodeKind::PasswordReset, now)
            .await?;

        let racing = lockstep(&fixture)?;
        let (mut first, mut second) = (jane.clone(), jane.clone());
        let (a, b) = tokio::join!(
            racing.reset_password_at(&mut first, &temporary, SecretString::from("first-pw"), now),
            racing.reset_password_at(&mut second, &temporary, SecretString::from("second-pw"), now),
        );
        let (winner, loser) = match (&a, &b) {
            (Ok(_), Err(LifecycleError::CodeIncorrect)) => ("first-pw", "second-pw"),
            (Err(LifecycleError::CodeIncorrect), Ok(_)) => ("second-pw", "first-pw"),
            other => panic!("expected exactly one reset to win, got {other:?}"),
        };

        let metadata = fixture
            .store
            .metadata(jane.id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;
        assert!(metadata.code(CodeKind::PasswordReset).is_none());
        let stored = fixture
            .accounts
            .store()
            .find_by_id(jane.id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;
        assert!(fixture.accounts.check_password(&stored, winner));
        assert!(!fixture.accounts.check_password(&stored, loser));

        let logs = fixture.store.reset_logs(jane.id).await?;
        assert_eq!(logs.len(), 1);
        assert!(logs[0].change_time.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn failed_save_keeps_verification_code_usable() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let lifecycle = lifecycle(&fixture, LifecycleConfig::new())?;
        let mut jane = jane(&fixture).await?;
        let (_, code) = lifecycle.request(&jane, CodeKind::Verification).await?;

        let failed = read_only(&fixture)?.verify(&mut jane.clone(), &code).await;
        assert!(matches!(
            failed,
            Err(LifecycleError::Account(AccountError::Store(StoreError::Backend(_))))
        ));
        let metadata = fixture
            .store
            .metadata(jane.id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;
        assert!(metadata.code(CodeKind::Verification).is_some());

        lifecycle.verify(&mut jane, &code).await?;
        assert!(jane.is_verified);
        Ok(())
    }

    #[tokio::test]
    async fn failed_save_keeps_temporary_password_usable() -> Result<(), LifecycleError> {
        let fixture = fixture()?;
        let lifecycle = lifecycle(&fixture, LifecycleConfig::new())?;
        let mut jane = jane(&fixture).await?;
        let (_, temporary) = lifecycle.request(&jane, CodeKind::PasswordReset).await?;

        let failed = read_only(&fixture)?
            .reset_password(&mut jane.clone(), &temporary, SecretString::from("new-pw"))
            .await;
        assert!(failed.is_err());
        assert!(fixture.store.reset_logs(jane.id).await?[0].change_time.is_none());

        lifecycle
            .reset_password(&mut jane, &temporary, SecretString::from("new-pw"))
            .await?;
        let stored = fixture
            .accounts
            .store()
            .find_by_id(jane.id)
            .await?
            .ok_or(LifecycleError::PrincipalNotFound)?;
        assert!(fixture.accounts.check_password(&stored, "new-pw"));
        Ok(())
    }
}
