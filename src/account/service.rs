use chrono::NaiveDate;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::{
    fmt,
    sync::{Arc, OnceLock},
};
use tracing::{debug, instrument};

use super::{normalize_for_save, AccountError, Principal, PrincipalField, Provider};
use crate::{hashing::SecretHasher, store::PrincipalStore};

static EMAIL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn valid_email(email: &str) -> bool {
    EMAIL_PATTERN
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|regex| regex.is_match(email))
}

/// Registration input for [`Accounts::create_user`].
#[derive(Clone, Debug, Default)]
pub struct NewPrincipal {
    email: String,
    username: Option<String>,
    password: Option<SecretString>,
    surname: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    mobile_number: Option<String>,
    date_of_birth: Option<NaiveDate>,
    provider: Provider,
}

impl NewPrincipal {
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }

    #[must_use]
    pub fn with_surname(mut self, surname: impl Into<String>) -> Self {
        self.surname = Some(surname.into());
        self
    }

    #[must_use]
    pub fn with_first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self
    }

    #[must_use]
    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    #[must_use]
    pub fn with_mobile_number(mut self, mobile_number: impl Into<String>) -> Self {
        self.mobile_number = Some(mobile_number.into());
        self
    }

    #[must_use]
    pub fn with_date_of_birth(mut self, date_of_birth: NaiveDate) -> Self {
        self.date_of_birth = Some(date_of_birth);
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    fn into_principal(self) -> Result<Principal, AccountError> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(AccountError::EmailRequired);
        }
        if !valid_email(email) {
            return Err(AccountError::InvalidEmail(email.to_string()));
        }

        let mut principal = Principal::new(email);
        principal.username = self.username.unwrap_or_default();
        principal.pending_password = self.password;
        principal.surname = self.surname;
        principal.first_name = self.first_name;
        principal.last_name = self.last_name;
        principal.mobile_number = self.mobile_number;
        principal.date_of_birth = self.date_of_birth;
        principal.provider = self.provider;
        Ok(principal)
    }
}

/// Account registration and the normalizing save path.
#[derive(Clone)]
pub struct Accounts {
    store: Arc<dyn PrincipalStore>,
    hasher: Arc<dyn SecretHasher>,
}

impl fmt::Debug for Accounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accounts").finish_non_exhaustive()
    }
}

impl Accounts {
    #[must_use]
    pub fn new(store: Arc<dyn PrincipalStore>, hasher: Arc<dyn SecretHasher>) -> Self {
        Self { store, hasher }
    }

    #[must_use]
    pub fn store(&self) -> &dyn PrincipalStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn hasher(&self) -> &dyn SecretHasher {
        self.hasher.as_ref()
    }

    /// Register a regular account.
    ///
    /// # Errors
    ///
    /// Returns an error for a missing or malformed email, a taken username or email,
    /// or a backend failure.
    #[instrument(skip_all)]
    pub async fn create_user(&self, new: NewPrincipal) -> Result<Principal, AccountError> {
        let mut principal = new.into_principal()?;
        normalize_for_save(&mut principal, self.hasher.as_ref())?;
        let principal = self.store.insert(&principal).await?;
        debug!(id = principal.id, provider = %principal.provider, "principal created");
        Ok(principal)
    }

    /// Register an active, verified staff superuser.
    ///
    /// # Errors
    ///
    /// As [`Accounts::create_user`]; an empty password is rejected.
    #[instrument(skip_all)]
    pub async fn create_superuser(
        &self,
        email: &str,
        username: &str,
        password: SecretString,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Result<Principal, AccountError> {
        let mut new = NewPrincipal::new(email)
            .with_username(username)
            .with_password(password);
        new.first_name = first_name;
        new.last_name = last_name;

        let mut principal = new.into_principal()?;
        principal.is_active = true;
        principal.is_staff = true;
        principal.is_superuser = true;
        principal.is_verified = true;
        normalize_for_save(&mut principal, self.hasher.as_ref())?;
        Ok(self.store.insert(&principal).await?)
    }

    /// Normalize and persist an existing principal.
    ///
    /// With `fields`, only those columns (plus any normalization touched) are written;
    /// otherwise every column is.
    ///
    /// # Errors
    ///
    /// Returns a normalization, hashing or backend error.
    #[instrument(skip_all, fields(id = principal.id))]
    pub async fn save(
        &self,
        principal: &mut Principal,
        fields: Option<&[PrincipalField]>,
    ) -> Result<(), AccountError> {
        let changed = normalize_for_save(principal, self.hasher.as_ref())?;
        let fields = match fields {
            Some(fields) => {
                let mut fields = fields.to_vec();
                for field in changed {
                    if !fields.contains(&field) {
                        fields.push(field);
                    }
                }
                fields
            }
            None => PrincipalField::ALL.to_vec(),
        };
        self.store.update(principal, &fields).await?;
        Ok(())
    }

    #[must_use]
    pub fn check_password(&self, principal: &Principal, raw: &str) -> bool {
        principal
            .password
            .as_deref()
            .is_some_and(|digest| !digest.is_empty() && self.hasher.verify(digest, raw))
    }

    /// Compare against a raw secret without exposing it to callers' logs.
    #[must_use]
    pub fn check_secret_password(&self, principal: &Principal, raw: &SecretString) -> bool {
        self.check_password(principal, raw.expose_secret())
    }
}
