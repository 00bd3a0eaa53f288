use chrono::{DateTime, Duration, NaiveDate, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

use super::AccountError;
use crate::hashing::SecretHasher;

/// How the principal authenticated when the account was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    #[default]
    Email,
    Phone,
    Google,
    Facebook,
    Twitter,
    Github,
    Apple,
}

impl Provider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Phone => "PHONE",
            Self::Google => "GOOGLE",
            Self::Facebook => "FACEBOOK",
            Self::Twitter => "TWITTER",
            Self::Github => "GITHUB",
            Self::Apple => "APPLE",
        }
    }

    /// Providers that vouch for the address themselves.
    #[must_use]
    pub const fn is_external(self) -> bool {
        !matches!(self, Self::Email | Self::Phone)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EMAIL" => Ok(Self::Email),
            "PHONE" => Ok(Self::Phone),
            "GOOGLE" => Ok(Self::Google),
            "FACEBOOK" => Ok(Self::Facebook),
            "TWITTER" => Ok(Self::Twitter),
            "GITHUB" => Ok(Self::Github),
            "APPLE" => Ok(Self::Apple),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Columns a selective save may write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrincipalField {
    Username,
    Email,
    Password,
    Surname,
    FirstName,
    LastName,
    MobileNumber,
    DateOfBirth,
    Provider,
    IsActive,
    IsStaff,
    IsSuperuser,
    IsVerified,
}

impl PrincipalField {
    pub const ALL: [Self; 13] = [
        Self::Username,
        Self::Email,
        Self::Password,
        Self::Surname,
        Self::FirstName,
        Self::LastName,
        Self::MobileNumber,
        Self::DateOfBirth,
        Self::Provider,
        Self::IsActive,
        Self::IsStaff,
        Self::IsSuperuser,
        Self::IsVerified,
    ];

    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Email => "email",
            Self::Password => "password",
            Self::Surname => "surname",
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::MobileNumber => "mobile_number",
            Self::DateOfBirth => "date_of_birth",
            Self::Provider => "provider",
            Self::IsActive => "is_active",
            Self::IsStaff => "is_staff",
            Self::IsSuperuser => "is_superuser",
            Self::IsVerified => "is_verified",
        }
    }
}

/// Granularity of [`Principal::age`]. Months are 30 days and years 365.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AgeUnit {
    #[default]
    Years,
    Months,
    Weeks,
    Days,
}

impl AgeUnit {
    /// `y`/`year`/`years` and so on; anything unrecognized counts in days.
    #[must_use]
    pub fn parse(unit: &str) -> Self {
        match unit.trim().to_ascii_lowercase().as_str() {
            "y" | "year" | "years" => Self::Years,
            "m" | "month" | "months" => Self::Months,
            "w" | "week" | "weeks" => Self::Weeks,
            _ => Self::Days,
        }
    }

    const fn days(self) -> i64 {
        match self {
            Self::Years => 365,
            Self::Months => 30,
            Self::Weeks => 7,
            Self::Days => 1,
        }
    }
}

/// A stored account.
///
/// `password` holds the digest. A new raw password is staged in `pending_password`
/// and only becomes a digest through [`normalize_for_save`].
#[derive(Clone, Debug)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: Option<String>,
    pub pending_password: Option<SecretString>,
    pub surname: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub mobile_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub provider: Provider,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    /// An unsaved, active principal with no password.
    #[must_use]
    pub fn new(email: &str) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            username: String::new(),
            email: normalize_email(email),
            password: None,
            pending_password: None,
            surname: None,
            first_name: None,
            last_name: None,
            mobile_number: None,
            date_of_birth: None,
            provider: Provider::default(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
            is_verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stage a new raw password; it is hashed on the next save.
    pub fn set_password(&mut self, raw: SecretString) {
        self.pending_password = Some(raw);
    }

    #[must_use]
    pub fn has_usable_password(&self) -> bool {
        self.password.as_deref().is_some_and(|digest| !digest.is_empty())
    }

    /// "Surname First Last", each part trimmed and capitalized, or the username.
    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        let name = [&self.surname, &self.first_name, &self.last_name]
            .into_iter()
            .filter_map(|part| part.as_deref().map(capitalize))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !name.is_empty() {
            return Some(name);
        }
        let username = self.username.trim();
        (!username.is_empty()).then(|| username.to_string())
    }

    #[must_use]
    pub fn short_name(&self) -> Option<String> {
        self.full_name()
            .and_then(|name| name.split_whitespace().next().map(str::to_string))
    }

    /// Whole `unit`s elapsed since the date of birth; zero when it is unknown.
    #[must_use]
    pub fn age(&self, unit: AgeUnit) -> i64 {
        self.age_at(unit, Utc::now().date_naive())
    }

    #[must_use]
    pub fn age_at(&self, unit: AgeUnit, today: NaiveDate) -> i64 {
        let Some(born) = self.date_of_birth else {
            return 0;
        };
        let days = (today - born).num_days().max(0);
        days / unit.days()
    }

    /// Created within `window` of `now`.
    #[must_use]
    pub fn is_newbie_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.created_at > now - window && self.created_at <= now
    }

    /// The claims embedded in tokens issued for this principal.
    #[must_use]
    pub fn projection(&self) -> Projection {
        Projection {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            provider: self.provider,
            is_verified: self.is_verified,
        }
    }

    #[must_use]
    pub fn profile(&self) -> Profile {
        Profile {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            surname: self.surname.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            mobile_number: self.mobile_number.clone(),
            date_of_birth: self.date_of_birth,
            age: self.age(AgeUnit::Years),
            full_name: self.full_name(),
            short_name: self.short_name(),
            provider: self.provider,
            is_verified: self.is_verified,
            is_staff: self.is_staff,
            created_at: self.created_at,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Projection {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub provider: Provider,
    pub is_verified: bool,
}

/// Public view of a principal returned by the API.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Profile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub surname: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub mobile_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    /// Whole years unless another unit was asked for; 0 without a birth date.
    pub age: i64,
    pub full_name: Option<String>,
    pub short_name: Option<String>,
    pub provider: Provider,
    pub is_verified: bool,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

/// Lowercase the domain part, trim the whole address.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{local}@{}", domain.to_lowercase()),
        None => email.to_string(),
    }
}

fn capitalize(part: &str) -> String {
    let mut chars = part.trim().chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
    })
}

/// Pre-save normalization, run by every save path.
///
/// Fills an empty username from the email, hashes a staged password, refuses a
/// superuser without a usable password and applies [`derive_verified`]. Returns the
/// fields it changed so a selective save can include them.
///
/// # Errors
///
/// Returns `AccountError::SuperuserPasswordRequired` or a hashing failure.
pub fn normalize_for_save(
    principal: &mut Principal,
    hasher: &dyn SecretHasher,
) -> Result<Vec<PrincipalField>, AccountError> {
    let mut changed = Vec::new();

    if principal.username.trim().is_empty() {
        principal.username = principal.email.clone();
        changed.push(PrincipalField::Username);
    } else {
        principal.username = principal.username.trim().to_string();
    }

    match principal.pending_password.take() {
        Some(raw) if !raw.expose_secret().is_empty() => {
            principal.password = Some(hasher.hash(raw.expose_secret())?);
            changed.push(PrincipalField::Password);
        }
        _ => {
            if principal.is_superuser && !principal.has_usable_password() {
                return Err(AccountError::SuperuserPasswordRequired);
            }
        }
    }

    if derive_verified(principal) {
        changed.push(PrincipalField::IsVerified);
    }

    Ok(changed)
}

/// Mark external-provider, staff and superuser principals verified.
///
/// Returns `true` if the flag changed. Never clears it.
pub fn derive_verified(principal: &mut Principal) -> bool {
    if principal.is_verified {
        return false;
    }
    if principal.provider.is_external() || principal.is_superuser || principal.is_staff {
        principal.is_verified = true;
        return true;
    }
    false
}
