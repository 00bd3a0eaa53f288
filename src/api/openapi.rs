use crate::{
    account::{Profile, Provider},
    api::{
        error::ErrorBody,
        handlers::{
            health, password_reset, profile, signin, signout, signup, verification, CodeForm,
            CredentialsForm, Message, PasswordResetForm, Session, SignupForm,
        },
    },
    token::TokenPair,
};
use axum::Json;
use utoipa::{
    openapi::{
        security::{Http, HttpAuthScheme, SecurityScheme},
        Contact, InfoBuilder, License,
    },
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        signin::signin,
        signout::signout,
        signup::signup,
        verification::verification,
        password_reset::password_reset,
        profile::profile,
    ),
    components(schemas(
        Session,
        Message,
        ErrorBody,
        Profile,
        Provider,
        TokenPair,
        health::Health,
        CredentialsForm,
        SignupForm,
        CodeForm,
        PasswordResetForm,
    )),
    modifiers(&SecuritySchemes),
    tags(
        (name = "auth", description = "Sign-up, sign-in and profile"),
        (name = "verification", description = "Account verification codes"),
        (name = "password-reset", description = "Temporary passwords and password changes"),
        (name = "health", description = "Service health"),
    )
)]
struct ApiDoc;

struct SecuritySchemes;

impl Modify for SecuritySchemes {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
        components.add_security_scheme("basic", SecurityScheme::Http(Http::new(HttpAuthScheme::Basic)));
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();

    // Use Cargo.toml metadata instead of the derive defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.contact = cargo_contact();
    info.license = optional_str(env!("CARGO_PKG_LICENSE")).map(|identifier| {
        let mut license = License::new(identifier);
        license.identifier = Some(identifier.to_string());
        license
    });
    doc.info = info;

    doc
}

/// Serve the generated document.
pub async fn document() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_author<'a>(author: &'a str) -> (Option<&'a str>, Option<&'a str>) {
    let non_empty = |s: &'a str| -> Option<&'a str> {
        let s = s.trim();
        (!s.is_empty()).then_some(s)
    };
    match author.split_once('<') {
        Some((name, email)) => (non_empty(name), non_empty(email.trim_end_matches('>'))),
        None => (non_empty(author), None),
    }
}
