use crate::{
    account::{AccountLifecycle, Accounts, CodePolicy, LifecycleConfig},
    api::{self, AppState},
    auth::{CredentialResolver, ResolverConfig},
    cli::commands::{account, mail, token},
    hashing::Argon2Hasher,
    mail::{LogMailTransport, MailConfig, MailQueue, Mailer},
    store::{MemoryStore, MetadataStore, PgStore, PrincipalStore},
    token::{TokenCodec, TokenConfig},
};
use anyhow::{Context, Result};
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub cors_origin: Option<String>,
    pub token: token::Options,
    pub account: account::Options,
    pub mail: mail::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, the database is unreachable or
/// the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let (principals, metadata) = if let Some(dsn) = &args.dsn {
        let store = Arc::new(
            PgStore::connect(dsn)
                .await
                .context("Failed to connect to database")?,
        );
        store.migrate().await.context("Failed to apply migrations")?;
        let principals: Arc<dyn PrincipalStore> = store.clone();
        let metadata: Arc<dyn MetadataStore> = store;
        (principals, metadata)
    } else {
        warn!("No --dsn given, accounts are kept in memory");
        let store = Arc::new(MemoryStore::new());
        let principals: Arc<dyn PrincipalStore> = store.clone();
        let metadata: Arc<dyn MetadataStore> = store;
        (principals, metadata)
    };

    let mail_config = mail_config(&args.mail);
    let (queue, _worker) = MailQueue::spawn(Arc::new(LogMailTransport), &mail_config);

    let state = build_state(&args, principals, metadata, Mailer::new(queue, mail_config))?;

    api::new(args.port, state, args.cors_origin).await
}

/// Wire the configured services together.
///
/// # Errors
/// Returns an error for an unusable token or code configuration.
pub fn build_state(
    args: &Args,
    principals: Arc<dyn PrincipalStore>,
    metadata: Arc<dyn MetadataStore>,
    mailer: Mailer,
) -> Result<AppState> {
    let codec = Arc::new(
        TokenCodec::new(token_config(&args.token)).context("Invalid token configuration")?,
    );

    let mut hasher = Argon2Hasher::new();
    if let Some(pepper) = &args.account.password_pepper {
        hasher = hasher.with_pepper(pepper.clone());
    }
    let accounts = Accounts::new(principals, Arc::new(hasher));

    let lifecycle = AccountLifecycle::new(
        accounts.clone(),
        metadata.clone(),
        codec.clone(),
        lifecycle_config(&args.account),
    )
    .context("Invalid code configuration")?
    .with_mailer(mailer);

    let resolver = CredentialResolver::new(
        accounts.clone(),
        codec.clone(),
        ResolverConfig::new()
            .with_username_field(args.account.username_field.clone())
            .with_email_field(args.account.email_field.clone())
            .with_password_field(args.account.password_field.clone()),
    );

    Ok(AppState {
        accounts,
        resolver,
        lifecycle,
        metadata,
        codec,
    })
}

fn token_config(options: &token::Options) -> TokenConfig {
    let mut config = TokenConfig::new(options.secret_key.clone())
        .with_algorithm(options.algorithm)
        .with_general_window(Duration::seconds(options.ttl_seconds))
        .with_verification_window(Duration::seconds(options.verification_ttl_seconds))
        .with_password_reset_window(Duration::seconds(options.password_reset_ttl_seconds));
    if let Some(key) = &options.encryption_key {
        config = config.with_encryption_secret(key.clone());
    }
    config
}

fn code_policy(mut policy: CodePolicy, options: &account::CodeOptions) -> CodePolicy {
    if let Some(alphabet) = &options.alphabet {
        policy = policy.with_alphabet(alphabet);
    }
    if let Some(length) = options.length {
        policy = policy.with_length(length);
    }
    policy
}

fn lifecycle_config(options: &account::Options) -> LifecycleConfig {
    LifecycleConfig::new()
        .with_verification(code_policy(CodePolicy::numeric(), &options.verification))
        .with_password_reset(code_policy(
            CodePolicy::alphanumeric(),
            &options.password_reset,
        ))
        .with_newbie_window(Duration::seconds(options.newbie_window_seconds))
}

fn mail_config(options: &mail::Options) -> MailConfig {
    MailConfig::new(options.app_name.clone(), options.sender.clone())
        .with_reply_to(options.reply_to.clone())
        .with_max_attempts(options.max_attempts)
        .with_backoff_base_seconds(options.backoff_base_seconds)
        .with_backoff_max_seconds(options.backoff_max_seconds)
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        (
            "cors_origin",
            args.cors_origin.clone().unwrap_or_else(|| "*".to_string()),
        ),
        ("token_algorithm", args.token.algorithm.to_string()),
        (
            "encryption_key_set",
            args.token.encryption_key.is_some().to_string(),
        ),
        ("token_ttl_seconds", args.token.ttl_seconds.to_string()),
        (
            "password_pepper_set",
            args.account.password_pepper.is_some().to_string(),
        ),
        ("mail_sender", args.mail.sender.clone()),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    let hash = crate::GIT_COMMIT_HASH.trim();
    let short_hash = hash.get(..7).unwrap_or(hash);
    BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

const BANNER: &str = r"
 __  __    _   _   _ _____ _   _
 \ \/ /   / \ | | | |_   _| | | |
  \  /   / _ \| | | | | | | |_| |
  /  \  / ___ \ |_| | | | |  _  |
 /_/\_\/_/   \_\___/  |_| |_| |_| {VERSION}";
