#![allow(dead_code)]

use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use xauth::{
    account::{AccountLifecycle, Accounts, LifecycleConfig},
    api::AppState,
    auth::{CredentialResolver, ResolverConfig},
    hashing::Argon2Hasher,
    mail::{MailConfig, MailMessage, MailQueue, Mailer},
    store::MemoryStore,
    token::{TokenCodec, TokenConfig},
};

pub const SECRET: &str = "integration-secret-integration-secret";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub accounts: Accounts,
    pub codec: Arc<TokenCodec>,
    pub resolver: CredentialResolver,
    pub lifecycle: AccountLifecycle,
    pub mail: tokio::sync::mpsc::UnboundedReceiver<MailMessage>,
}

impl Harness {
    pub fn new() -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let hasher = Argon2Hasher::new().with_params(1024, 1, 1)?;
        let accounts = Accounts::new(store.clone(), Arc::new(hasher));
        let codec = Arc::new(TokenCodec::new(TokenConfig::new(SecretString::from(SECRET)))?);
        let resolver = CredentialResolver::new(accounts.clone(), codec.clone(), ResolverConfig::new());
        let (queue, mail) = MailQueue::channel();
        let lifecycle = AccountLifecycle::new(
            accounts.clone(),
            store.clone(),
            codec.clone(),
            LifecycleConfig::new(),
        )?
        .with_mailer(Mailer::new(queue, MailConfig::new("Xently", "no-reply@xently.dev")));

        Ok(Self {
            store,
            accounts,
            codec,
            resolver,
            lifecycle,
            mail,
        })
    }

    pub fn state(&self) -> AppState {
        AppState {
            accounts: self.accounts.clone(),
            resolver: self.resolver.clone(),
            lifecycle: self.lifecycle.clone(),
            metadata: self.store.clone(),
            codec: self.codec.clone(),
        }
    }
}
