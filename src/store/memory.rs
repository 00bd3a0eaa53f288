use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{MetadataStore, PrincipalStore, StoreError};
use crate::account::{
    AccessLog, CodeKind, IssuedCode, Metadata, PasswordResetLog, PasswordResetType, Principal,
    PrincipalField,
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    principals: HashMap<i64, Principal>,
    metadata: HashMap<i64, Metadata>,
    reset_logs: Vec<PasswordResetLog>,
    access_logs: Vec<AccessLog>,
}

/// Process-local store. Every operation takes the table lock once, so
/// compare-and-clear is atomic with respect to other callers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn copy_field(target: &mut Principal, source: &Principal, field: PrincipalField) {
    match field {
        PrincipalField::Username => target.username.clone_from(&source.username),
        PrincipalField::Email => target.email.clone_from(&source.email),
        PrincipalField::Password => target.password.clone_from(&source.password),
        PrincipalField::Surname => target.surname.clone_from(&source.surname),
        PrincipalField::FirstName => target.first_name.clone_from(&source.first_name),
        PrincipalField::LastName => target.last_name.clone_from(&source.last_name),
        PrincipalField::MobileNumber => target.mobile_number.clone_from(&source.mobile_number),
        PrincipalField::DateOfBirth => target.date_of_birth = source.date_of_birth,
        PrincipalField::Provider => target.provider = source.provider,
        PrincipalField::IsActive => target.is_active = source.is_active,
        PrincipalField::IsStaff => target.is_staff = source.is_staff,
        PrincipalField::IsSuperuser => target.is_superuser = source.is_superuser,
        PrincipalField::IsVerified => target.is_verified = source.is_verified,
    }
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .principals
            .values()
            .find(|p| p.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .principals
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, StoreError> {
        Ok(self.tables.read().await.principals.get(&id).cloned())
    }

    async fn insert(&self, principal: &Principal) -> Result<Principal, StoreError> {
        let mut tables = self.tables.write().await;
        for existing in tables.principals.values() {
            if existing.username == principal.username {
                return Err(StoreError::Conflict("username".to_string()));
            }
            if existing.email.eq_ignore_ascii_case(&principal.email) {
                return Err(StoreError::Conflict("email".to_string()));
            }
        }

        tables.next_id += 1;
        let now = Utc::now();
        let mut stored = principal.clone();
        stored.id = tables.next_id;
        stored.pending_password = None;
        stored.created_at = now;
        stored.updated_at = now;
        tables.principals.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        principal: &Principal,
        fields: &[PrincipalField],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        if fields.contains(&PrincipalField::Username)
            && tables
                .principals
                .values()
                .any(|p| p.id != principal.id && p.username == principal.username)
        {
            return Err(StoreError::Conflict("username".to_string()));
        }

        let stored = tables
            .principals
            .get_mut(&principal.id)
            .ok_or(StoreError::NotFound)?;
        for field in fields {
            copy_field(stored, principal, *field);
        }
        stored.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn metadata(&self, principal_id: i64) -> Result<Option<Metadata>, StoreError> {
        Ok(self.tables.read().await.metadata.get(&principal_id).cloned())
    }

    async fn store_code(
        &self,
        principal_id: i64,
        kind: CodeKind,
        digest: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let metadata = tables
            .metadata
            .entry(principal_id)
            .or_insert_with(|| Metadata::new(principal_id));
        *metadata.code_mut(kind) = Some(IssuedCode {
            digest: digest.to_string(),
            generated_at,
        });
        Ok(())
    }

    async fn clear_code(
        &self,
        principal_id: i64,
        kind: CodeKind,
        expected_digest: &str,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(metadata) = tables.metadata.get_mut(&principal_id) else {
            return Ok(false);
        };
        let slot = metadata.code_mut(kind);
        if slot.as_ref().is_some_and(|code| code.digest == expected_digest) {
            *slot = None;
            return Ok(true);
        }
        Ok(false)
    }

    async fn restore_code(
        &self,
        principal_id: i64,
        kind: CodeKind,
        code: &IssuedCode,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(metadata) = tables.metadata.get_mut(&principal_id) else {
            return Ok(false);
        };
        let slot = metadata.code_mut(kind);
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(code.clone());
        Ok(true)
    }

    async fn open_reset_log(
        &self,
        principal_id: i64,
        kind: PasswordResetType,
        request_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.tables.write().await.reset_logs.push(PasswordResetLog {
            principal_id,
            kind,
            request_time,
            change_time: None,
        });
        Ok(())
    }

    async fn close_reset_log(
        &self,
        principal_id: i64,
        kind: PasswordResetType,
        change_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let open = tables
            .reset_logs
            .iter()
            .enumerate()
            .filter(|(_, log)| {
                log.principal_id == principal_id && log.kind == kind && log.change_time.is_none()
            })
            .max_by_key(|(_, log)| log.request_time)
            .map(|(index, _)| index);

        match open {
            Some(index) => tables.reset_logs[index].change_time = Some(change_time),
            None => tables.reset_logs.push(PasswordResetLog {
                principal_id,
                kind,
                request_time: change_time,
                change_time: Some(change_time),
            }),
        }
        Ok(())
    }

    async fn reset_logs(&self, principal_id: i64) -> Result<Vec<PasswordResetLog>, StoreError> {
        let tables = self.tables.read().await;
        let mut logs: Vec<_> = tables
            .reset_logs
            .iter()
            .filter(|log| log.principal_id == principal_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.request_time.cmp(&a.request_time));
        Ok(logs)
    }

    async fn record_access(&self, log: &AccessLog) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.principals.contains_key(&log.principal_id) {
            return Err(StoreError::NotFound);
        }
        tables.access_logs.push(log.clone());
        Ok(())
    }

    async fn access_logs(&self, principal_id: i64) -> Result<Vec<AccessLog>, StoreError> {
        let tables = self.tables.read().await;
        let mut logs: Vec<_> = tables
            .access_logs
            .iter()
            .filter(|log| log.principal_id == principal_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(logs)
    }
}
