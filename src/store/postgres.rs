use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    Connection, PgPool, Postgres, QueryBuilder, Row,
};
use std::{net::IpAddr, time::Duration};
use tracing::{info_span, Instrument};

use super::{MetadataStore, PrincipalStore, StoreError};
use crate::account::{
    AccessEvent, AccessLog, CodeKind, IssuedCode, Metadata, PasswordResetLog, PasswordResetType,
    Principal, PrincipalField,
};

const PRINCIPAL_COLUMNS: &str = "id, username, email, password, surname, first_name, last_name, \
     mobile_number, date_of_birth, provider, is_active, is_staff, is_superuser, is_verified, created_at, updated_at";

/// Postgres-backed store; schema lives in `migrations/`.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the service's pool settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn find_one(&self, filter: &str, value: &str) -> Result<Option<Principal>, StoreError> {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE {filter}");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(principal_from_row).transpose()
    }
}

fn principal_from_row(row: &PgRow) -> Result<Principal, StoreError> {
    let provider: String = row.try_get("provider")?;
    Ok(Principal {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password: row.try_get("password")?,
        pending_password: None,
        surname: row.try_get("surname")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        mobile_number: row.try_get("mobile_number")?,
        date_of_birth: row.try_get("date_of_birth")?,
        provider: provider.parse().map_err(StoreError::Backend)?,
        is_active: row.try_get("is_active")?,
        is_staff: row.try_get("is_staff")?,
        is_superuser: row.try_get("is_superuser")?,
        is_verified: row.try_get("is_verified")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn issued_code(row: &PgRow, kind: CodeKind) -> Result<Option<IssuedCode>, StoreError> {
    let (digest_column, generated_column) = kind.columns();
    let digest: Option<String> = row.try_get(digest_column)?;
    let generated_at: Option<DateTime<Utc>> = row.try_get(generated_column)?;
    Ok(match (digest, generated_at) {
        (Some(digest), Some(generated_at)) => Some(IssuedCode {
            digest,
            generated_at,
        }),
        _ => None,
    })
}

fn push_field(builder: &mut QueryBuilder<'_, Postgres>, principal: &Principal, field: PrincipalField) {
    builder.push(", ").push(field.column()).push(" = ");
    match field {
        PrincipalField::Username => builder.push_bind(principal.username.clone()),
        PrincipalField::Email => builder.push_bind(principal.email.clone()),
        PrincipalField::Password => builder.push_bind(principal.password.clone()),
        PrincipalField::Surname => builder.push_bind(principal.surname.clone()),
        PrincipalField::FirstName => builder.push_bind(principal.first_name.clone()),
        PrincipalField::LastName => builder.push_bind(principal.last_name.clone()),
        PrincipalField::MobileNumber => builder.push_bind(principal.mobile_number.clone()),
        PrincipalField::DateOfBirth => builder.push_bind(principal.date_of_birth),
        PrincipalField::Provider => builder.push_bind(principal.provider.as_str()),
        PrincipalField::IsActive => builder.push_bind(principal.is_active),
        PrincipalField::IsStaff => builder.push_bind(principal.is_staff),
        PrincipalField::IsSuperuser => builder.push_bind(principal.is_superuser),
        PrincipalField::IsVerified => builder.push_bind(principal.is_verified),
    };
}

#[async_trait]
impl PrincipalStore for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        self.find_one("username = $1", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        self.find_one("lower(email) = lower($1)", email).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, StoreError> {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = $1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn insert(&self, principal: &Principal) -> Result<Principal, StoreError> {
        let query = format!(
            r"
            INSERT INTO principals
                (username, email, password, surname, first_name, last_name, mobile_number,
                 date_of_birth, provider, is_active, is_staff, is_superuser, is_verified)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {PRINCIPAL_COLUMNS}
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(&principal.username)
            .bind(&principal.email)
            .bind(&principal.password)
            .bind(&principal.surname)
            .bind(&principal.first_name)
            .bind(&principal.last_name)
            .bind(&principal.mobile_number)
            .bind(principal.date_of_birth)
            .bind(principal.provider.as_str())
            .bind(principal.is_active)
            .bind(principal.is_staff)
            .bind(principal.is_superuser)
            .bind(principal.is_verified)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        principal_from_row(&row)
    }

    async fn update(
        &self,
        principal: &Principal,
        fields: &[PrincipalField],
    ) -> Result<(), StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE principals SET updated_at = NOW()");
        for field in fields {
            push_field(&mut builder, principal, *field);
        }
        builder.push(" WHERE id = ").push_bind(principal.id);

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = builder.sql()
        );
        let result = builder
            .build()
            .execute(&self.pool)
            .instrument(span)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self.pool.acquire().instrument(acquire_span).await?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PgStore {
    async fn metadata(&self, principal_id: i64) -> Result<Option<Metadata>, StoreError> {
        let query = r"
            SELECT principal_id, temporary_password, temporary_password_generated_at,
                   verification_code, verification_code_generated_at
            FROM principal_metadata
            WHERE principal_id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(principal_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;

        row.map(|row| {
            Ok(Metadata {
                principal_id: row.try_get("principal_id")?,
                temporary_password: issued_code(&row, CodeKind::PasswordReset)?,
                verification_code: issued_code(&row, CodeKind::Verification)?,
            })
        })
        .transpose()
    }

    async fn store_code(
        &self,
        principal_id: i64,
        kind: CodeKind,
        digest: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let (digest_column, generated_column) = kind.columns();
        let query = format!(
            r"
            INSERT INTO principal_metadata (principal_id, {digest_column}, {generated_column})
            VALUES ($1, $2, $3)
            ON CONFLICT (principal_id) DO UPDATE
            SET {digest_column} = EXCLUDED.{digest_column},
                {generated_column} = EXCLUDED.{generated_column}
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query.as_str()
        );
        sqlx::query(&query)
            .bind(principal_id)
            .bind(digest)
            .bind(generated_at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn clear_code(
        &self,
        principal_id: i64,
        kind: CodeKind,
        expected_digest: &str,
    ) -> Result<bool, StoreError> {
        let (digest_column, generated_column) = kind.columns();
        let query = format!(
            r"
            UPDATE principal_metadata
            SET {digest_column} = NULL, {generated_column} = NULL
            WHERE principal_id = $1 AND {digest_column} = $2
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let result = sqlx::query(&query)
            .bind(principal_id)
            .bind(expected_digest)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn restore_code(
        &self,
        principal_id: i64,
        kind: CodeKind,
        code: &IssuedCode,
    ) -> Result<bool, StoreError> {
        let (digest_column, generated_column) = kind.columns();
        let query = format!(
            r"
            UPDATE principal_metadata
            SET {digest_column} = $2, {generated_column} = $3
            WHERE principal_id = $1 AND {digest_column} IS NULL
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let result = sqlx::query(&query)
            .bind(principal_id)
            .bind(&code.digest)
            .bind(code.generated_at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn open_reset_log(
        &self,
        principal_id: i64,
        kind: PasswordResetType,
        request_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO password_reset_logs (principal_id, type, request_time)
            VALUES ($1, $2, $3)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(principal_id)
            .bind(kind.as_str())
            .bind(request_time)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn close_reset_log(
        &self,
        principal_id: i64,
        kind: PasswordResetType,
        change_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE password_reset_logs
            SET change_time = $3
            WHERE id = (
                SELECT id FROM password_reset_logs
                WHERE principal_id = $1 AND type = $2 AND change_time IS NULL
                ORDER BY request_time DESC
                LIMIT 1
            )
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(principal_id)
            .bind(kind.as_str())
            .bind(change_time)
            .execute(&self.pool)
            .instrument(span)
            .await?;

        if result.rows_affected() == 0 {
            let query = r"
                INSERT INTO password_reset_logs (principal_id, type, request_time, change_time)
                VALUES ($1, $2, $3, $3)
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );
            sqlx::query(query)
                .bind(principal_id)
                .bind(kind.as_str())
                .bind(change_time)
                .execute(&self.pool)
                .instrument(span)
                .await?;
        }
        Ok(())
    }

    async fn reset_logs(&self, principal_id: i64) -> Result<Vec<PasswordResetLog>, StoreError> {
        let query = r"
            SELECT principal_id, type, request_time, change_time
            FROM password_reset_logs
            WHERE principal_id = $1
            ORDER BY request_time DESC
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(principal_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("type")?;
                Ok(PasswordResetLog {
                    principal_id: row.try_get("principal_id")?,
                    kind: if kind == PasswordResetType::Change.as_str() {
                        PasswordResetType::Change
                    } else {
                        PasswordResetType::Reset
                    },
                    request_time: row.try_get("request_time")?,
                    change_time: row.try_get("change_time")?,
                })
            })
            .collect()
    }

    async fn record_access(&self, log: &AccessLog) -> Result<(), StoreError> {
        let (ip_column, time_column) = match log.event {
            AccessEvent::SignIn => ("sign_in_ip", "sign_in_time"),
            AccessEvent::SignOut => ("sign_out_ip", "sign_out_time"),
        };
        let query = format!(
            r"
            INSERT INTO access_logs (principal_id, {ip_column}, {time_column})
            VALUES ($1, $2, $3)
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        sqlx::query(&query)
            .bind(log.principal_id)
            .bind(log.ip)
            .bind(log.time)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn access_logs(&self, principal_id: i64) -> Result<Vec<AccessLog>, StoreError> {
        let query = r"
            SELECT principal_id, sign_in_ip, sign_out_ip, sign_in_time, sign_out_time
            FROM access_logs
            WHERE principal_id = $1
            ORDER BY COALESCE(sign_in_time, sign_out_time) DESC
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(principal_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;

        rows.iter().map(access_log_from_row).collect()
    }
}

fn access_log_from_row(row: &PgRow) -> Result<AccessLog, StoreError> {
    let principal_id: i64 = row.try_get("principal_id")?;
    let sign_in_time: Option<DateTime<Utc>> = row.try_get("sign_in_time")?;
    let sign_out_time: Option<DateTime<Utc>> = row.try_get("sign_out_time")?;
    let sign_in_ip: Option<IpAddr> = row.try_get("sign_in_ip")?;
    let sign_out_ip: Option<IpAddr> = row.try_get("sign_out_ip")?;

    match (sign_in_time, sign_out_time) {
        (Some(time), None) => Ok(AccessLog::sign_in(principal_id, sign_in_ip, time)),
        (None, Some(time)) => Ok(AccessLog::sign_out(principal_id, sign_out_ip, time)),
        _ => Err(StoreError::Backend(format!(
            "access log for principal {principal_id} mixes sign-in and sign-out"
        ))),
    }
}
