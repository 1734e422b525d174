//! Postgres backend for the token store and the directories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use tracing::{info, info_span, Instrument};

use super::models::{CredentialRecord, TokenKind};
use super::TokenBackend;
use crate::directory::{ClientInfo, ClientRecord, DirectoryBackend, UserRecord};
use crate::error::{Error, Result};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const GC_PREDICATE: &str = "expired_at <= $1 OR (code = '' AND access = '' AND refresh = '')";

fn db_span(operation: &'static str, statement: &str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn find_statement(kind: TokenKind) -> String {
    format!(
        "SELECT payload FROM oauth2_token WHERE {} = $1 AND expired_at > $2 LIMIT 1",
        kind.column()
    )
}

fn clear_statement(kind: TokenKind) -> String {
    let column = kind.column();
    format!("UPDATE oauth2_token SET {column} = '' WHERE {column} = $1")
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Split the schema file into executable statements, dropping comments.
fn schema_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            statements.push(current.trim().to_string());
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str, max_connections: u32, max_lifetime: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .max_lifetime(max_lifetime)
            .test_before_acquire(true)
            .connect(dsn)
            .await?;
        Ok(Self::new(pool))
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create missing tables and indexes.
    ///
    /// # Errors
    /// Returns the first failing statement's error.
    pub async fn migrate(&self) -> Result<()> {
        let statements = schema_statements(SCHEMA_SQL);
        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .instrument(db_span("DDL", statement))
                .await?;
        }
        info!(statements = statements.len(), "schema ensured");
        Ok(())
    }
}

#[async_trait]
impl TokenBackend for PgStore {
    async fn insert(&self, record: &CredentialRecord) -> Result<()> {
        let query = r"
            INSERT INTO oauth2_token (id, expired_at, code, access, refresh, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let (code, access, refresh) = record.tokens.columns();
        sqlx::query(query)
            .bind(record.id.0)
            .bind(record.expired_at)
            .bind(code)
            .bind(access)
            .bind(refresh)
            .bind(&record.payload)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    Error::Constraint(format!("duplicate identifier for credential {}", record.id))
                } else {
                    Error::Storage(err)
                }
            })?;
        Ok(())
    }

    async fn find_payload(
        &self,
        kind: TokenKind,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let query = find_statement(kind);
        let row = sqlx::query(&query)
            .bind(value)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(row.map(|row| row.get("payload")))
    }

    async fn clear(&self, kind: TokenKind, value: &str) -> Result<u64> {
        let query = clear_statement(kind);
        let result = sqlx::query(&query)
            .bind(value)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_gc_eligible(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = format!("SELECT COUNT(*) AS eligible FROM oauth2_token WHERE {GC_PREDICATE}");
        let row = sqlx::query(&query)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        let eligible: i64 = row.get("eligible");
        Ok(u64::try_from(eligible).unwrap_or_default())
    }

    async fn delete_gc_eligible(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = format!("DELETE FROM oauth2_token WHERE {GC_PREDICATE}");
        let result = sqlx::query(&query)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("DELETE", &query))
            .await?;
        Ok(result.rows_affected())
    }
}

fn client_info(row: &sqlx::postgres::PgRow) -> ClientInfo {
    ClientInfo {
        domain: row.get("domain"),
        remark: row.get("remark"),
        bound_address: row.get("bound_address"),
    }
}

impl PgStore {
    async fn user_where(&self, query: &str, binds: &[&str]) -> Result<Option<UserRecord>> {
        let mut statement = sqlx::query(query);
        for bind in binds {
            statement = statement.bind(*bind);
        }
        let row = statement
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let username: String = row.get("username");
        let clients = self.clients_by_username(&username).await?;
        Ok(Some(UserRecord {
            username,
            password: row.get("password"),
            totp_secret: row.get("totp_secret"),
            show_qrcode: row.get("show_qrcode"),
            is_admin: row.get("is_admin"),
            token: row.get("token"),
            clients,
        }))
    }
}

#[async_trait]
impl DirectoryBackend for PgStore {
    async fn clients_by_username(&self, username: &str) -> Result<Vec<ClientInfo>> {
        let query = r"
            SELECT domain, remark, bound_address
            FROM oauth2_client
            WHERE username = $1
            ORDER BY id
        ";
        let rows = sqlx::query(query)
            .bind(username)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(rows.iter().map(client_info).collect())
    }

    async fn user_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserRecord>> {
        let query = r"
            SELECT username, password, totp_secret, show_qrcode, is_admin, token
            FROM oauth2_users
            WHERE username = $1 AND password = $2
        ";
        self.user_where(query, &[username, password]).await
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let query = r"
            SELECT username, password, totp_secret, show_qrcode, is_admin, token
            FROM oauth2_users
            WHERE username = $1
        ";
        self.user_where(query, &[username]).await
    }

    async fn update_stored_token(&self, username: &str, token: &str) -> Result<()> {
        let query = "UPDATE oauth2_users SET token = $2 WHERE username = $1";
        let result = sqlx::query(query)
            .bind(username)
            .bind(token)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "user {username}: {} rows updated",
                result.rows_affected()
            )))
        }
    }

    async fn client_by_id(&self, id: &str) -> Result<Option<ClientRecord>> {
        let query = r"
            SELECT id, secret, domain, remark, username, bound_address
            FROM oauth2_client
            WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(row.map(|row| ClientRecord {
            id: row.get("id"),
            secret: row.get("secret"),
            domain: row.get("domain"),
            remark: row.get("remark"),
            username: row.get("username"),
            bound_address: row.get("bound_address"),
        }))
    }

    async fn all_clients(&self) -> Result<Vec<ClientInfo>> {
        let query = "SELECT domain, remark, bound_address FROM oauth2_client ORDER BY id";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(rows.iter().map(client_info).collect())
    }
}
