//! Token lifecycle store.
//!
//! Credential rows are created by the protocol engine, looked up by any of
//! their identifiers, revoked one identifier at a time, and physically
//! reclaimed by the GC sweeper. Every mutation is a single conditional
//! statement on the backend, so no in-process locking is needed here.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::error::Result;

pub use memory::MemoryTokenBackend;
pub use models::{
    CredentialId, CredentialRecord, Grant, Issued, NewCredential, TokenKind, TokenSet,
};
pub use postgres::PgStore;

/// Storage capability required by [`TokenStore`] and the GC sweeper.
#[async_trait]
pub trait TokenBackend: Send + Sync {
    async fn insert(&self, record: &CredentialRecord) -> Result<()>;

    /// Payload of the live row whose `kind` column equals `value`.
    async fn find_payload(
        &self,
        kind: TokenKind,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>>;

    /// Match-then-clear of one identifier column. Returns the affected row count.
    async fn clear(&self, kind: TokenKind, value: &str) -> Result<u64>;

    async fn count_gc_eligible(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Hard delete of every row matching the GC predicate.
    async fn delete_gc_eligible(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn TokenBackend>,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    #[must_use]
    pub fn new(backend: Arc<dyn TokenBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    #[must_use]
    pub fn backend(&self) -> Arc<dyn TokenBackend> {
        Arc::clone(&self.backend)
    }

    /// Persist a new credential and return its store-assigned id.
    ///
    /// # Errors
    /// `Error::Constraint` if the grant has no governing identifier, or any
    /// backend failure.
    #[instrument(skip_all)]
    pub async fn create(&self, credential: NewCredential) -> Result<CredentialId> {
        let tokens = credential.token_set()?;
        let record = CredentialRecord {
            id: CredentialId::new(),
            expired_at: credential.expires_at(),
            tokens,
            payload: credential.payload,
        };
        self.backend.insert(&record).await?;
        debug!(id = %record.id, expired_at = %record.expired_at, "credential stored");
        Ok(record.id)
    }

    /// # Errors
    /// Backend I/O failure.
    pub async fn lookup_by_code(&self, code: &str) -> Result<Option<String>> {
        self.lookup(TokenKind::Code, code).await
    }

    /// # Errors
    /// Backend I/O failure.
    pub async fn lookup_by_access(&self, access: &str) -> Result<Option<String>> {
        self.lookup(TokenKind::Access, access).await
    }

    /// # Errors
    /// Backend I/O failure.
    pub async fn lookup_by_refresh(&self, refresh: &str) -> Result<Option<String>> {
        self.lookup(TokenKind::Refresh, refresh).await
    }

    /// # Errors
    /// Backend I/O failure. Unknown codes are not an error.
    pub async fn revoke_by_code(&self, code: &str) -> Result<()> {
        self.revoke(TokenKind::Code, code).await
    }

    /// # Errors
    /// Backend I/O failure. Unknown tokens are not an error.
    pub async fn revoke_by_access(&self, access: &str) -> Result<()> {
        self.revoke(TokenKind::Access, access).await
    }

    /// # Errors
    /// Backend I/O failure. Unknown tokens are not an error.
    pub async fn revoke_by_refresh(&self, refresh: &str) -> Result<()> {
        self.revoke(TokenKind::Refresh, refresh).await
    }

    #[instrument(skip(self, value))]
    async fn lookup(&self, kind: TokenKind, value: &str) -> Result<Option<String>> {
        // An empty value would match every cleared column.
        if value.is_empty() {
            return Ok(None);
        }
        self.backend.find_payload(kind, value, self.clock.now()).await
    }

    #[instrument(skip(self, value))]
    async fn revoke(&self, kind: TokenKind, value: &str) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        let cleared = self.backend.clear(kind, value).await?;
        debug!(cleared, "identifier revoked");
        Ok(())
    }
}
