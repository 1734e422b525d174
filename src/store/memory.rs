//! In-process token backend, used for `memory://` deployments and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::models::{CredentialRecord, TokenKind, TokenSet};
use super::TokenBackend;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct MemoryTokenBackend {
    rows: Mutex<Vec<CredentialRecord>>,
}

impl MemoryTokenBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored row, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CredentialRecord> {
        self.rows().clone()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<CredentialRecord>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TokenBackend for MemoryTokenBackend {
    async fn insert(&self, record: &CredentialRecord) -> Result<()> {
        let mut rows = self.rows();
        for kind in [TokenKind::Code, TokenKind::Access, TokenKind::Refresh] {
            if let Some(value) = record.tokens.get(kind) {
                if rows.iter().any(|row| row.tokens.get(kind) == Some(value)) {
                    return Err(Error::Constraint(format!("duplicate {kind} identifier")));
                }
            }
        }
        if rows.iter().any(|row| row.id == record.id) {
            return Err(Error::Constraint(format!("duplicate id {}", record.id)));
        }
        rows.push(record.clone());
        Ok(())
    }

    async fn find_payload(
        &self,
        kind: TokenKind,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        Ok(self
            .rows()
            .iter()
            .find(|row| row.tokens.get(kind) == Some(value) && row.is_live(now))
            .map(|row| row.payload.clone()))
    }

    async fn clear(&self, kind: TokenKind, value: &str) -> Result<u64> {
        let mut rows = self.rows();
        let mut cleared = 0;
        for row in rows.iter_mut() {
            if row.tokens.get(kind) == Some(value) {
                row.tokens = std::mem::replace(&mut row.tokens, TokenSet::Cleared).revoke(kind);
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn count_gc_eligible(&self, now: DateTime<Utc>) -> Result<u64> {
        let count = self.rows().iter().filter(|row| row.is_gc_eligible(now)).count();
        Ok(count as u64)
    }

    async fn delete_gc_eligible(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|row| !row.is_gc_eligible(now));
        Ok((before - rows.len()) as u64)
    }
}
