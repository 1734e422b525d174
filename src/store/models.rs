use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Which identifier column an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Code,
    Access,
    Refresh,
}

impl TokenKind {
    /// Persisted column name.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Store-assigned record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialId(pub Uuid);

impl CredentialId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CredentialId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifiers still live on a record.
///
/// Revocation only ever moves a record towards `Cleared`; there is no
/// transition that brings an identifier back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSet {
    CodeOnly(String),
    AccessOnly(String),
    AccessAndRefresh { access: String, refresh: String },
    RefreshOnly(String),
    Cleared,
}

impl TokenSet {
    /// Rebuild the tagged state from the three persisted columns.
    ///
    /// # Errors
    /// Returns `Error::Constraint` when a code shares a row with access or
    /// refresh identifiers, which `create` never writes.
    pub fn from_columns(code: &str, access: &str, refresh: &str) -> Result<Self> {
        match (code.is_empty(), access.is_empty(), refresh.is_empty()) {
            (true, true, true) => Ok(Self::Cleared),
            (false, true, true) => Ok(Self::CodeOnly(code.to_string())),
            (true, false, true) => Ok(Self::AccessOnly(access.to_string())),
            (true, false, false) => Ok(Self::AccessAndRefresh {
                access: access.to_string(),
                refresh: refresh.to_string(),
            }),
            (true, true, false) => Ok(Self::RefreshOnly(refresh.to_string())),
            (false, _, _) => Err(Error::Constraint(
                "authorization code stored alongside access/refresh identifiers".to_string(),
            )),
        }
    }

    /// `(code, access, refresh)` column values, empty meaning absent.
    #[must_use]
    pub fn columns(&self) -> (&str, &str, &str) {
        match self {
            Self::CodeOnly(code) => (code, "", ""),
            Self::AccessOnly(access) => ("", access, ""),
            Self::AccessAndRefresh { access, refresh } => ("", access, refresh),
            Self::RefreshOnly(refresh) => ("", "", refresh),
            Self::Cleared => ("", "", ""),
        }
    }

    #[must_use]
    pub fn get(&self, kind: TokenKind) -> Option<&str> {
        let (code, access, refresh) = self.columns();
        let value = match kind {
            TokenKind::Code => code,
            TokenKind::Access => access,
            TokenKind::Refresh => refresh,
        };
        (!value.is_empty()).then_some(value)
    }

    /// State after clearing one identifier. Clearing an absent one is a no-op.
    #[must_use]
    pub fn revoke(self, kind: TokenKind) -> Self {
        match (self, kind) {
            (Self::CodeOnly(_), TokenKind::Code)
            | (Self::AccessOnly(_), TokenKind::Access)
            | (Self::RefreshOnly(_), TokenKind::Refresh) => Self::Cleared,
            (Self::AccessAndRefresh { refresh, .. }, TokenKind::Access) => {
                Self::RefreshOnly(refresh)
            }
            (Self::AccessAndRefresh { access, .. }, TokenKind::Refresh) => {
                Self::AccessOnly(access)
            }
            (state, _) => state,
        }
    }

    #[must_use]
    pub const fn is_cleared(&self) -> bool {
        matches!(self, Self::Cleared)
    }
}

/// One identifier handed out by the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expires_in: Duration,
}

impl Issued {
    #[must_use]
    pub fn new(value: impl Into<String>, created_at: DateTime<Utc>, expires_in: Duration) -> Self {
        Self {
            value: value.into(),
            created_at,
            expires_in,
        }
    }

    /// Saturates at the representable bounds instead of overflowing.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at
            .checked_add_signed(self.expires_in)
            .unwrap_or(if self.expires_in < Duration::zero() {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            })
    }
}

/// What a creation call carries: an authorization code, or an access token
/// with an optional refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode(Issued),
    AccessToken {
        access: Issued,
        refresh: Option<Issued>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
    pub grant: Grant,
    /// Serialized token metadata owned by the protocol engine.
    pub payload: String,
}

impl NewCredential {
    #[must_use]
    pub fn code(code: Issued, payload: impl Into<String>) -> Self {
        Self {
            grant: Grant::AuthorizationCode(code),
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn access(access: Issued, refresh: Option<Issued>, payload: impl Into<String>) -> Self {
        Self {
            grant: Grant::AccessToken { access, refresh },
            payload: payload.into(),
        }
    }

    /// Expiry of the most durable identifier present: refresh, then access, then code.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        match &self.grant {
            Grant::AuthorizationCode(code) => code.expires_at(),
            Grant::AccessToken {
                refresh: Some(refresh),
                ..
            } if !refresh.value.is_empty() => refresh.expires_at(),
            Grant::AccessToken { access, .. } => access.expires_at(),
        }
    }

    /// Identifier set written at creation.
    ///
    /// # Errors
    /// Returns `Error::Constraint` if the governing identifier is empty. An
    /// empty refresh value is treated as "no refresh token issued".
    pub fn token_set(&self) -> Result<TokenSet> {
        match &self.grant {
            Grant::AuthorizationCode(code) if !code.value.is_empty() => {
                Ok(TokenSet::CodeOnly(code.value.clone()))
            }
            Grant::AuthorizationCode(_) => Err(Error::Constraint(
                "authorization code must not be empty".to_string(),
            )),
            Grant::AccessToken { access, .. } if access.value.is_empty() => Err(
                Error::Constraint("access token must not be empty".to_string()),
            ),
            Grant::AccessToken {
                access,
                refresh: Some(refresh),
            } if !refresh.value.is_empty() => Ok(TokenSet::AccessAndRefresh {
                access: access.value.clone(),
                refresh: refresh.value.clone(),
            }),
            Grant::AccessToken { access, .. } => Ok(TokenSet::AccessOnly(access.value.clone())),
        }
    }
}

/// One persisted credential row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: CredentialId,
    pub tokens: TokenSet,
    pub expired_at: DateTime<Utc>,
    pub payload: String,
}

impl CredentialRecord {
    /// GC predicate: expired, or every identifier cleared.
    #[must_use]
    pub fn is_gc_eligible(&self, now: DateTime<Utc>) -> bool {
        self.expired_at <= now || self.tokens.is_cleared()
    }

    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expired_at > now
    }
}
