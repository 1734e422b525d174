//! Error taxonomy shared by the store, the directories and the authorizer.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Backend I/O failure, surfaced to the caller and never retried here.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The backend (or the store itself) rejected a write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// An update that must touch exactly one row did not.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed TOTP secret or similar caller-supplied input.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("token signing error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("qr rendering error: {0}")]
    Qr(String),
}

impl Error {
    /// `true` for the storage family (I/O and constraint failures).
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Constraint(_))
    }
}
