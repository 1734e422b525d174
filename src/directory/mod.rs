//! Client and user directories.
//!
//! Records are administered out of band; this crate only reads them, apart
//! from storing the token issued at login.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::Result;

pub use memory::MemoryDirectory;

/// One tenant/application registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: String,
    /// Empty for clients that do not use client-credential flows.
    pub secret: String,
    pub domain: String,
    pub remark: String,
    /// Owning user.
    pub username: String,
    /// Caller address admitted for the owning user, empty when unbound.
    pub bound_address: String,
}

impl ClientRecord {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            domain: self.domain.clone(),
            remark: self.remark.clone(),
            bound_address: self.bound_address.clone(),
        }
    }
}

/// Directory view of a client, as listed to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ClientInfo {
    pub domain: String,
    pub remark: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub bound_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Base32 TOTP secret, empty when the second factor is not set up.
    #[serde(skip_serializing)]
    pub totp_secret: String,
    pub show_qrcode: bool,
    pub is_admin: bool,
    /// Last token issued to this user by the login flow.
    #[serde(skip_serializing)]
    pub token: String,
    pub clients: Vec<ClientInfo>,
}

impl UserRecord {
    #[must_use]
    pub fn second_factor_enabled(&self) -> bool {
        !self.totp_secret.is_empty()
    }
}

#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    /// Clients owned by `username`; empty when there are none.
    async fn clients_by_username(&self, username: &str) -> Result<Vec<ClientInfo>>;

    /// Exact match on username and stored password credential.
    async fn user_by_credentials(&self, username: &str, password: &str)
        -> Result<Option<UserRecord>>;

    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Store the token issued at login.
    ///
    /// # Errors
    /// `Error::NotFound` unless exactly one row was updated.
    async fn update_stored_token(&self, username: &str, token: &str) -> Result<()>;

    async fn client_by_id(&self, id: &str) -> Result<Option<ClientRecord>>;

    async fn all_clients(&self) -> Result<Vec<ClientInfo>>;
}
