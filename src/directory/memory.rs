//! In-process directory, seeded at startup or from tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use super::{ClientInfo, ClientRecord, DirectoryBackend, UserRecord};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: RwLock<BTreeMap<String, UserRecord>>,
    clients: RwLock<Vec<ClientRecord>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user. Its `clients` list is derived from the client
    /// records and ignored here.
    pub fn upsert_user(&self, mut user: UserRecord) {
        user.clients.clear();
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.username.clone(), user);
    }

    /// Register a client.
    ///
    /// # Errors
    /// `Error::Constraint` if the id is taken or the owner does not exist.
    pub fn insert_client(&self, client: ClientRecord) -> Result<()> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        if !users.contains_key(&client.username) {
            return Err(Error::Constraint(format!(
                "client {} references unknown user {}",
                client.id, client.username
            )));
        }
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        if clients.iter().any(|existing| existing.id == client.id) {
            return Err(Error::Constraint(format!("duplicate client id {}", client.id)));
        }
        clients.push(client);
        Ok(())
    }

    fn owned_clients(&self, username: &str) -> Vec<ClientInfo> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|client| client.username == username)
            .map(ClientRecord::info)
            .collect()
    }

    fn with_clients(&self, user: Option<UserRecord>) -> Option<UserRecord> {
        user.map(|mut user| {
            user.clients = self.owned_clients(&user.username);
            user
        })
    }
}

#[async_trait]
impl DirectoryBackend for MemoryDirectory {
    async fn clients_by_username(&self, username: &str) -> Result<Vec<ClientInfo>> {
        Ok(self.owned_clients(username))
    }

    async fn user_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserRecord>> {
        let user = self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
            .filter(|user| user.password == password)
            .cloned();
        Ok(self.with_clients(user))
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let user = self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
            .cloned();
        Ok(self.with_clients(user))
    }

    async fn update_stored_token(&self, username: &str, token: &str) -> Result<()> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let user = users
            .get_mut(username)
            .ok_or_else(|| Error::NotFound(format!("user {username}")))?;
        user.token = token.to_string();
        Ok(())
    }

    async fn client_by_id(&self, id: &str) -> Result<Option<ClientRecord>> {
        Ok(self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|client| client.id == id)
            .cloned())
    }

    async fn all_clients(&self) -> Result<Vec<ClientInfo>> {
        Ok(self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(ClientRecord::info)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: &str, password: &str) -> UserRecord {
        UserRecord {
            username: username.to_string(),
            password: password.to_string(),
            totp_secret: String::new(),
            show_qrcode: false,
            is_admin: false,
            token: String::new(),
            clients: Vec::new(),
        }
    }

    fn client(id: &str, owner: &str, address: &str) -> ClientRecord {
        ClientRecord {
            id: id.to_string(),
            secret: "s3cret".to_string(),
            domain: format!("https://{id}.example"),
            remark: format!("{id} app"),
            username: owner.to_string(),
            bound_address: address.to_string(),
        }
    }

    fn directory() -> MemoryDirectory {
        let directory = MemoryDirectory::new();
        directory.upsert_user(user("alice", "pw"));
        directory.upsert_user(user("bob", "pw"));
        assert!(directory.insert_client(client("shop", "alice", "10.0.0.5")).is_ok());
        assert!(directory.insert_client(client("blog", "alice", "")).is_ok());
        directory
    }

    #[tokio::test]
    async fn clients_by_username_lists_owned_clients_only() {
        let directory = directory();
        let owned = directory.clients_by_username("alice").await.unwrap_or_default();
        assert_eq!(owned.len(), 2);
        assert_eq!(owned[0].bound_address, "10.0.0.5");
        assert!(directory
            .clients_by_username("bob")
            .await
            .is_ok_and(|clients| clients.is_empty()));
    }

    #[tokio::test]
    async fn credentials_must_match_exactly() {
        let directory = directory();
        let found = directory.user_by_credentials("alice", "pw").await.ok().flatten();
        assert_eq!(found.map(|user| user.clients.len()), Some(2));
        assert_eq!(
            directory.user_by_credentials("alice", "PW").await.ok().flatten(),
            None
        );
        assert_eq!(
            directory.user_by_credentials("carol", "pw").await.ok().flatten(),
            None
        );
    }

    #[tokio::test]
    async fn update_stored_token_requires_existing_user() {
        let directory = directory();
        assert!(directory.update_stored_token("alice", "jwt").await.is_ok());
        assert_eq!(
            directory
                .user_by_username("alice")
                .await
                .ok()
                .flatten()
                .map(|user| user.token),
            Some("jwt".to_string())
        );
        assert!(matches!(
            directory.update_stored_token("nobody", "jwt").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn client_ownership_must_reference_a_user() {
        let directory = directory();
        assert!(matches!(
            directory.insert_client(client("orphan", "carol", "")),
            Err(Error::Constraint(_))
        ));
        assert!(matches!(
            directory.insert_client(client("shop", "bob", "")),
            Err(Error::Constraint(_))
        ));
        let shop = directory.client_by_id("shop").await.ok().flatten();
        assert_eq!(shop.as_ref().map(ClientRecord::user_id), Some("alice"));
        assert_eq!(directory.all_clients().await.map(|all| all.len()).ok(), Some(2));
    }
}
