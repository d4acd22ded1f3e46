//! Administrative command surface and explicit database sessions
//!
//! [`AdminBackend`] is the set of commands provisioning sends to the engine.
//! Every command names its target database; there is no ambient "current
//! database". [`Session`] pairs a backend with the selected database.

use std::sync::Arc;

use bson::Document;

use crate::db::schemas::{IndexInfo, IndexSpec, RoleGrant, UserInfo, UserSpec};
use crate::secrets::Secret;
use crate::types::Result;

/// Administrative commands of a document database
#[async_trait::async_trait]
pub trait AdminBackend: Send + Sync {
    /// Look up a user in a database's user directory
    async fn find_user(&self, db: &str, username: &str) -> Result<Option<UserInfo>>;

    /// Create a user with its role grants
    async fn create_user(&self, db: &str, user: &UserSpec) -> Result<()>;

    /// Replace the role grants of an existing user
    async fn update_user_roles(&self, db: &str, username: &str, roles: &[RoleGrant])
        -> Result<()>;

    /// Open an authenticated connection to the same deployment
    async fn authenticate(
        &self,
        db: &str,
        username: &str,
        password: &Secret,
    ) -> Result<Arc<dyn AdminBackend>>;

    async fn collection_exists(&self, db: &str, name: &str) -> Result<bool>;

    async fn create_collection(&self, db: &str, name: &str) -> Result<()>;

    /// Documents matching a top-level equality filter
    async fn find_documents(&self, db: &str, collection: &str, filter: Document)
        -> Result<Vec<Document>>;

    async fn insert_document(&self, db: &str, collection: &str, document: Document)
        -> Result<()>;

    /// Indexes of a collection; empty if the collection does not exist
    async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<IndexInfo>>;

    async fn create_index(&self, db: &str, collection: &str, index: &IndexSpec) -> Result<()>;
}

/// A backend bound to one selected database
#[derive(Clone)]
pub struct Session {
    backend: Arc<dyn AdminBackend>,
    database: String,
    authenticated_as: Option<String>,
}

impl Session {
    pub fn new(backend: Arc<dyn AdminBackend>, database: impl Into<String>) -> Self {
        Self {
            backend,
            database: database.into(),
            authenticated_as: None,
        }
    }

    /// Same connection, different database
    pub fn select(&self, database: impl Into<String>) -> Self {
        Self {
            backend: self.backend.clone(),
            database: database.into(),
            authenticated_as: self.authenticated_as.clone(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated_as.is_some()
    }

    /// User this session authenticated as, if any
    pub fn principal(&self) -> Option<&str> {
        self.authenticated_as.as_deref()
    }

    /// Authenticate against the selected database, returning a new session
    pub async fn authenticate(&self, username: &str, password: &Secret) -> Result<Session> {
        let backend = self
            .backend
            .authenticate(&self.database, username, password)
            .await?;
        Ok(Session {
            backend,
            database: self.database.clone(),
            authenticated_as: Some(format!("{}@{}", username, self.database)),
        })
    }

    pub async fn find_user(&self, username: &str) -> Result<Option<UserInfo>> {
        self.backend.find_user(&self.database, username).await
    }

    pub async fn create_user(&self, user: &UserSpec) -> Result<()> {
        self.backend.create_user(&self.database, user).await
    }

    pub async fn update_user_roles(&self, username: &str, roles: &[RoleGrant]) -> Result<()> {
        self.backend
            .update_user_roles(&self.database, username, roles)
            .await
    }

    pub async fn collection_exists(&self, name: &str) -> Result<bool> {
        self.backend.collection_exists(&self.database, name).await
    }

    pub async fn create_collection(&self, name: &str) -> Result<()> {
        self.backend.create_collection(&self.database, name).await
    }

    pub async fn find_documents(&self, collection: &str, filter: Document) -> Result<Vec<Document>> {
        self.backend
            .find_documents(&self.database, collection, filter)
            .await
    }

    pub async fn insert_document(&self, collection: &str, document: Document) -> Result<()> {
        self.backend
            .insert_document(&self.database, collection, document)
            .await
    }

    pub async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>> {
        self.backend.list_indexes(&self.database, collection).await
    }

    pub async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        self.backend
            .create_index(&self.database, collection, index)
            .await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.database)
            .field("authenticated_as", &self.authenticated_as)
            .finish()
    }
}
