//! In-memory engine double
//!
//! Mirrors the engine behaviors provisioning relies on: user directories per
//! database, access control once the first user exists, `NamespaceExists`
//! on duplicate collections, index option conflicts and unique-key
//! enforcement (sparse indexes skip documents without the field, otherwise
//! a missing field counts as `null`).

use std::collections::BTreeMap;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, Document};
use tokio::sync::RwLock;

use crate::db::backend::AdminBackend;
use crate::db::schemas::{IndexInfo, IndexSpec, RoleGrant, UserInfo, UserSpec};
use crate::secrets::Secret;
use crate::types::{ProvisionError, Result};

type Namespace = (String, String);

struct StoredUser {
    password: String,
    roles: Vec<RoleGrant>,
}

struct StoredCollection {
    documents: Vec<Document>,
    indexes: Vec<IndexInfo>,
}

impl StoredCollection {
    fn new() -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![IndexInfo {
                name: "_id_".to_string(),
                keys: doc! { "_id": 1 },
                unique: false,
                sparse: false,
            }],
        }
    }

    /// Check `document` against every unique index and the `_id` key
    fn check_unique(&self, namespace: &Namespace, document: &Document) -> Result<()> {
        let id = document.get("_id");
        if id.is_some() && self.documents.iter().any(|d| d.get("_id") == id) {
            return Err(duplicate_key(namespace, "_id_", id));
        }

        for index in self.indexes.iter().filter(|i| i.unique) {
            let Some(field) = index.single_field() else {
                continue;
            };
            let Some(value) = index_key(index, document, field) else {
                continue;
            };
            let clash = self
                .documents
                .iter()
                .any(|existing| index_key(index, existing, field).as_ref() == Some(&value));
            if clash {
                return Err(duplicate_key(namespace, &index.name, Some(&value)));
            }
        }
        Ok(())
    }
}

/// Value a document contributes to an index, `None` if it is left out
fn index_key(index: &IndexInfo, document: &Document, field: &str) -> Option<Bson> {
    match document.get(field) {
        Some(value) => Some(value.clone()),
        None if index.sparse => None,
        None => Some(Bson::Null),
    }
}

fn duplicate_key(namespace: &Namespace, index: &str, value: Option<&Bson>) -> ProvisionError {
    ProvisionError::Conflict(format!(
        "E11000 duplicate key error collection: {}.{} index: {} dup key: {}",
        namespace.0,
        namespace.1,
        index,
        value.cloned().unwrap_or(Bson::Null)
    ))
}

#[derive(Default)]
struct EngineState {
    users: BTreeMap<Namespace, StoredUser>,
    collections: BTreeMap<Namespace, StoredCollection>,
}

/// In-memory deployment with optional access control
#[derive(Clone)]
pub struct InMemoryBackend {
    state: Arc<RwLock<EngineState>>,
    access_control: bool,
    principal: Option<Namespace>,
}

impl InMemoryBackend {
    /// Deployment started with access control enabled
    ///
    /// Unauthenticated connections may run commands only until the first
    /// user exists.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(EngineState::default())),
            access_control: true,
            principal: None,
        }
    }

    /// Deployment without access control; authentication still checks
    /// credentials
    pub fn without_access_control() -> Self {
        Self {
            access_control: false,
            ..Self::new()
        }
    }

    /// Another unauthenticated connection to the same deployment
    pub fn connect(&self) -> Self {
        Self {
            state: self.state.clone(),
            access_control: self.access_control,
            principal: None,
        }
    }

    fn check_access(&self, state: &EngineState) -> Result<()> {
        if self.access_control && self.principal.is_none() && !state.users.is_empty() {
            return Err(ProvisionError::Auth(
                "command requires authentication".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn namespace(db: &str, name: &str) -> Namespace {
    (db.to_string(), name.to_string())
}

fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, value)| document.get(key) == Some(value))
}

#[async_trait::async_trait]
impl AdminBackend for InMemoryBackend {
    async fn find_user(&self, db: &str, username: &str) -> Result<Option<UserInfo>> {
        let state = self.state.read().await;
        self.check_access(&state)?;

        Ok(state.users.get(&namespace(db, username)).map(|user| UserInfo {
            username: username.to_string(),
            db: db.to_string(),
            roles: user.roles.clone(),
        }))
    }

    async fn create_user(&self, db: &str, user: &UserSpec) -> Result<()> {
        let mut state = self.state.write().await;
        self.check_access(&state)?;

        let key = namespace(db, &user.username);
        if state.users.contains_key(&key) {
            return Err(ProvisionError::Conflict(format!(
                "User \"{}@{}\" already exists",
                user.username, db
            )));
        }
        state.users.insert(
            key,
            StoredUser {
                password: user.password.expose().to_string(),
                roles: user.roles.clone(),
            },
        );
        Ok(())
    }

    async fn update_user_roles(
        &self,
        db: &str,
        username: &str,
        roles: &[RoleGrant],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        self.check_access(&state)?;

        let user = state
            .users
            .get_mut(&namespace(db, username))
            .ok_or_else(|| ProvisionError::Database(format!("User {}@{} not found", username, db)))?;
        user.roles = roles.to_vec();
        Ok(())
    }

    async fn authenticate(
        &self,
        db: &str,
        username: &str,
        password: &Secret,
    ) -> Result<Arc<dyn AdminBackend>> {
        let state = self.state.read().await;
        let key = namespace(db, username);
        match state.users.get(&key) {
            Some(user) if user.password == password.expose() => Ok(Arc::new(Self {
                state: self.state.clone(),
                access_control: self.access_control,
                principal: Some(key),
            })),
            _ => Err(ProvisionError::Auth("Authentication failed.".to_string())),
        }
    }

    async fn collection_exists(&self, db: &str, name: &str) -> Result<bool> {
        let state = self.state.read().await;
        self.check_access(&state)?;
        Ok(state.collections.contains_key(&namespace(db, name)))
    }

    async fn create_collection(&self, db: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        self.check_access(&state)?;

        let key = namespace(db, name);
        if state.collections.contains_key(&key) {
            return Err(ProvisionError::Conflict(format!(
                "Collection {}.{} already exists.",
                db, name
            )));
        }
        state.collections.insert(key, StoredCollection::new());
        Ok(())
    }

    async fn find_documents(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        self.check_access(&state)?;

        Ok(state
            .collections
            .get(&namespace(db, collection))
            .map(|c| {
                c.documents
                    .iter()
                    .filter(|d| matches_filter(d, &filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_document(&self, db: &str, collection: &str, mut document: Document) -> Result<()> {
        let mut state = self.state.write().await;
        self.check_access(&state)?;

        if !document.contains_key("_id") {
            document.insert("_id", ObjectId::new());
        }

        // Inserting into a missing collection creates it
        let key = namespace(db, collection);
        let stored = state
            .collections
            .entry(key.clone())
            .or_insert_with(StoredCollection::new);
        stored.check_unique(&key, &document)?;
        stored.documents.push(document);
        Ok(())
    }

    async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<IndexInfo>> {
        let state = self.state.read().await;
        self.check_access(&state)?;

        Ok(state
            .collections
            .get(&namespace(db, collection))
            .map(|c| c.indexes.clone())
            .unwrap_or_default())
    }

    async fn create_index(&self, db: &str, collection: &str, index: &IndexSpec) -> Result<()> {
        let mut state = self.state.write().await;
        self.check_access(&state)?;

        let key = namespace(db, collection);
        let stored = state
            .collections
            .entry(key.clone())
            .or_insert_with(StoredCollection::new);
        let wanted = IndexInfo::from_spec(index);

        if let Some(existing) = stored.indexes.iter().find(|i| i.keys == wanted.keys) {
            if *existing == wanted {
                return Ok(());
            }
            return Err(ProvisionError::Conflict(format!(
                "Index with name: {} already exists with different options",
                existing.name
            )));
        }
        if stored.indexes.iter().any(|i| i.name == wanted.name) {
            return Err(ProvisionError::Conflict(format!(
                "An existing index has the same name as the requested index: {}",
                wanted.name
            )));
        }

        // Building a unique index fails if current documents already collide
        let mut candidate = StoredCollection {
            documents: Vec::new(),
            indexes: vec![wanted.clone()],
        };
        for document in &stored.documents {
            candidate.check_unique(&key, document)?;
            candidate.documents.push(document.clone());
        }

        stored.indexes.push(wanted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn admin_spec() -> UserSpec {
        UserSpec::new("admin", Secret::new("pw"), vec![RoleGrant::root("admin")])
    }

    #[tokio::test]
    async fn test_access_control_closes_after_first_user() {
        let engine = InMemoryBackend::new();

        assert_ok!(engine.create_user("admin", &admin_spec()).await);

        let err = engine.collection_exists("abell", "server").await.unwrap_err();
        assert!(err.is_auth());

        let authed = engine
            .authenticate("admin", "admin", &Secret::new("pw"))
            .await
            .unwrap();
        assert!(!authed.collection_exists("abell", "server").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let engine = InMemoryBackend::new();
        engine.create_user("admin", &admin_spec()).await.unwrap();

        let result = engine.authenticate("admin", "admin", &Secret::new("nope")).await;
        assert!(result.err().is_some_and(|e| e.is_auth()));

        let result = engine.authenticate("abell", "admin", &Secret::new("pw")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_user_and_collection_conflict() {
        let engine = InMemoryBackend::without_access_control();

        engine.create_user("admin", &admin_spec()).await.unwrap();
        let err = engine.create_user("admin", &admin_spec()).await.unwrap_err();
        assert!(err.is_conflict());

        engine.create_collection("abell", "server").await.unwrap();
        let err = engine.create_collection("abell", "server").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_unique_index_null_handling() {
        let engine = InMemoryBackend::without_access_control();
        engine.create_collection("abell", "plain").await.unwrap();
        engine
            .create_index("abell", "plain", &IndexSpec::unique("abell_id"))
            .await
            .unwrap();

        // Non-sparse: a missing field is indexed as null
        assert_ok!(engine.insert_document("abell", "plain", doc! { "name": "a" }).await);
        assert_err!(engine.insert_document("abell", "plain", doc! { "name": "b" }).await);

        engine.create_collection("abell", "sparse").await.unwrap();
        engine
            .create_index("abell", "sparse", &IndexSpec::unique("abell_id").sparse())
            .await
            .unwrap();

        assert_ok!(engine.insert_document("abell", "sparse", doc! { "name": "a" }).await);
        assert_ok!(engine.insert_document("abell", "sparse", doc! { "name": "b" }).await);
        assert_ok!(engine.insert_document("abell", "sparse", doc! { "abell_id": "x" }).await);
        let err = engine
            .insert_document("abell", "sparse", doc! { "abell_id": "x" })
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("abell_id_unique"));
    }

    #[tokio::test]
    async fn test_create_index_is_idempotent_but_rejects_option_changes() {
        let engine = InMemoryBackend::without_access_control();
        let spec = IndexSpec::unique("abell_id");

        assert_ok!(engine.create_index("abell", "server", &spec).await);
        assert_ok!(engine.create_index("abell", "server", &spec).await);

        let changed = engine
            .create_index("abell", "server", &spec.clone().sparse())
            .await
            .unwrap_err();
        assert!(changed.is_conflict());

        let indexes = engine.list_indexes("abell", "server").await.unwrap();
        assert_eq!(indexes.len(), 2);
    }

    #[tokio::test]
    async fn test_unique_index_build_fails_on_existing_duplicates() {
        let engine = InMemoryBackend::without_access_control();
        engine
            .insert_document("abell", "server", doc! { "abell_id": "dup" })
            .await
            .unwrap();
        engine
            .insert_document("abell", "server", doc! { "abell_id": "dup" })
            .await
            .unwrap();

        let err = engine
            .create_index("abell", "server", &IndexSpec::unique("abell_id"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_find_documents_filters_by_equality() {
        let engine = InMemoryBackend::without_access_control();
        engine
            .insert_document("abell", "assetinfo", doc! { "type": "server" })
            .await
            .unwrap();
        engine
            .insert_document("abell", "assetinfo", doc! { "type": "switch" })
            .await
            .unwrap();

        let found = engine
            .find_documents("abell", "assetinfo", doc! { "type": "server" })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].contains_key("_id"));

        let none = engine
            .find_documents("other", "assetinfo", doc! {})
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
