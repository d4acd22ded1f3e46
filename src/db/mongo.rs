//! MongoDB implementation of the administrative commands
//!
//! Users are managed through `usersInfo`/`createUser`/`updateUser` commands,
//! the catalog through the driver's collection and index helpers.

use std::sync::Arc;

use bson::{doc, Bson, Document};
use futures_util::TryStreamExt;
use mongodb::{
    error::ErrorKind,
    options::{ClientOptions, Credential},
    Client,
};
use tracing::{debug, info};

use crate::db::backend::AdminBackend;
use crate::db::schemas::{IndexInfo, IndexSpec, RoleGrant, UserInfo, UserSpec};
use crate::secrets::Secret;
use crate::types::{ProvisionError, Result};

/// NamespaceNotFound
const NAMESPACE_NOT_FOUND: i32 = 26;

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoBackend {
    client: Client,
    options: ClientOptions,
}

impl MongoBackend {
    /// Connect and verify the deployment answers `ping`
    pub async fn connect(uri: &str, timeout_ms: u64) -> Result<Self> {
        info!("Connecting to MongoDB at {}", redact_uri(uri));

        // Bounded server selection so an unreachable deployment fails fast
        let timeout_uri = with_timeouts(uri, timeout_ms);
        let options = ClientOptions::parse(timeout_uri.as_str()).await?;

        let backend = Self::with_options(options)?;
        backend.ping().await?;

        info!("Connected to MongoDB");
        Ok(backend)
    }

    fn with_options(options: ClientOptions) -> Result<Self> {
        let client = Client::with_options(options.clone())?;
        Ok(Self { client, options })
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| match ProvisionError::from(e) {
                ProvisionError::Connectivity(msg) => {
                    ProvisionError::Connectivity(format!("MongoDB ping failed: {}", msg))
                }
                other => other,
            })?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AdminBackend for MongoBackend {
    async fn find_user(&self, db: &str, username: &str) -> Result<Option<UserInfo>> {
        let reply = self
            .client
            .database(db)
            .run_command(doc! { "usersInfo": { "user": username, "db": db } })
            .await?;

        let users = reply.get_array("users").map_err(|e| {
            ProvisionError::Database(format!("Malformed usersInfo reply: {}", e))
        })?;

        match users.first() {
            Some(Bson::Document(user)) => Ok(Some(bson::from_document(user.clone())?)),
            _ => Ok(None),
        }
    }

    async fn create_user(&self, db: &str, user: &UserSpec) -> Result<()> {
        let roles = bson::to_bson(&user.roles)?;
        self.client
            .database(db)
            .run_command(doc! {
                "createUser": user.username.as_str(),
                "pwd": user.password.expose(),
                "roles": roles,
            })
            .await?;
        debug!(db, user = %user.username, "createUser acknowledged");
        Ok(())
    }

    async fn update_user_roles(
        &self,
        db: &str,
        username: &str,
        roles: &[RoleGrant],
    ) -> Result<()> {
        let roles = bson::to_bson(roles)?;
        self.client
            .database(db)
            .run_command(doc! { "updateUser": username, "roles": roles })
            .await?;
        Ok(())
    }

    async fn authenticate(
        &self,
        db: &str,
        username: &str,
        password: &Secret,
    ) -> Result<Arc<dyn AdminBackend>> {
        let mut options = self.options.clone();
        options.credential = Some(
            Credential::builder()
                .username(username.to_string())
                .password(password.expose().to_string())
                .source(db.to_string())
                .build(),
        );
        let authenticated = Self::with_options(options)?;

        // The handshake runs on first use; connectionStatus forces it
        let status = authenticated
            .client
            .database(db)
            .run_command(doc! { "connectionStatus": 1 })
            .await?;

        let logged_in = status
            .get_document("authInfo")
            .and_then(|info| info.get_array("authenticatedUsers"))
            .map(|users| {
                users.iter().any(|u| {
                    u.as_document().is_some_and(|u| {
                        u.get_str("user").ok() == Some(username) && u.get_str("db").ok() == Some(db)
                    })
                })
            })
            .unwrap_or(false);

        if !logged_in {
            return Err(ProvisionError::Auth(format!(
                "{}@{} is not authenticated on the new connection",
                username, db
            )));
        }

        Ok(Arc::new(authenticated))
    }

    async fn collection_exists(&self, db: &str, name: &str) -> Result<bool> {
        let names = self
            .client
            .database(db)
            .list_collection_names()
            .filter(doc! { "name": name })
            .await?;
        Ok(!names.is_empty())
    }

    async fn create_collection(&self, db: &str, name: &str) -> Result<()> {
        self.client.database(db).create_collection(name).await?;
        Ok(())
    }

    async fn find_documents(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Vec<Document>> {
        let cursor = self
            .client
            .database(db)
            .collection::<Document>(collection)
            .find(filter)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_document(&self, db: &str, collection: &str, document: Document) -> Result<()> {
        self.client
            .database(db)
            .collection::<Document>(collection)
            .insert_one(document)
            .await?;
        Ok(())
    }

    async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<IndexInfo>> {
        let cursor = match self
            .client
            .database(db)
            .collection::<Document>(collection)
            .list_indexes()
            .await
        {
            Ok(cursor) => cursor,
            Err(e) if is_namespace_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let models: Vec<_> = cursor.try_collect().await?;
        Ok(models.into_iter().map(IndexInfo::from_model).collect())
    }

    async fn create_index(&self, db: &str, collection: &str, index: &IndexSpec) -> Result<()> {
        self.client
            .database(db)
            .collection::<Document>(collection)
            .create_index(index.to_model())
            .await?;
        Ok(())
    }
}

fn is_namespace_not_found(err: &mongodb::error::Error) -> bool {
    matches!(err.kind.as_ref(), ErrorKind::Command(cmd) if cmd.code == NAMESPACE_NOT_FOUND)
}

/// Append connection timeouts unless the URI already sets them
fn with_timeouts(uri: &str, timeout_ms: u64) -> String {
    let mut params = Vec::new();
    if !uri.contains("serverSelectionTimeoutMS=") {
        params.push(format!("serverSelectionTimeoutMS={}", timeout_ms));
    }
    if !uri.contains("connectTimeoutMS=") {
        params.push(format!("connectTimeoutMS={}", timeout_ms));
    }
    if params.is_empty() {
        return uri.to_string();
    }

    let separator = if uri.contains('?') {
        "&"
    } else if uri.trim_start_matches("mongodb://").trim_start_matches("mongodb+srv://").contains('/') {
        "?"
    } else {
        "/?"
    };
    format!("{}{}{}", uri, separator, params.join("&"))
}

/// Hide userinfo in a connection string
pub fn redact_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", scheme, &rest[at + 1..]),
        None => uri.to_string(),
    }
}
