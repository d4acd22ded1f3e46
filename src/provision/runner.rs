//! Executes a provisioning plan
//!
//! Steps run strictly in order. Each ensure step checks the current state
//! first and only creates what is missing, so a fully provisioned deployment
//! is left untouched. The first failing step stops the run and is named in
//! the returned error.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::schemas::{AssetInfoDoc, IndexSpec, UserSpec};
use crate::db::{AdminBackend, Session};
use crate::provision::plan::{ProvisionPlan, Step};
use crate::secrets::Secret;
use crate::types::{ProvisionError, Result};

/// What a step did
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    /// Database context switched
    Selected,
    /// Entity did not exist and was created
    Created,
    /// Entity existed with different role grants, which were replaced
    Updated,
    /// Entity already existed as required
    Unchanged,
    /// Entity could not be inspected before authentication
    Skipped,
    /// Session now authenticated
    Authenticated,
}

impl StepOutcome {
    /// Whether the step mutated the deployment
    pub fn is_change(&self) -> bool {
        matches!(self, StepOutcome::Created | StepOutcome::Updated)
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct StepReport {
    pub step: String,
    pub outcome: StepOutcome,
}

/// Outcome of every step, in execution order
#[derive(Serialize, Clone, Debug, Default)]
pub struct ProvisionReport {
    pub steps: Vec<StepReport>,
}

impl ProvisionReport {
    pub fn outcomes(&self) -> Vec<StepOutcome> {
        self.steps.iter().map(|s| s.outcome).collect()
    }

    /// Number of steps that changed the deployment
    pub fn changes(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.is_change()).count()
    }
}

/// Runs plans against a deployment
pub struct Provisioner {
    backend: Arc<dyn AdminBackend>,
}

impl Provisioner {
    pub fn new(backend: Arc<dyn AdminBackend>) -> Self {
        Self { backend }
    }

    /// Apply every step of the plan
    pub async fn run(&self, plan: &ProvisionPlan) -> Result<ProvisionReport> {
        let mut session: Option<Session> = None;
        let mut report = ProvisionReport::default();
        // Users whose lookup was refused before authentication
        let mut deferred: Vec<(usize, String, &UserSpec)> = Vec::new();
        let total = plan.steps().len();

        for (i, step) in plan.steps().iter().enumerate() {
            let description = step.describe();
            info!("[{}/{}] {}", i + 1, total, description);

            let outcome = self
                .apply(step, &mut session)
                .await
                .map_err(|e| e.in_step(description.clone()))?;

            match (step, outcome, session.as_ref()) {
                (Step::EnsureUser { user }, StepOutcome::Skipped, Some(current)) => {
                    deferred.push((i, current.database().to_string(), user));
                }
                (Step::Authenticate { .. }, StepOutcome::Authenticated, Some(current)) => {
                    for (index, database, user) in deferred.drain(..) {
                        let entry = &mut report.steps[index];
                        let rechecked = ensure_user(&current.select(database), user)
                            .await
                            .map_err(|e| e.in_step(entry.step.clone()))?;
                        debug!(step = %entry.step, outcome = ?rechecked, "Re-checked after authentication");
                        entry.outcome = rechecked;
                    }
                }
                _ => {}
            }

            debug!(step = %description, ?outcome, "Step finished");
            report.steps.push(StepReport {
                step: description,
                outcome,
            });
        }

        info!(
            "Provisioning finished: {} step(s), {} change(s)",
            report.steps.len(),
            report.changes()
        );
        Ok(report)
    }

    /// Open an admin session authenticated with the plan's admin credentials
    pub async fn authenticate_admin(&self, plan: &ProvisionPlan) -> Result<Session> {
        let admin = plan.admin();
        Session::new(self.backend.clone(), plan.settings().admin_db.clone())
            .authenticate(&admin.username, &admin.password)
            .await
    }

    async fn apply(&self, step: &Step, session: &mut Option<Session>) -> Result<StepOutcome> {
        if let Step::SelectDatabase { database } = step {
            let selected = match session.as_ref() {
                Some(current) => current.select(database.clone()),
                None => Session::new(self.backend.clone(), database.clone()),
            };
            *session = Some(selected);
            return Ok(StepOutcome::Selected);
        }

        let current = session
            .as_ref()
            .ok_or_else(|| ProvisionError::Config("no database selected".to_string()))?;

        match step {
            Step::SelectDatabase { .. } => Ok(StepOutcome::Selected),
            Step::EnsureUser { user } => ensure_user(current, user).await,
            Step::Authenticate { username, password } => {
                let authenticated = authenticate(current, username, password).await?;
                *session = Some(authenticated);
                Ok(StepOutcome::Authenticated)
            }
            Step::EnsureCollection { collection } => ensure_collection(current, collection).await,
            Step::EnsureDocument {
                collection,
                document,
            } => ensure_document(current, collection, document).await,
            Step::EnsureIndex { collection, index } => {
                ensure_index(current, collection, index).await
            }
        }
    }
}

async fn ensure_user(session: &Session, user: &UserSpec) -> Result<StepOutcome> {
    let existing = match session.find_user(&user.username).await {
        Ok(existing) => existing,
        // Access control is on and users exist; the run looks again once the
        // session is authenticated
        Err(e) if e.is_auth() && !session.is_authenticated() => {
            warn!(
                user = %user.username,
                db = session.database(),
                "User directory not readable before authentication, checking again after login"
            );
            return Ok(StepOutcome::Skipped);
        }
        Err(e) => return Err(e),
    };

    match existing {
        None => {
            session.create_user(user).await?;
            info!(user = %user.username, db = session.database(), "Created user");
            Ok(StepOutcome::Created)
        }
        Some(info) if info.has_exact_roles(&user.roles) => {
            debug!(user = %user.username, "User already has the expected roles");
            Ok(StepOutcome::Unchanged)
        }
        Some(info) => {
            warn!(
                user = %user.username,
                db = session.database(),
                current = ?info.roles,
                "User exists with different roles, replacing grants"
            );
            session
                .update_user_roles(&user.username, &user.sorted_roles())
                .await?;
            Ok(StepOutcome::Updated)
        }
    }
}

async fn authenticate(session: &Session, username: &str, password: &Secret) -> Result<Session> {
    let authenticated = session.authenticate(username, password).await?;
    info!(
        "Authenticated as {}",
        authenticated.principal().unwrap_or(username)
    );
    Ok(authenticated)
}

async fn ensure_collection(session: &Session, collection: &str) -> Result<StepOutcome> {
    if session.collection_exists(collection).await? {
        debug!(collection, "Collection already exists");
        return Ok(StepOutcome::Unchanged);
    }
    session.create_collection(collection).await?;
    info!(collection, db = session.database(), "Created collection");
    Ok(StepOutcome::Created)
}

async fn ensure_document(
    session: &Session,
    collection: &str,
    document: &AssetInfoDoc,
) -> Result<StepOutcome> {
    let existing = session
        .find_documents(collection, document.filter())
        .await?;

    let Some(first) = existing.into_iter().next() else {
        session
            .insert_document(collection, document.to_document()?)
            .await?;
        info!(collection, asset_type = %document.asset_type, "Inserted metadata document");
        return Ok(StepOutcome::Created);
    };

    // The application extends key lists at runtime; existing metadata is kept
    let stored = AssetInfoDoc::from_document(first)?;
    if !stored.same_keys(document) {
        warn!(
            collection,
            asset_type = %document.asset_type,
            "Metadata document differs from the provisioned defaults, leaving it as is"
        );
    }
    Ok(StepOutcome::Unchanged)
}

async fn ensure_index(session: &Session, collection: &str, index: &IndexSpec) -> Result<StepOutcome> {
    let indexes = session.list_indexes(collection).await?;

    if let Some(existing) = indexes.iter().find(|i| i.covers(index)) {
        // A non-sparse unique index rejects a second document without the field
        if existing.unique != index.unique || existing.sparse != index.sparse {
            return Err(ProvisionError::Conflict(format!(
                "index '{}' on {}.{} exists with unique={} sparse={}, expected unique={} sparse={}",
                existing.name,
                collection,
                index.field,
                existing.unique,
                existing.sparse,
                index.unique,
                index.sparse
            )));
        }
        debug!(collection, index = %existing.name, "Index already exists");
        return Ok(StepOutcome::Unchanged);
    }

    session.create_index(collection, index).await?;
    info!(collection, index = %index.name, "Created index");
    Ok(StepOutcome::Created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{RoleGrant, ASSET_INFO_COLLECTION, SERVER_COLLECTION};
    use crate::db::InMemoryBackend;
    use crate::provision::plan::PlanSettings;
    use crate::secrets::{MapSecretSource, ADMIN_PASSWORD, APP_PASSWORD};
    use bson::doc;

    fn plan_with(admin_password: &str) -> ProvisionPlan {
        let secrets = MapSecretSource::new()
            .with(ADMIN_PASSWORD, admin_password)
            .with(APP_PASSWORD, "app-pw");
        ProvisionPlan::new(PlanSettings::default(), &secrets).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_deployment() {
        let engine = InMemoryBackend::new();
        let report = Provisioner::new(Arc::new(engine.clone()))
            .run(&plan_with("admin-pw"))
            .await
            .unwrap();

        use StepOutcome::*;
        assert_eq!(
            report.outcomes(),
            vec![
                Selected,
                Created,
                Authenticated,
                Selected,
                Created,
                Created,
                Created,
                Created,
                Created,
                Created
            ]
        );
        assert_eq!(report.changes(), 7);
    }

    #[tokio::test]
    async fn test_rerun_is_a_no_op() {
        let engine = InMemoryBackend::new();
        let plan = plan_with("admin-pw");

        Provisioner::new(Arc::new(engine.clone()))
            .run(&plan)
            .await
            .unwrap();
        let report = Provisioner::new(Arc::new(engine.connect()))
            .run(&plan)
            .await
            .unwrap();

        assert_eq!(report.changes(), 0);
        assert_eq!(report.steps[1].outcome, StepOutcome::Unchanged);
        assert_eq!(report.steps[4].outcome, StepOutcome::Unchanged);

        let admin = Provisioner::new(Arc::new(engine.connect()))
            .authenticate_admin(&plan)
            .await
            .unwrap();
        let app = admin.select("abell");
        let docs = app
            .find_documents(ASSET_INFO_COLLECTION, doc! {})
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_admin_password_halts_before_app_database() {
        let fresh = InMemoryBackend::without_access_control();
        fresh
            .create_user(
                "admin",
                &UserSpec::new(
                    "admin",
                    Secret::new("other"),
                    vec![
                        RoleGrant::root("admin"),
                        RoleGrant::user_admin_any_database("admin"),
                    ],
                ),
            )
            .await
            .unwrap();

        let err = Provisioner::new(Arc::new(fresh.clone()))
            .run(&plan_with("admin-pw"))
            .await
            .unwrap_err();

        assert!(err.is_auth());
        assert_eq!(err.step(), Some("authenticate as 'admin'"));
        assert!(!fresh.collection_exists("abell", ASSET_INFO_COLLECTION).await.unwrap());
        assert!(fresh.find_user("abell", "abell").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_role_drift_is_reconciled() {
        let engine = InMemoryBackend::without_access_control();
        let plan = plan_with("admin-pw");
        engine
            .create_user(
                "abell",
                &UserSpec::new("abell", Secret::new("app-pw"), vec![RoleGrant::new("read", "abell")]),
            )
            .await
            .unwrap();

        let report = Provisioner::new(Arc::new(engine.clone()))
            .run(&plan)
            .await
            .unwrap();
        assert_eq!(report.steps[4].outcome, StepOutcome::Updated);

        let user = engine.find_user("abell", "abell").await.unwrap().unwrap();
        assert_eq!(user.roles, vec![RoleGrant::read_write("abell")]);
    }

    #[tokio::test]
    async fn test_non_unique_index_is_a_conflict() {
        let engine = InMemoryBackend::without_access_control();
        engine
            .create_index(
                "abell",
                SERVER_COLLECTION,
                &IndexSpec {
                    name: "abell_id_1".into(),
                    field: "abell_id".into(),
                    unique: false,
                    sparse: false,
                },
            )
            .await
            .unwrap();

        let err = Provisioner::new(Arc::new(engine))
            .run(&plan_with("admin-pw"))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(err.step().unwrap().starts_with("ensure index on 'server.abell_id"));
    }

    #[tokio::test]
    async fn test_non_sparse_unique_index_is_a_conflict() {
        let engine = InMemoryBackend::without_access_control();
        engine
            .create_index(
                "abell",
                SERVER_COLLECTION,
                &IndexSpec {
                    name: "abell_id_1".into(),
                    field: "abell_id".into(),
                    unique: true,
                    sparse: false,
                },
            )
            .await
            .unwrap();

        let err = Provisioner::new(Arc::new(engine))
            .run(&plan_with("admin-pw"))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(err.step().unwrap().starts_with("ensure index on 'server.abell_id"));
        assert!(err.to_string().contains("sparse=false"));
    }

    #[tokio::test]
    async fn test_admin_role_drift_is_reconciled_under_access_control() {
        let engine = InMemoryBackend::new();
        let plan = plan_with("admin-pw");
        engine
            .create_user(
                "admin",
                &UserSpec::new("admin", Secret::new("admin-pw"), vec![RoleGrant::root("admin")]),
            )
            .await
            .unwrap();

        let report = Provisioner::new(Arc::new(engine.connect()))
            .run(&plan)
            .await
            .unwrap();
        assert_eq!(report.steps[1].outcome, StepOutcome::Updated);

        let admin = Provisioner::new(Arc::new(engine.connect()))
            .authenticate_admin(&plan)
            .await
            .unwrap();
        let user = admin.find_user("admin").await.unwrap().unwrap();
        assert!(user.has_exact_roles(&plan.admin().roles));
    }

    #[tokio::test]
    async fn test_existing_metadata_is_kept() {
        let engine = InMemoryBackend::without_access_control();
        let mut customized = AssetInfoDoc::server();
        customized.managed_keys.push("rack".into());
        engine
            .insert_document("abell", ASSET_INFO_COLLECTION, customized.to_document().unwrap())
            .await
            .unwrap();

        let report = Provisioner::new(Arc::new(engine.clone()))
            .run(&plan_with("admin-pw"))
            .await
            .unwrap();
        assert_eq!(report.steps[6].outcome, StepOutcome::Unchanged);

        let docs = engine
            .find_documents("abell", ASSET_INFO_COLLECTION, doc! {})
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        let stored = AssetInfoDoc::from_document(docs[0].clone()).unwrap();
        assert!(stored.managed_keys.contains(&"rack".to_string()));
    }
}
