//! Post-provisioning checks
//!
//! Reads back users, metadata and indexes through an authenticated admin
//! session and reports each expectation separately.

use bson::doc;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::schemas::{AssetInfoDoc, RoleGrant, UserSpec, ASSET_INFO_COLLECTION, SERVER_COLLECTION};
use crate::db::Session;
use crate::provision::plan::ProvisionPlan;
use crate::types::{ProvisionError, Result};

/// A single expectation and whether it held
#[derive(Serialize, Clone, Debug)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Serialize, Clone, Debug, Default)]
pub struct VerificationReport {
    pub checks: Vec<Check>,
}

impl VerificationReport {
    pub fn is_success(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> Vec<&Check> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    /// Turn failed checks into an error
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let failed: Vec<String> = self
            .failures()
            .iter()
            .map(|c| format!("{} ({})", c.name, c.detail))
            .collect();
        Err(ProvisionError::Verification(failed.join("; ")))
    }
}

/// Check the deployment matches what `plan` provisions
///
/// `admin` must be authenticated; it is re-targeted per database.
pub async fn verify_provisioned(admin: &Session, plan: &ProvisionPlan) -> Result<VerificationReport> {
    let settings = plan.settings();
    let admin_db = admin.select(settings.admin_db.clone());
    let app_db = admin.select(settings.app_db.clone());

    let mut report = VerificationReport::default();
    report
        .checks
        .push(check_user("admin user", &admin_db, plan.admin()).await?);
    report
        .checks
        .push(check_user("application user", &app_db, plan.app()).await?);
    report
        .checks
        .push(check_metadata(&app_db, &plan.asset_info()).await?);
    report.checks.push(check_server_index(&app_db, plan).await?);

    for check in &report.checks {
        if check.passed {
            info!(check = %check.name, "{}", check.detail);
        } else {
            warn!(check = %check.name, "{}", check.detail);
        }
    }
    Ok(report)
}

async fn check_user(name: &str, session: &Session, user: &UserSpec) -> Result<Check> {
    let Some(info) = session.find_user(&user.username).await? else {
        return Ok(Check::fail(
            name,
            format!("{}@{} not found", user.username, session.database()),
        ));
    };

    if info.has_exact_roles(&user.roles) {
        Ok(Check::pass(
            name,
            format!("{}@{} has {}", user.username, session.database(), roles(&user.roles)),
        ))
    } else {
        Ok(Check::fail(
            name,
            format!(
                "{}@{} has {}, expected {}",
                user.username,
                session.database(),
                roles(&info.roles),
                roles(&user.roles)
            ),
        ))
    }
}

async fn check_metadata(session: &Session, expected: &AssetInfoDoc) -> Result<Check> {
    const NAME: &str = "metadata document";

    let documents = session
        .find_documents(ASSET_INFO_COLLECTION, doc! {})
        .await?;
    let matching: Vec<_> = documents
        .into_iter()
        .filter(|d| d.get_str("type").ok() == Some(expected.asset_type.as_str()))
        .collect();

    match matching.as_slice() {
        [] => Ok(Check::fail(
            NAME,
            format!("no '{}' document in {}", expected.asset_type, ASSET_INFO_COLLECTION),
        )),
        [single] => {
            let stored = AssetInfoDoc::from_document(single.clone())?;
            if stored.same_keys(expected) {
                Ok(Check::pass(NAME, "key classification matches"))
            } else {
                Ok(Check::fail(
                    NAME,
                    format!(
                        "managed={:?} unmanaged={:?} system={:?}",
                        stored.managed_keys, stored.unmanaged_keys, stored.system_keys
                    ),
                ))
            }
        }
        many => Ok(Check::fail(
            NAME,
            format!("{} '{}' documents", many.len(), expected.asset_type),
        )),
    }
}

async fn check_server_index(session: &Session, plan: &ProvisionPlan) -> Result<Check> {
    const NAME: &str = "server uniqueness constraint";
    let spec = plan.server_index();

    let indexes = session.list_indexes(SERVER_COLLECTION).await?;
    match indexes.iter().find(|i| i.covers(&spec)) {
        Some(index) if !index.unique => {
            Ok(Check::fail(NAME, format!("{} is not unique", index.name)))
        }
        Some(index) if index.sparse != spec.sparse => Ok(Check::fail(
            NAME,
            format!(
                "{} has sparse={}, documents without {} need sparse={}",
                index.name, index.sparse, spec.field, spec.sparse
            ),
        )),
        Some(index) => Ok(Check::pass(
            NAME,
            format!("{} is unique on {}", index.name, spec.field),
        )),
        None => Ok(Check::fail(
            NAME,
            format!("no index on {}.{}", SERVER_COLLECTION, spec.field),
        )),
    }
}

fn roles(grants: &[RoleGrant]) -> String {
    let names: Vec<String> = grants.iter().map(ToString::to_string).collect();
    format!("[{}]", names.join(", "))
}
