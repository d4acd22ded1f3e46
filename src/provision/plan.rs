//! The ordered provisioning steps
//!
//! A plan is built once from settings plus a secret source and then handed to
//! the runner. Step order is fixed: the admin user must exist before it can
//! authenticate, and a database must be selected before it is populated.

use serde::Serialize;

use crate::db::schemas::{
    AssetInfoDoc, IndexSpec, IntoIndexes, RoleGrant, ServerAsset, UserSpec, ASSET_INFO_COLLECTION,
    SERVER_COLLECTION,
};
use crate::secrets::{Secret, SecretSource, ADMIN_PASSWORD, APP_PASSWORD};
use crate::types::{ProvisionError, Result};

/// Names that shape the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSettings {
    pub admin_db: String,
    pub admin_user: String,
    pub app_db: String,
    pub app_user: String,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            admin_db: "admin".to_string(),
            admin_user: "admin".to_string(),
            app_db: "abell".to_string(),
            app_user: "abell".to_string(),
        }
    }
}

/// One provisioning step
#[derive(Debug, Clone)]
pub enum Step {
    /// Make `database` the target of the following steps
    SelectDatabase { database: String },
    /// Create the user in the selected database unless it exists
    EnsureUser { user: UserSpec },
    /// Switch to a connection authenticated as this user
    Authenticate { username: String, password: Secret },
    EnsureCollection { collection: String },
    /// Insert the document unless one with the same `type` exists
    EnsureDocument {
        collection: String,
        document: AssetInfoDoc,
    },
    EnsureIndex { collection: String, index: IndexSpec },
}

impl Step {
    /// Human-readable description; never contains secrets
    pub fn describe(&self) -> String {
        match self {
            Step::SelectDatabase { database } => format!("select database '{}'", database),
            Step::EnsureUser { user } => {
                let roles: Vec<String> = user.roles.iter().map(ToString::to_string).collect();
                format!("ensure user '{}' [{}]", user.username, roles.join(", "))
            }
            Step::Authenticate { username, .. } => format!("authenticate as '{}'", username),
            Step::EnsureCollection { collection } => {
                format!("ensure collection '{}'", collection)
            }
            Step::EnsureDocument {
                collection,
                document,
            } => format!(
                "ensure '{}' metadata document in '{}'",
                document.asset_type, collection
            ),
            Step::EnsureIndex { collection, index } => {
                format!("ensure index on '{}.{}'", collection, index)
            }
        }
    }
}

/// Serializable view of a step, used by dry runs
#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub position: usize,
    pub description: String,
}

/// Fixed sequence that provisions the Abell database
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    settings: PlanSettings,
    admin: UserSpec,
    app: UserSpec,
    steps: Vec<Step>,
}

impl ProvisionPlan {
    /// Build the plan, resolving both passwords from `secrets`
    pub fn new(settings: PlanSettings, secrets: &dyn SecretSource) -> Result<Self> {
        validate_name("admin database", &settings.admin_db)?;
        validate_name("admin user", &settings.admin_user)?;
        validate_name("application database", &settings.app_db)?;
        validate_name("application user", &settings.app_user)?;

        let admin = UserSpec::new(
            settings.admin_user.clone(),
            secrets.get(ADMIN_PASSWORD)?,
            vec![
                RoleGrant::root(&settings.admin_db),
                RoleGrant::user_admin_any_database(&settings.admin_db),
            ],
        );
        let app = UserSpec::new(
            settings.app_user.clone(),
            secrets.get(APP_PASSWORD)?,
            vec![RoleGrant::read_write(&settings.app_db)],
        );

        let mut steps = vec![
            Step::SelectDatabase {
                database: settings.admin_db.clone(),
            },
            Step::EnsureUser {
                user: admin.clone(),
            },
            Step::Authenticate {
                username: admin.username.clone(),
                password: admin.password.clone(),
            },
            Step::SelectDatabase {
                database: settings.app_db.clone(),
            },
            Step::EnsureUser { user: app.clone() },
            Step::EnsureCollection {
                collection: ASSET_INFO_COLLECTION.to_string(),
            },
            Step::EnsureDocument {
                collection: ASSET_INFO_COLLECTION.to_string(),
                document: AssetInfoDoc::server(),
            },
            Step::EnsureCollection {
                collection: SERVER_COLLECTION.to_string(),
            },
        ];
        steps.extend(index_steps::<ServerAsset>(SERVER_COLLECTION));
        steps.extend(index_steps::<AssetInfoDoc>(ASSET_INFO_COLLECTION));

        Ok(Self {
            settings,
            admin,
            app,
            steps,
        })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn settings(&self) -> &PlanSettings {
        &self.settings
    }

    pub fn admin(&self) -> &UserSpec {
        &self.admin
    }

    pub fn app(&self) -> &UserSpec {
        &self.app
    }

    /// Metadata document the plan inserts
    pub fn asset_info(&self) -> AssetInfoDoc {
        AssetInfoDoc::server()
    }

    /// Index the plan puts on the operational collection
    pub fn server_index(&self) -> IndexSpec {
        ServerAsset::abell_id_index()
    }

    pub fn summary(&self) -> Vec<StepSummary> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| StepSummary {
                position: i + 1,
                description: step.describe(),
            })
            .collect()
    }
}

fn index_steps<T: IntoIndexes>(collection: &str) -> Vec<Step> {
    T::into_indices()
        .into_iter()
        .map(|index| Step::EnsureIndex {
            collection: collection.to_string(),
            index,
        })
        .collect()
}

fn validate_name(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ProvisionError::Config(format!("{} must not be empty", what)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MapSecretSource;

    fn secrets() -> MapSecretSource {
        MapSecretSource::new()
            .with(ADMIN_PASSWORD, "admin-pw")
            .with(APP_PASSWORD, "app-pw")
    }

    #[test]
    fn test_step_order() {
        let plan = ProvisionPlan::new(PlanSettings::default(), &secrets()).unwrap();
        let described: Vec<String> = plan.steps().iter().map(Step::describe).collect();

        assert_eq!(
            described,
            vec![
                "select database 'admin'",
                "ensure user 'admin' [root@admin, userAdminAnyDatabase@admin]",
                "authenticate as 'admin'",
                "select database 'abell'",
                "ensure user 'abell' [readWrite@abell]",
                "ensure collection 'assetinfo'",
                "ensure 'server' metadata document in 'assetinfo'",
                "ensure collection 'server'",
                "ensure index on 'server.abell_id (unique, sparse)'",
                "ensure index on 'assetinfo.type (unique)'",
            ]
        );
    }

    #[test]
    fn test_server_index_matches_planned_step() {
        let plan = ProvisionPlan::new(PlanSettings::default(), &secrets()).unwrap();
        let planned = plan.steps().iter().find_map(|step| match step {
            Step::EnsureIndex { collection, index } if collection == SERVER_COLLECTION => {
                Some(index.clone())
            }
            _ => None,
        });

        let index = plan.server_index();
        assert_eq!(planned.as_ref().map(|i| i.name.as_str()), Some("abell_id_unique"));
        assert_eq!(planned.map(|i| (i.unique, i.sparse)), Some((index.unique, index.sparse)));
        assert!(index.unique && index.sparse);
    }

    #[test]
    fn test_passwords_come_from_source_and_stay_hidden() {
        let plan = ProvisionPlan::new(PlanSettings::default(), &secrets()).unwrap();

        assert_eq!(plan.admin().password.expose(), "admin-pw");
        assert_eq!(plan.app().password.expose(), "app-pw");

        let dump = format!("{:?}", plan);
        assert!(!dump.contains("admin-pw"));
        assert!(!dump.contains("app-pw"));
    }

    #[test]
    fn test_custom_application_database() {
        let settings = PlanSettings {
            app_db: "inventory".into(),
            app_user: "inv".into(),
            ..Default::default()
        };
        let plan = ProvisionPlan::new(settings, &secrets()).unwrap();

        assert_eq!(plan.app().roles, vec![RoleGrant::read_write("inventory")]);
        assert_eq!(plan.summary()[3].description, "select database 'inventory'");
    }

    #[test]
    fn test_rejects_empty_names_and_missing_secrets() {
        let settings = PlanSettings {
            admin_user: " ".into(),
            ..Default::default()
        };
        let err = ProvisionPlan::new(settings, &secrets()).unwrap_err();
        assert!(matches!(err, ProvisionError::Config(_)));

        let only_admin = MapSecretSource::new().with(ADMIN_PASSWORD, "pw");
        let err = ProvisionPlan::new(PlanSettings::default(), &only_admin).unwrap_err();
        assert!(matches!(err, ProvisionError::Secret(_)));
    }
}
