//! Provisioning sequence for the Abell database
//!
//! ## Steps
//!
//! 1. Select the admin database
//! 2. Ensure the admin user (`root`, `userAdminAnyDatabase`)
//! 3. Authenticate as the admin user
//! 4. Select the application database
//! 5. Ensure the application user (`readWrite`)
//! 6. Ensure the `assetinfo` collection
//! 7. Ensure the `server` metadata document
//! 8. Ensure the `server` collection
//! 9. Ensure the unique index on `server.abell_id`
//! 10. Ensure the unique index on `assetinfo.type`

pub mod plan;
pub mod runner;
pub mod verify;

pub use plan::{PlanSettings, ProvisionPlan, Step, StepSummary};
pub use runner::{ProvisionReport, Provisioner, StepOutcome, StepReport};
pub use verify::{verify_provisioned, Check, VerificationReport};
