//! abell-provision - bootstrap the Abell asset database on MongoDB
//!
//! Creates the admin and application users, the `assetinfo` metadata
//! collection with its `server` document, and the `server` collection with
//! its `abell_id` uniqueness constraint. Every step checks before it
//! creates, so the tool can be re-run against a provisioned deployment.
//!
//! ## Modules
//!
//! - **config**: CLI flags and environment
//! - **secrets**: password sources
//! - **db**: administrative command surface, MongoDB and in-memory backends
//! - **provision**: the ordered plan, its runner and post-run verification

pub mod config;
pub mod db;
pub mod provision;
pub mod secrets;
pub mod types;

pub use config::Args;
pub use provision::{ProvisionPlan, ProvisionReport, Provisioner};
pub use types::{ProvisionError, Result};
