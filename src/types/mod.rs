//! Shared types

pub mod error;

pub use error::{ProvisionError, Result};
