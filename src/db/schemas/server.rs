//! Server asset records
//!
//! Operational documents written by the application. Provisioning only
//! creates the collection and its constraints.

use bson::Document;
use serde::{Deserialize, Serialize};

use super::index::{IndexSpec, IntoIndexes};

/// Collection name for server assets
pub const SERVER_COLLECTION: &str = "server";

/// Server asset document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ServerAsset {
    /// Abell-wide asset identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abell_id: Option<String>,

    #[serde(rename = "type", default = "default_type")]
    pub asset_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<String>,

    /// Managed and unmanaged keys
    #[serde(flatten)]
    pub properties: Document,
}

fn default_type() -> String {
    SERVER_COLLECTION.to_string()
}

impl ServerAsset {
    pub fn new(abell_id: Option<&str>) -> Self {
        Self {
            abell_id: abell_id.map(str::to_string),
            asset_type: default_type(),
            ..Default::default()
        }
    }

    /// Unique constraint on `abell_id`
    pub fn abell_id_index() -> IndexSpec {
        // Assets without an abell_id must not collide with each other
        IndexSpec::unique("abell_id").sparse()
    }
}

impl IntoIndexes for ServerAsset {
    fn into_indices() -> Vec<IndexSpec> {
        vec![Self::abell_id_index()]
    }
}
