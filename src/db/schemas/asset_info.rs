//! Asset type metadata document
//!
//! One document per asset type classifying its fields as managed, unmanaged
//! or system keys. The application reads it by `type`.

use bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};

use super::index::{IndexSpec, IntoIndexes};
use crate::types::Result;

/// Collection name for asset type metadata
pub const ASSET_INFO_COLLECTION: &str = "assetinfo";

/// Metadata document stored in `assetinfo`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AssetInfoDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Asset type described by this document
    #[serde(rename = "type")]
    pub asset_type: String,

    /// Keys owned by the application
    #[serde(default)]
    pub managed_keys: Vec<String>,

    /// Keys supplied by users and stored as-is
    #[serde(default)]
    pub unmanaged_keys: Vec<String>,

    /// Keys every asset carries
    #[serde(default)]
    pub system_keys: Vec<String>,
}

impl AssetInfoDoc {
    /// Metadata for the `server` asset type
    pub fn server() -> Self {
        Self {
            _id: None,
            asset_type: "server".to_string(),
            managed_keys: strings(&["parent", "children", "asset_id"]),
            unmanaged_keys: strings(&["patches"]),
            system_keys: strings(&["owner", "cloud", "type", "abell_id"]),
        }
    }

    /// Filter selecting this document by asset type
    pub fn filter(&self) -> Document {
        bson::doc! { "type": self.asset_type.as_str() }
    }

    pub fn to_document(&self) -> Result<Document> {
        Ok(bson::to_document(self)?)
    }

    pub fn from_document(doc: Document) -> Result<Self> {
        Ok(bson::from_document(doc)?)
    }

    /// Whether the three key classifications are identical
    pub fn same_keys(&self, other: &AssetInfoDoc) -> bool {
        self.managed_keys == other.managed_keys
            && self.unmanaged_keys == other.unmanaged_keys
            && self.system_keys == other.system_keys
    }
}

impl IntoIndexes for AssetInfoDoc {
    fn into_indices() -> Vec<IndexSpec> {
        // At most one metadata document per asset type
        vec![IndexSpec::unique("type")]
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
