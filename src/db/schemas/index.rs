//! Index definitions

use bson::{doc, Bson, Document};
use mongodb::{options::IndexOptions, IndexModel};
use serde::Serialize;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<IndexSpec>;
}

/// An ascending single-field index to ensure on a collection
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
    pub unique: bool,
    /// Documents without the field are left out of the index
    pub sparse: bool,
}

impl IndexSpec {
    /// Unique index named `<field>_unique`
    pub fn unique(field: &str) -> Self {
        Self {
            name: format!("{}_unique", field),
            field: field.to_string(),
            unique: true,
            sparse: false,
        }
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Key document, e.g. `{ "abell_id": 1 }`
    pub fn keys(&self) -> Document {
        doc! { self.field.as_str(): 1 }
    }

    pub fn to_model(&self) -> IndexModel {
        IndexModel::builder()
            .keys(self.keys())
            .options(
                IndexOptions::builder()
                    .name(self.name.clone())
                    .unique(self.unique)
                    .sparse(self.sparse)
                    .build(),
            )
            .build()
    }
}

impl std::fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.field)?;
        if self.unique {
            write!(f, " (unique")?;
            if self.sparse {
                write!(f, ", sparse")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// An index as reported by the server
#[derive(Clone, Debug, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
    pub sparse: bool,
}

impl IndexInfo {
    pub fn from_model(model: IndexModel) -> Self {
        let options = model.options.unwrap_or_default();
        Self {
            name: options.name.unwrap_or_default(),
            keys: model.keys,
            unique: options.unique.unwrap_or(false),
            sparse: options.sparse.unwrap_or(false),
        }
    }

    pub fn from_spec(spec: &IndexSpec) -> Self {
        Self {
            name: spec.name.clone(),
            keys: spec.keys(),
            unique: spec.unique,
            sparse: spec.sparse,
        }
    }

    /// The field of an ascending single-field index
    pub fn single_field(&self) -> Option<&str> {
        if self.keys.len() != 1 {
            return None;
        }
        let (field, direction) = self.keys.iter().next()?;
        let ascending = match direction {
            Bson::Int32(v) => *v == 1,
            Bson::Int64(v) => *v == 1,
            Bson::Double(v) => *v == 1.0,
            _ => false,
        };
        ascending.then_some(field.as_str())
    }

    /// Whether this index is keyed on the same field as `spec`
    pub fn covers(&self, spec: &IndexSpec) -> bool {
        self.single_field() == Some(spec.field.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_spec() {
        let spec = IndexSpec::unique("abell_id").sparse();
        assert_eq!(spec.name, "abell_id_unique");
        assert_eq!(spec.keys(), doc! { "abell_id": 1 });
        assert_eq!(spec.to_string(), "abell_id (unique, sparse)");

        let model = spec.to_model();
        let options = model.options.unwrap();
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.sparse, Some(true));
    }

    #[test]
    fn test_covers_accepts_numeric_directions() {
        let spec = IndexSpec::unique("abell_id");
        let shell_created = IndexInfo {
            name: "abell_id_1".into(),
            keys: doc! { "abell_id": 1.0 },
            unique: true,
            sparse: false,
        };
        assert!(shell_created.covers(&spec));

        let descending = IndexInfo {
            keys: doc! { "abell_id": -1 },
            ..shell_created.clone()
        };
        assert!(!descending.covers(&spec));

        let compound = IndexInfo {
            keys: doc! { "abell_id": 1, "type": 1 },
            ..shell_created
        };
        assert!(!compound.covers(&spec));
    }
}
