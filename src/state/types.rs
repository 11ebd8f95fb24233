//! State snapshot types.
//!
//! The snapshot is the engine's record of the last-applied resource graph:
//! one record per resource id with its recorded inputs (secrets as hashes),
//! concrete outputs, and resolved dependencies. The document is
//! self-describing: `format_version` tags the schema, while `version` is the
//! monotonic counter used for optimistic concurrency on save.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::resource::{Resource, Value};

/// Current version of the state document schema.
pub const STATE_FORMAT_VERSION: &str = "1.0";

/// The complete last-applied state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Schema tag for forward compatibility.
    pub format_version: String,
    /// Monotonically increasing counter, bumped once per successful save.
    pub version: u64,
    /// Applied resources, by id.
    pub resources: BTreeMap<String, ResourceRecord>,
    /// When the snapshot was last mutated.
    pub last_updated: DateTime<Utc>,
}

/// The applied record of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Resource id.
    pub id: String,
    /// Resource type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Inputs as declared at apply time; secrets carry only their hash.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Concrete outputs returned by the provider.
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Dependency ids resolved at apply time, used for delete ordering.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// When the resource was first applied.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl StateSnapshot {
    /// Creates a new empty snapshot at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION.to_string(),
            version: 0,
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Gets a record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceRecord> {
        self.resources.get(id)
    }

    /// Returns true if a record with this id exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    /// Adds or replaces a record.
    pub fn upsert(&mut self, record: ResourceRecord) {
        self.resources.insert(record.id.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record by id.
    pub fn remove(&mut self, id: &str) -> Option<ResourceRecord> {
        let removed = self.resources.remove(id);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Advances the version counter before a save.
    pub fn advance(&mut self) {
        self.version += 1;
        self.last_updated = Utc::now();
    }

    /// Returns all recorded ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resources are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRecord {
    /// Creates an empty record for a resource id and type.
    #[must_use]
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            type_name: type_name.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            dependencies: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds the record for a freshly applied resource.
    ///
    /// `created_at` is preserved from `previous` when the resource was
    /// updated rather than created.
    #[must_use]
    pub fn from_applied(
        resource: &Resource,
        outputs: BTreeMap<String, serde_json::Value>,
        previous: Option<&Self>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: resource.id.clone(),
            type_name: resource.type_name.clone(),
            inputs: resource.inputs.clone(),
            outputs,
            dependencies: resource
                .dependency_ids()
                .into_iter()
                .map(String::from)
                .collect(),
            created_at: previous.map_or(now, |p| p.created_at),
            updated_at: now,
        }
    }

    /// Gets a single output value.
    #[must_use]
    pub fn output(&self, field: &str) -> Option<&serde_json::Value> {
        self.outputs.get(field)
    }
}
