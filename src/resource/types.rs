//! Resource and desired-set types.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ConfigError, ConvergeError, Result};

use super::value::Value;

/// A typed description of a single desired resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique name within a desired set.
    pub id: String,
    /// Resource type, matched against registered providers.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Declared inputs, by field name.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Explicit dependencies, in addition to those implied by references.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

/// Per-type planning policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypePolicy {
    /// When true, input changes force a replace (delete then create)
    /// instead of an in-place update.
    #[serde(default)]
    pub immutable_inputs: bool,
}

/// Policies keyed by resource type name.
pub type TypePolicies = BTreeMap<String, TypePolicy>;

/// The complete target configuration for a single run.
///
/// Resource ids are unique; insertion order is irrelevant, iteration is
/// always in ascending id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredSet {
    resources: BTreeMap<String, Resource>,
}

impl Resource {
    /// Creates a resource with no inputs or explicit dependencies.
    #[must_use]
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            inputs: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Adds an input field.
    #[must_use]
    pub fn with_input(mut self, field: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(field.into(), value);
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// Returns every `(field, resource, output)` reference in the inputs.
    #[must_use]
    pub fn references(&self) -> Vec<(&str, &str, &str)> {
        self.inputs
            .iter()
            .filter_map(|(field, value)| {
                value
                    .as_reference()
                    .map(|(resource, output)| (field.as_str(), resource, output))
            })
            .collect()
    }

    /// Returns the full dependency id set: referenced resources plus
    /// explicit `depends_on` entries, deduplicated and sorted.
    #[must_use]
    pub fn dependency_ids(&self) -> BTreeSet<&str> {
        let mut ids: BTreeSet<&str> = self
            .inputs
            .values()
            .filter_map(|v| v.as_reference().map(|(resource, _)| resource))
            .collect();
        ids.extend(self.depends_on.iter().map(String::as_str));
        ids
    }
}

impl TypePolicy {
    /// Policy for types whose inputs cannot be updated in place.
    #[must_use]
    pub const fn immutable() -> Self {
        Self {
            immutable_inputs: true,
        }
    }
}

impl DesiredSet {
    /// Creates an empty desired set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a desired set from resources, rejecting duplicate ids.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateResource`] if two resources share an id.
    pub fn from_resources(resources: impl IntoIterator<Item = Resource>) -> Result<Self> {
        let mut set = Self::new();
        for resource in resources {
            set.insert(resource)?;
        }
        Ok(set)
    }

    /// Inserts a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateResource`] if the id is already present.
    pub fn insert(&mut self, resource: Resource) -> Result<()> {
        if self.resources.contains_key(&resource.id) {
            return Err(ConvergeError::Config(ConfigError::DuplicateResource {
                id: resource.id,
            }));
        }
        self.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// Gets a resource by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Returns true if a resource with this id is present.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    /// Iterates resources in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Returns all ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns the number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the set holds no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl<'a> IntoIterator for &'a DesiredSet {
    type Item = &'a Resource;
    type IntoIter = std::collections::btree_map::Values<'a, String, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_ids_merge_references_and_explicit() {
        let resource = Resource::new("app", "service")
            .with_input("db_host", Value::reference("db", "endpoint"))
            .with_input("replicas", Value::literal(2))
            .with_dependency("cache");

        let deps = resource.dependency_ids();
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec!["cache", "db"]);
    }

    #[test]
    fn test_references_report_fields() {
        let resource = Resource::new("app", "service")
            .with_input("db_host", Value::reference("db", "endpoint"))
            .with_input("cache_host", Value::reference("cache", "endpoint"));

        let refs = resource.references();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&("db_host", "db", "endpoint")));
    }

    #[test]
    fn test_desired_set_rejects_duplicates() {
        let mut set = DesiredSet::new();
        set.insert(Resource::new("db", "database")).expect("first insert");

        let result = set.insert(Resource::new("db", "database"));
        assert!(matches!(
            result,
            Err(ConvergeError::Config(ConfigError::DuplicateResource { .. }))
        ));
    }

    #[test]
    fn test_desired_set_iterates_in_id_order() {
        let set = DesiredSet::from_resources([
            Resource::new("zebra", "t"),
            Resource::new("alpha", "t"),
            Resource::new("mango", "t"),
        ])
        .expect("build set");

        assert_eq!(set.ids(), vec!["alpha", "mango", "zebra"]);
    }
}
