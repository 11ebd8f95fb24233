//! Diff engine for comparing the desired set against recorded state.
//!
//! Inputs are compared structurally: literals by value, references
//! symbolically, secrets by content hash. Plaintext never enters a diff.

use tracing::debug;

use crate::resource::{DesiredSet, Resource, TypePolicies};
use crate::state::{ResourceRecord, StateSnapshot};

/// Engine for computing diffs between desired and recorded state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Per-type planning policies.
    policies: TypePolicies,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource id.
    pub id: String,
    /// Resource type.
    pub type_name: String,
    /// Type of change required.
    pub kind: ChangeKind,
    /// Field-level details about the change.
    pub details: Vec<DiffDetail>,
}

/// Type of change required to converge a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Resource must be created.
    Create,
    /// Resource must be updated in place.
    Update,
    /// Resource must be deleted and recreated.
    Replace,
    /// Resource must be deleted.
    Delete,
    /// Resource is unchanged.
    NoOp,
}

/// Detail about a changed input field.
///
/// Values are rendered through their redacting `Display`, so secrets appear
/// as hashes.
#[derive(Debug, Clone)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Previously recorded value.
    pub old_value: Option<String>,
    /// Newly declared value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug)]
pub struct DiffResult {
    /// All resource diffs, in ascending id order.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a diff engine with no per-type policies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-type planning policies.
    #[must_use]
    pub fn with_policies(mut self, policies: TypePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Computes the diff between the desired set and the prior snapshot.
    #[must_use]
    pub fn compute_diff(&self, desired: &DesiredSet, previous: &StateSnapshot) -> DiffResult {
        let mut diffs = Vec::new();

        // Check each desired resource against its record
        for resource in desired {
            let diff = match previous.get(&resource.id) {
                None => {
                    debug!("Resource {} needs to be created", resource.id);
                    ResourceDiff {
                        id: resource.id.clone(),
                        type_name: resource.type_name.clone(),
                        kind: ChangeKind::Create,
                        details: vec![],
                    }
                }
                Some(record) => self.compute_resource_diff(resource, record),
            };
            diffs.push(diff);
        }

        // Records with no desired counterpart are deleted
        for (id, record) in &previous.resources {
            if !desired.contains(id) {
                debug!("Resource {id} removed from desired set");
                diffs.push(ResourceDiff {
                    id: id.clone(),
                    type_name: record.type_name.clone(),
                    kind: ChangeKind::Delete,
                    details: vec![],
                });
            }
        }

        diffs.sort_by(|a, b| a.id.cmp(&b.id));

        let count = |kind: ChangeKind| diffs.iter().filter(|d| d.kind == kind).count();
        DiffResult {
            creates: count(ChangeKind::Create),
            updates: count(ChangeKind::Update),
            replaces: count(ChangeKind::Replace),
            deletes: count(ChangeKind::Delete),
            unchanged: count(ChangeKind::NoOp),
            diffs,
        }
    }

    /// Diffs one desired resource against its record.
    fn compute_resource_diff(&self, resource: &Resource, record: &ResourceRecord) -> ResourceDiff {
        // A type change can never be reconciled in place.
        if resource.type_name != record.type_name {
            debug!(
                "Resource {} changed type {} -> {}, replacing",
                resource.id, record.type_name, resource.type_name
            );
            return ResourceDiff {
                id: resource.id.clone(),
                type_name: resource.type_name.clone(),
                kind: ChangeKind::Replace,
                details: vec![DiffDetail {
                    field: String::from("type"),
                    old_value: Some(record.type_name.clone()),
                    new_value: Some(resource.type_name.clone()),
                }],
            };
        }

        if resource.inputs == record.inputs {
            debug!("Resource {} is up to date", resource.id);
            return ResourceDiff {
                id: resource.id.clone(),
                type_name: resource.type_name.clone(),
                kind: ChangeKind::NoOp,
                details: vec![],
            };
        }

        let immutable = self
            .policies
            .get(&resource.type_name)
            .is_some_and(|p| p.immutable_inputs);
        let kind = if immutable {
            ChangeKind::Replace
        } else {
            ChangeKind::Update
        };

        let details = Self::compute_detailed_diff(resource, record);
        debug!("Resource {} needs {:?} ({} field(s))", resource.id, kind, details.len());

        ResourceDiff {
            id: resource.id.clone(),
            type_name: resource.type_name.clone(),
            kind,
            details,
        }
    }

    /// Computes field-level differences between declared and recorded inputs.
    fn compute_detailed_diff(resource: &Resource, record: &ResourceRecord) -> Vec<DiffDetail> {
        let mut details = Vec::new();

        let fields: std::collections::BTreeSet<&String> = resource
            .inputs
            .keys()
            .chain(record.inputs.keys())
            .collect();

        for field in fields {
            let old = record.inputs.get(field);
            let new = resource.inputs.get(field);
            if old != new {
                details.push(DiffDetail {
                    field: field.clone(),
                    old_value: old.map(ToString::to_string),
                    new_value: new.map(ToString::to_string),
                });
            }
        }

        details
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.replaces > 0 || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Gets the diff for a resource id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| d.id == id)
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.kind)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{TypePolicy, Value};
    use std::collections::BTreeMap;

    fn applied(resource: &Resource) -> ResourceRecord {
        ResourceRecord::from_applied(resource, BTreeMap::new(), None)
    }

    #[test]
    fn test_absent_resource_is_created() {
        let desired = DesiredSet::from_resources([Resource::new("db", "database")]).expect("set");
        let diff = DiffEngine::new().compute_diff(&desired, &StateSnapshot::new());

        assert_eq!(diff.creates, 1);
        assert_eq!(diff.get("db").map(|d| d.kind), Some(ChangeKind::Create));
    }

    #[test]
    fn test_unchanged_resource_is_noop() {
        let resource = Resource::new("db", "database")
            .with_input("engine", Value::literal("postgres"))
            .with_input("password", Value::secret("hunter2"));

        let mut previous = StateSnapshot::new();
        previous.upsert(applied(&resource));

        let desired = DesiredSet::from_resources([resource]).expect("set");
        let diff = DiffEngine::new().compute_diff(&desired, &previous);

        assert!(!diff.has_changes());
        assert_eq!(diff.unchanged, 1);
    }

    #[test]
    fn test_changed_inputs_are_updated() {
        let old = Resource::new("db", "database").with_input("size", Value::literal(20));
        let mut previous = StateSnapshot::new();
        previous.upsert(applied(&old));

        let new = Resource::new("db", "database").with_input("size", Value::literal(40));
        let desired = DesiredSet::from_resources([new]).expect("set");
        let diff = DiffEngine::new().compute_diff(&desired, &previous);

        let resource_diff = diff.get("db").expect("diff");
        assert_eq!(resource_diff.kind, ChangeKind::Update);
        assert_eq!(resource_diff.details.len(), 1);
        assert_eq!(resource_diff.details[0].field, "size");
    }

    #[test]
    fn test_immutable_type_downgrades_to_replace() {
        let old = Resource::new("db", "database").with_input("size", Value::literal(20));
        let mut previous = StateSnapshot::new();
        previous.upsert(applied(&old));

        let new = Resource::new("db", "database").with_input("size", Value::literal(40));
        let desired = DesiredSet::from_resources([new]).expect("set");

        let policies = TypePolicies::from([(String::from("database"), TypePolicy::immutable())]);
        let diff = DiffEngine::new()
            .with_policies(policies)
            .compute_diff(&desired, &previous);

        assert_eq!(diff.get("db").map(|d| d.kind), Some(ChangeKind::Replace));
    }

    #[test]
    fn test_removed_resource_is_deleted() {
        let mut previous = StateSnapshot::new();
        previous.upsert(applied(&Resource::new("db", "database")));

        let diff = DiffEngine::new().compute_diff(&DesiredSet::new(), &previous);

        assert_eq!(diff.deletes, 1);
        assert_eq!(diff.get("db").map(|d| d.kind), Some(ChangeKind::Delete));
    }

    #[test]
    fn test_secret_change_detected_without_plaintext() {
        let old = Resource::new("db", "database").with_input("password", Value::secret("hunter2"));
        let mut previous = StateSnapshot::new();
        previous.upsert(applied(&old));

        let new = Resource::new("db", "database").with_input("password", Value::secret("hunter3"));
        let desired = DesiredSet::from_resources([new]).expect("set");
        let diff = DiffEngine::new().compute_diff(&desired, &previous);

        let resource_diff = diff.get("db").expect("diff");
        assert_eq!(resource_diff.kind, ChangeKind::Update);

        let detail = &resource_diff.details[0];
        let rendered = format!("{:?}{:?}", detail.old_value, detail.new_value);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("hunter3"));
    }

    #[test]
    fn test_type_change_forces_replace() {
        let mut previous = StateSnapshot::new();
        previous.upsert(applied(&Resource::new("store", "bucket")));

        let desired =
            DesiredSet::from_resources([Resource::new("store", "volume")]).expect("set");
        let diff = DiffEngine::new().compute_diff(&desired, &previous);

        assert_eq!(diff.get("store").map(|d| d.kind), Some(ChangeKind::Replace));
    }
}
