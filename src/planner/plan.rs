//! Plan types and construction.
//!
//! A plan is an ordered change-set honoring the dependency graph: deletions
//! first, in reverse dependency order (dependents before dependencies), then
//! creates and updates in forward topological order. A replace is expanded
//! into a delete followed by a create with an explicit prerequisite edge.
//!
//! Construction is pure and deterministic: identical (desired, previous)
//! inputs always yield an identical plan, and no provider is touched.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{ConvergeError, PlanError, Result};
use crate::graph::DependencyGraph;
use crate::resource::DesiredSet;
use crate::state::StateSnapshot;

use super::diff::{ChangeKind, DiffResult};

/// A complete ordered change-set.
#[derive(Debug)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Actions in execution order.
    pub actions: Vec<Action>,
}

/// A single planned action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Action type.
    pub kind: ActionKind,
    /// Resource id.
    pub resource_id: String,
    /// Resource type, for provider lookup.
    pub type_name: String,
    /// Why this action is in the plan.
    pub reason: String,
    /// Indices of actions that must be applied before this one.
    pub prerequisites: Vec<usize>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Create the resource.
    Create,
    /// Update the resource in place.
    Update,
    /// Delete the resource.
    Delete,
    /// No operation required.
    NoOp,
}

impl Plan {
    /// Builds a plan from a diff, ordered by the dependency graph.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::DependencyConflict`] if a resource slated for
    /// deletion is still referenced by the desired set. This is a dry-run
    /// safety check: it fires before any provider call.
    pub fn from_diff(
        diff: &DiffResult,
        graph: &DependencyGraph,
        desired: &DesiredSet,
        previous: &StateSnapshot,
    ) -> Result<Self> {
        let deleted: BTreeSet<&str> = diff
            .diffs
            .iter()
            .filter(|d| d.kind == ChangeKind::Delete)
            .map(|d| d.id.as_str())
            .collect();
        let replaced: BTreeSet<&str> = diff
            .diffs
            .iter()
            .filter(|d| d.kind == ChangeKind::Replace)
            .map(|d| d.id.as_str())
            .collect();

        Self::check_delete_conflicts(&deleted, desired)?;

        let mut actions = Vec::new();
        let mut delete_index: BTreeMap<&str, usize> = BTreeMap::new();

        // Removal phase: dependents before dependencies, per recorded state.
        let removals: BTreeSet<&str> = deleted.union(&replaced).copied().collect();
        for id in removal_order(&removals, previous) {
            let reason = if deleted.contains(id) {
                String::from("removed from desired set")
            } else {
                String::from("replace: inputs cannot be updated in place")
            };

            let type_name = previous
                .get(id)
                .map_or_else(String::new, |r| r.type_name.clone());

            // Within the removal set, dependents were emitted first.
            let mut prerequisites: Vec<usize> = removals
                .iter()
                .filter(|other| {
                    previous
                        .get(other)
                        .is_some_and(|o| o.dependencies.contains(id))
                })
                .filter_map(|other| delete_index.get(*other).copied())
                .collect();
            prerequisites.sort_unstable();
            prerequisites.dedup();

            delete_index.insert(id, actions.len());
            actions.push(Action {
                kind: ActionKind::Delete,
                resource_id: id.to_string(),
                type_name,
                reason,
                prerequisites,
            });
        }

        // Apply phase: forward topological order over the desired graph.
        let mut apply_index: BTreeMap<&str, usize> = BTreeMap::new();
        for id in graph.topo_order() {
            let Some(resource_diff) = diff.get(id) else {
                continue;
            };

            let (kind, reason) = match resource_diff.kind {
                ChangeKind::Create => (ActionKind::Create, String::from("not present in prior state")),
                ChangeKind::Update => (ActionKind::Update, String::from("inputs changed")),
                ChangeKind::Replace => (ActionKind::Create, String::from("recreating after replace")),
                ChangeKind::NoOp => (ActionKind::NoOp, String::from("inputs unchanged")),
                // Deletes were handled in the removal phase.
                ChangeKind::Delete => continue,
            };

            let mut prerequisites: Vec<usize> = graph
                .dependencies_of(id)
                .into_iter()
                .filter_map(|dep| apply_index.get(dep).copied())
                .collect();
            if resource_diff.kind == ChangeKind::Replace
                && let Some(&delete_idx) = delete_index.get(id)
            {
                prerequisites.push(delete_idx);
            }
            prerequisites.sort_unstable();

            let index = actions.len();
            if kind != ActionKind::NoOp {
                apply_index.insert(id, index);
            }
            actions.push(Action {
                kind,
                resource_id: id.to_string(),
                type_name: resource_diff.type_name.clone(),
                reason,
                prerequisites,
            });
        }

        debug!(
            "Planned {} action(s): {} delete, {} apply",
            actions.len(),
            delete_index.len(),
            actions.len() - delete_index.len()
        );

        Ok(Self {
            created_at: Utc::now(),
            actions,
        })
    }

    /// Rejects deletions of resources the desired set still depends on.
    fn check_delete_conflicts(deleted: &BTreeSet<&str>, desired: &DesiredSet) -> Result<()> {
        for id in deleted {
            let dependents: Vec<String> = desired
                .iter()
                .filter(|r| r.dependency_ids().contains(id))
                .map(|r| r.id.clone())
                .collect();

            if !dependents.is_empty() {
                return Err(ConvergeError::Plan(PlanError::DependencyConflict {
                    resource: (*id).to_string(),
                    dependents,
                }));
            }
        }
        Ok(())
    }

    /// Returns true if every action is a no-op.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.actions.iter().all(|a| a.kind == ActionKind::NoOp)
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Counts actions of one kind.
    #[must_use]
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    /// Returns `(kind, id)` pairs in plan order, for display and tests.
    #[must_use]
    pub fn summary(&self) -> Vec<(ActionKind, &str)> {
        self.actions
            .iter()
            .map(|a| (a.kind, a.resource_id.as_str()))
            .collect()
    }
}

/// Orders a removal set dependents-first using recorded dependencies.
///
/// Ties break by ascending id. Recorded dependencies were acyclic when
/// applied; if the bookkeeping is ever inconsistent the remainder is
/// appended in id order rather than dropped.
fn removal_order<'a>(removals: &BTreeSet<&'a str>, previous: &StateSnapshot) -> Vec<&'a str> {
    // dependents_left[id]: how many in-set resources still depend on id.
    let mut dependents_left: BTreeMap<&str, usize> = removals.iter().map(|id| (*id, 0)).collect();
    for id in removals {
        if let Some(record) = previous.get(id) {
            for dep in &record.dependencies {
                if let Some(count) = dependents_left.get_mut(dep.as_str()) {
                    *count += 1;
                }
            }
        }
    }

    let mut ready: BTreeSet<&str> = dependents_left
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(removals.len());
    let mut emitted: BTreeSet<&str> = BTreeSet::new();
    while let Some(&id) = ready.first() {
        ready.remove(id);
        order.push(id);
        emitted.insert(id);

        if let Some(record) = previous.get(id) {
            for dep in &record.dependencies {
                if let Some(count) = dependents_left.get_mut(dep.as_str()) {
                    *count -= 1;
                    if *count == 0
                        && let Some(&dep_id) = removals.get(dep.as_str())
                    {
                        ready.insert(dep_id);
                    }
                }
            }
        }
    }

    for id in removals {
        if !emitted.contains(id) {
            order.push(id);
        }
    }
    order
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.resource_id)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_converged() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::DiffEngine;
    use crate::resource::{Resource, TypePolicies, TypePolicy, Value};
    use crate::state::ResourceRecord;
    use std::collections::BTreeMap;

    fn plan_for(
        desired: &DesiredSet,
        previous: &StateSnapshot,
        policies: TypePolicies,
    ) -> Result<Plan> {
        let graph = DependencyGraph::build(desired, previous)?;
        let diff = DiffEngine::new()
            .with_policies(policies)
            .compute_diff(desired, previous);
        Plan::from_diff(&diff, &graph, desired, previous)
    }

    fn applied(resource: &Resource) -> ResourceRecord {
        ResourceRecord::from_applied(resource, BTreeMap::new(), None)
    }

    #[test]
    fn test_scenario_db_cache_app_create_order() {
        let desired = DesiredSet::from_resources([
            Resource::new("db", "database"),
            Resource::new("cache", "cache"),
            Resource::new("app", "service")
                .with_input("db_host", Value::reference("db", "uri"))
                .with_input("cache_host", Value::reference("cache", "uri")),
        ])
        .expect("set");

        let plan = plan_for(&desired, &StateSnapshot::new(), TypePolicies::new()).expect("plan");

        assert_eq!(
            plan.summary(),
            vec![
                (ActionKind::Create, "cache"),
                (ActionKind::Create, "db"),
                (ActionKind::Create, "app"),
            ]
        );
        assert_eq!(plan.actions[2].prerequisites, vec![0, 1]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let desired = DesiredSet::from_resources([
            Resource::new("db", "database"),
            Resource::new("app", "service").with_dependency("db"),
        ])
        .expect("set");

        let first = plan_for(&desired, &StateSnapshot::new(), TypePolicies::new()).expect("plan");
        let second = plan_for(&desired, &StateSnapshot::new(), TypePolicies::new()).expect("plan");

        assert_eq!(first.actions, second.actions);
    }

    #[test]
    fn test_converged_plan_is_all_noop() {
        let db = Resource::new("db", "database").with_input("engine", Value::literal("postgres"));
        let mut previous = StateSnapshot::new();
        previous.upsert(applied(&db));

        let desired = DesiredSet::from_resources([db]).expect("set");
        let plan = plan_for(&desired, &previous, TypePolicies::new()).expect("plan");

        assert!(plan.is_converged());
        assert_eq!(plan.count(ActionKind::NoOp), 1);
    }

    #[test]
    fn test_deletes_ordered_dependents_first() {
        let db = Resource::new("db", "database");
        let app = Resource::new("app", "service").with_input("host", Value::reference("db", "uri"));

        let mut previous = StateSnapshot::new();
        previous.upsert(applied(&db));
        previous.upsert(applied(&app));

        let plan = plan_for(&DesiredSet::new(), &previous, TypePolicies::new()).expect("plan");

        assert_eq!(
            plan.summary(),
            vec![(ActionKind::Delete, "app"), (ActionKind::Delete, "db")]
        );
        // db's delete waits for app's delete.
        assert_eq!(plan.actions[1].prerequisites, vec![0]);
    }

    #[test]
    fn test_delete_of_referenced_resource_conflicts() {
        let db = Resource::new("db", "database");
        let mut previous = StateSnapshot::new();
        previous.upsert(applied(&db));

        // db disappears from the desired set but app still references it.
        let desired = DesiredSet::from_resources([
            Resource::new("app", "service").with_input("host", Value::reference("db", "uri")),
        ])
        .expect("set");

        let err = plan_for(&desired, &previous, TypePolicies::new()).expect_err("conflict");
        match err {
            ConvergeError::Plan(PlanError::DependencyConflict { resource, dependents }) => {
                assert_eq!(resource, "db");
                assert_eq!(dependents, vec!["app"]);
            }
            other => panic!("expected dependency conflict, got {other}"),
        }
    }

    #[test]
    fn test_replace_expands_to_delete_then_create() {
        let old = Resource::new("db", "database").with_input("size", Value::literal(20));
        let mut previous = StateSnapshot::new();
        previous.upsert(applied(&old));

        let desired = DesiredSet::from_resources([
            Resource::new("db", "database").with_input("size", Value::literal(40)),
        ])
        .expect("set");
        let policies = TypePolicies::from([(String::from("database"), TypePolicy::immutable())]);

        let plan = plan_for(&desired, &previous, policies).expect("plan");

        assert_eq!(
            plan.summary(),
            vec![(ActionKind::Delete, "db"), (ActionKind::Create, "db")]
        );
        // The create waits for its own delete.
        assert_eq!(plan.actions[1].prerequisites, vec![0]);
    }

    #[test]
    fn test_update_keeps_forward_order() {
        let db = Resource::new("db", "database").with_input("size", Value::literal(20));
        let app = Resource::new("app", "service")
            .with_input("host", Value::reference("db", "uri"))
            .with_input("replicas", Value::literal(1));

        let mut previous = StateSnapshot::new();
        previous.upsert(applied(&db));
        previous.upsert(applied(&app));

        let desired = DesiredSet::from_resources([
            Resource::new("db", "database").with_input("size", Value::literal(40)),
            Resource::new("app", "service")
                .with_input("host", Value::reference("db", "uri"))
                .with_input("replicas", Value::literal(3)),
        ])
        .expect("set");

        let plan = plan_for(&desired, &previous, TypePolicies::new()).expect("plan");

        assert_eq!(
            plan.summary(),
            vec![(ActionKind::Update, "db"), (ActionKind::Update, "app")]
        );
        assert_eq!(plan.actions[1].prerequisites, vec![0]);
    }
}
