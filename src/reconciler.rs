//! Reconciler for converging recorded state onto the desired set.
//!
//! This module implements the top-level loop: take the state lock around a
//! load, build the dependency graph, diff against the snapshot, produce a
//! plan, and execute it through the provider registry with per-action
//! checkpointing. A save rejected as stale triggers a bounded
//! reload-and-replan retry; provider failures are never silently retried.

use tracing::{debug, info, warn};

use crate::config::InputHasher;
use crate::error::{ConvergeError, Result};
use crate::graph::DependencyGraph;
use crate::planner::{ActionKind, DiffEngine, Executor, Plan};
use crate::provider::ProviderRegistry;
use crate::resource::DesiredSet;
use crate::state::{generate_holder_id, StateSnapshot, StateStore};

/// Delay between retryable reconciliation attempts.
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

/// Reconciler for converging state onto a desired set.
pub struct Reconciler<'a, S: StateStore> {
    /// The target configuration.
    desired: &'a DesiredSet,
    /// State store.
    store: &'a S,
    /// Provider registry.
    registry: &'a ProviderRegistry,
    /// Lock holder identity.
    holder: String,
    /// Configuration hasher.
    hasher: InputHasher,
    /// Maximum attempts for retryable failures (stale state, lock contention).
    max_attempts: u32,
    /// Executor worker bound.
    concurrency: usize,
}

/// Result of a reconciliation run.
#[derive(Debug, serde::Serialize)]
pub struct ReconcileOutcome {
    /// True if the run left state matching the desired set.
    pub converged: bool,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated in place.
    pub updated: usize,
    /// Number of resources replaced.
    pub replaced: usize,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources already converged.
    pub unchanged: usize,
    /// Attempts used.
    pub attempts: u32,
    /// Fingerprint of the desired configuration.
    pub desired_hash: String,
    /// Final snapshot version.
    pub state_version: u64,
}

/// Report of drift detection.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// Recorded resources whose remote outputs differ from the record.
    pub drifted: Vec<String>,
    /// Recorded resources that no longer exist remotely.
    pub missing: Vec<String>,
    /// Desired resources never applied.
    pub pending: Vec<String>,
    /// Recorded resources absent from the desired set.
    pub orphaned: Vec<String>,
    /// Total number of desired resources.
    pub total: usize,
}

impl<'a, S: StateStore> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(desired: &'a DesiredSet, store: &'a S, registry: &'a ProviderRegistry) -> Self {
        Self {
            desired,
            store,
            registry,
            holder: generate_holder_id(),
            hasher: InputHasher::new(),
            max_attempts: 3,
            concurrency: 1,
        }
    }

    /// Sets the maximum attempts for retryable failures.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the executor worker bound.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the lock holder identity.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Performs a full reconciliation.
    ///
    /// # Errors
    ///
    /// Planning errors fail fast before any provider call. A partial apply
    /// surfaces as [`crate::error::ApplyError::PartialApply`] with state
    /// already persisted up to the halt. Stale-state conflicts are retried
    /// up to the attempt bound.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let desired_hash = self.hasher.hash_desired_set(self.desired);
        info!(
            "Starting reconciliation of {} resource(s) (config {})",
            self.desired.len(),
            self.hasher.short_hash(&desired_hash)
        );

        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            debug!("Reconciliation attempt {}/{}", attempt, self.max_attempts);

            match self.reconcile_once(&desired_hash, attempt).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!("Attempt {attempt} hit a retryable conflict: {err}");
                    last_error = Some(err);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ConvergeError::internal("reconciliation exhausted attempts")))
    }

    /// Performs a single reconciliation attempt.
    async fn reconcile_once(&self, desired_hash: &str, attempt: u32) -> Result<ReconcileOutcome> {
        let mut snapshot = self.load_locked().await?;

        let graph = DependencyGraph::build(self.desired, &snapshot)?;
        let diff = DiffEngine::new()
            .with_policies(self.registry.policies())
            .compute_diff(self.desired, &snapshot);
        let plan = Plan::from_diff(&diff, &graph, self.desired, &snapshot)?;

        info!(
            "Diff: {} create, {} update, {} replace, {} delete, {} unchanged",
            diff.creates, diff.updates, diff.replaces, diff.deletes, diff.unchanged
        );

        if plan.is_converged() {
            info!("No changes required - state is converged");
            return Ok(ReconcileOutcome {
                converged: true,
                created: 0,
                updated: 0,
                replaced: 0,
                deleted: 0,
                unchanged: diff.unchanged,
                attempts: attempt,
                desired_hash: desired_hash.to_string(),
                state_version: snapshot.version,
            });
        }

        // Fail fast before any mutation if a plan action has no provider.
        for action in &plan.actions {
            if action.kind != ActionKind::NoOp {
                drop(self.registry.get(&action.type_name, &action.resource_id)?);
            }
        }

        // Saves are serialized by the snapshot version check; the advisory
        // lock is never held across provider calls.
        let executor = Executor::new(self.registry)
            .with_concurrency(self.concurrency)
            .with_checkpoint(self.store);
        executor.apply(&plan, self.desired, &mut snapshot).await?;

        Ok(ReconcileOutcome {
            converged: true,
            created: diff.creates,
            updated: diff.updates,
            replaced: diff.replaces,
            deleted: diff.deletes,
            unchanged: diff.unchanged,
            attempts: attempt,
            desired_hash: desired_hash.to_string(),
            state_version: snapshot.version,
        })
    }

    /// Computes the plan without touching any provider.
    ///
    /// # Errors
    ///
    /// Returns planning-time errors (cycles, dangling references, delete
    /// conflicts); never mutates state.
    pub async fn plan_only(&self) -> Result<Plan> {
        let snapshot = self.store.load().await?.unwrap_or_default();

        let graph = DependencyGraph::build(self.desired, &snapshot)?;
        let diff = DiffEngine::new()
            .with_policies(self.registry.policies())
            .compute_diff(self.desired, &snapshot);
        Plan::from_diff(&diff, &graph, self.desired, &snapshot)
    }

    /// Checks for drift between recorded state and remote reality.
    ///
    /// # Errors
    ///
    /// Returns an error if a provider read fails.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!("Checking drift for {} resource(s)", self.desired.len());

        let snapshot = self.store.load().await?.unwrap_or_default();

        let mut drifted = Vec::new();
        let mut missing = Vec::new();
        let mut pending = Vec::new();

        for resource in self.desired {
            let Some(record) = snapshot.get(&resource.id) else {
                pending.push(resource.id.clone());
                continue;
            };

            let provider = self.registry.get(&record.type_name, &record.id)?;
            match provider
                .read(&record.id)
                .await
                .map_err(ConvergeError::Provider)?
            {
                None => missing.push(record.id.clone()),
                Some(outputs) if outputs != record.outputs => {
                    debug!("Resource {} drifted", record.id);
                    drifted.push(record.id.clone());
                }
                Some(_) => {}
            }
        }

        let orphaned: Vec<String> = snapshot
            .ids()
            .into_iter()
            .filter(|id| !self.desired.contains(id))
            .map(String::from)
            .collect();

        Ok(DriftReport {
            drifted,
            missing,
            pending,
            orphaned,
            total: self.desired.len(),
        })
    }

    /// Loads the snapshot with the advisory lock held around the read.
    async fn load_locked(&self) -> Result<StateSnapshot> {
        let lock = self.store.acquire_lock(&self.holder).await?;
        let loaded = self.store.load().await;
        self.store.release_lock(&lock.lock_id).await?;

        Ok(loaded?.unwrap_or_default())
    }
}

impl DriftReport {
    /// Returns true if recorded state matches both the desired set and
    /// remote reality.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.drifted.is_empty()
            && self.missing.is_empty()
            && self.pending.is_empty()
            && self.orphaned.is_empty()
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Reconciliation complete (attempt {}):", self.attempts)?;
        writeln!(f, "  Created:   {}", self.created)?;
        writeln!(f, "  Updated:   {}", self.updated)?;
        writeln!(f, "  Replaced:  {}", self.replaced)?;
        writeln!(f, "  Deleted:   {}", self.deleted)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;
        write!(f, "  State version: {}", self.state_version)
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_converged() {
            return write!(f, "No drift detected - state is converged");
        }

        writeln!(f, "Drift detected:")?;
        for id in &self.drifted {
            writeln!(f, "  ~ {id} (outputs differ)")?;
        }
        for id in &self.missing {
            writeln!(f, "  - {id} (missing remotely)")?;
        }
        for id in &self.pending {
            writeln!(f, "  + {id} (never applied)")?;
        }
        for id in &self.orphaned {
            writeln!(f, "  ! {id} (orphaned in state)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApplyError, ProviderOp};
    use crate::provider::{MemoryProvider, Provider};
    use crate::resource::{Resource, Value};
    use crate::state::LocalStateStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        database: Arc<MemoryProvider>,
        service: Arc<MemoryProvider>,
        registry: ProviderRegistry,
        store: LocalStateStore,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let database = Arc::new(MemoryProvider::new("database"));
        let service = Arc::new(MemoryProvider::new("service"));
        let registry = ProviderRegistry::new()
            .with(Arc::clone(&database) as Arc<dyn Provider>)
            .with(Arc::clone(&service) as Arc<dyn Provider>);
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        Fixture {
            database,
            service,
            registry,
            store,
            _temp: temp,
        }
    }

    fn stack() -> DesiredSet {
        DesiredSet::from_resources([
            Resource::new("db", "database").with_input("engine", Value::literal("postgres")),
            Resource::new("cache", "service").with_input("engine", Value::literal("redis")),
            Resource::new("app", "service")
                .with_input("db_host", Value::reference("db", "uri"))
                .with_input("cache_host", Value::reference("cache", "uri")),
        ])
        .expect("set")
    }

    #[tokio::test]
    async fn test_reconcile_creates_everything() {
        let fx = fixture();
        let desired = stack();

        let outcome = Reconciler::new(&desired, &fx.store, &fx.registry)
            .reconcile()
            .await
            .expect("reconcile");

        assert!(outcome.converged);
        assert_eq!(outcome.created, 3);
        assert_eq!(outcome.state_version, 3);

        let snapshot = fx.store.load().await.expect("load").expect("exists");
        assert_eq!(snapshot.ids(), vec!["app", "cache", "db"]);
    }

    #[tokio::test]
    async fn test_second_reconcile_is_converged_noop() {
        let fx = fixture();
        let desired = stack();

        let reconciler = Reconciler::new(&desired, &fx.store, &fx.registry);
        reconciler.reconcile().await.expect("first");

        let second = reconciler.reconcile().await.expect("second");
        assert!(second.converged);
        assert_eq!(second.created, 0);
        assert_eq!(second.unchanged, 3);
        // No further provider mutations.
        assert_eq!(fx.database.operations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_then_rerun_completes() {
        let fx = fixture();
        let desired = stack();

        fx.service.fail_once("app", ProviderOp::Create).await;

        let reconciler = Reconciler::new(&desired, &fx.store, &fx.registry);
        let err = reconciler.reconcile().await.expect_err("partial");
        assert!(matches!(
            err,
            ConvergeError::Apply(ApplyError::PartialApply { .. })
        ));

        // The store reflects the successes, so a rerun finishes the rest.
        let outcome = reconciler.reconcile().await.expect("rerun");
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.unchanged, 2);
    }

    #[tokio::test]
    async fn test_removed_resource_is_deleted() {
        let fx = fixture();
        let desired = stack();

        Reconciler::new(&desired, &fx.store, &fx.registry)
            .reconcile()
            .await
            .expect("create");

        // Drop the app; db and cache stay.
        let trimmed = DesiredSet::from_resources([
            Resource::new("db", "database").with_input("engine", Value::literal("postgres")),
            Resource::new("cache", "service").with_input("engine", Value::literal("redis")),
        ])
        .expect("set");

        let outcome = Reconciler::new(&trimmed, &fx.store, &fx.registry)
            .reconcile()
            .await
            .expect("delete app");
        assert_eq!(outcome.deleted, 1);

        let snapshot = fx.store.load().await.expect("load").expect("exists");
        assert!(!snapshot.contains("app"));
        assert_eq!(fx.service.object_count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_conflict_rejected_before_any_provider_call() {
        let fx = fixture();
        let desired = stack();

        Reconciler::new(&desired, &fx.store, &fx.registry)
            .reconcile()
            .await
            .expect("create");
        let db_calls = fx.database.operations().await.len();
        let service_calls = fx.service.operations().await.len();

        // db drops out of the desired set while app still references it.
        let conflicted = DesiredSet::from_resources([
            Resource::new("cache", "service").with_input("engine", Value::literal("redis")),
            Resource::new("app", "service")
                .with_input("db_host", Value::reference("db", "uri"))
                .with_input("cache_host", Value::reference("cache", "uri")),
        ])
        .expect("set");

        let err = Reconciler::new(&conflicted, &fx.store, &fx.registry)
            .reconcile()
            .await
            .expect_err("conflict");
        assert!(matches!(
            err,
            ConvergeError::Plan(crate::error::PlanError::DependencyConflict { .. })
        ));

        // Planning failed fast: not a single provider call was made.
        assert_eq!(fx.database.operations().await.len(), db_calls);
        assert_eq!(fx.service.operations().await.len(), service_calls);
    }

    #[tokio::test]
    async fn test_plan_only_makes_no_provider_calls() {
        let fx = fixture();
        let desired = stack();

        let plan = Reconciler::new(&desired, &fx.store, &fx.registry)
            .plan_only()
            .await
            .expect("plan");

        assert_eq!(plan.action_count(), 3);
        assert!(fx.database.operations().await.is_empty());
        assert!(fx.service.operations().await.is_empty());
        assert!(!fx.store.exists().await.expect("exists"));
    }

    #[tokio::test]
    async fn test_drift_detected_after_out_of_band_delete() {
        let fx = fixture();
        let desired = stack();

        let reconciler = Reconciler::new(&desired, &fx.store, &fx.registry);
        reconciler.reconcile().await.expect("create");

        // Someone deletes the db behind the engine's back.
        fx.database.delete("db").await.expect("out-of-band delete");

        let report = reconciler.check_drift().await.expect("drift");
        assert!(!report.is_converged());
        assert_eq!(report.missing, vec!["db"]);
        assert!(report.drifted.is_empty());
    }

    #[tokio::test]
    async fn test_app_receives_concrete_outputs() {
        let fx = fixture();
        let desired = stack();

        Reconciler::new(&desired, &fx.store, &fx.registry)
            .with_concurrency(2)
            .reconcile()
            .await
            .expect("reconcile");

        let app_outputs = fx.service.read("app").await.expect("read").expect("exists");
        assert_eq!(
            app_outputs.get("db_host"),
            Some(&serde_json::json!("mem://database/db"))
        );
        assert_eq!(
            app_outputs.get("cache_host"),
            Some(&serde_json::json!("mem://service/cache"))
        );
    }
}
