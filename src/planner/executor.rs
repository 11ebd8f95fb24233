//! Plan executor.
//!
//! Applies a plan through the provider registry, substituting reference
//! inputs with the concrete outputs of already-applied dependencies. The
//! ordering invariant guarantees those outputs exist.
//!
//! On a single resource failure nothing is rolled back: infrastructure
//! changes are costly and often irreversible. Already-applied resources stay
//! applied, the snapshot reflects exactly the successes, and the run halts
//! with a partial-apply error. A retry is computed from a fresh plan against
//! the updated snapshot, never by replaying actions.
//!
//! Execution is sequential by default. With a concurrency bound above one,
//! every action whose prerequisites are applied is dispatched to a bounded
//! worker pool; each action advances through pending, applying, and then
//! applied or failed. Cancellation is honored between dispatches, and
//! in-flight applies always run to completion so no resource is left in an
//! indeterminate remote state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{ApplyError, ConvergeError, Result};
use crate::provider::{Outputs, Provider, ProviderRegistry, ResolvedInputs};
use crate::resource::{DesiredSet, Resource, Value};
use crate::state::{ResourceRecord, StateSnapshot, StateStore};

use super::plan::{Action, ActionKind, Plan};

/// Conservative default worker bound for concurrent execution.
///
/// Provider APIs for real infrastructure are typically rate-limited, so the
/// pool stays small unless the caller knows better.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Cooperative cancellation handle for a running apply.
///
/// Cancellation takes effect between resource applications; an in-flight
/// single-resource apply is allowed to finish first.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

/// Per-action state machine used by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyPhase {
    Pending,
    Applying,
    Applied,
    Failed,
}

/// Result of a fully successful apply.
#[derive(Debug)]
pub struct ApplyReport {
    /// Resource ids applied in completion order (no-ops included).
    pub applied: Vec<String>,
    /// Number of actions that mutated remote state.
    pub changed: usize,
    /// Number of no-op actions.
    pub unchanged: usize,
}

/// Executor for plans.
pub struct Executor<'a> {
    /// Provider registry.
    registry: &'a ProviderRegistry,
    /// Optional store for persisting the snapshot after each success.
    checkpoint: Option<&'a dyn StateStore>,
    /// Worker bound; 1 means strictly sequential.
    concurrency: usize,
    /// Cancellation handle.
    cancel: CancelToken,
}

/// An owned, dispatchable provider call.
struct ProviderCall {
    provider: Arc<dyn Provider>,
    kind: ActionKind,
    resource_id: String,
    inputs: ResolvedInputs,
}

impl CancelToken {
    /// Creates a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl<'a> Executor<'a> {
    /// Creates a sequential executor over a provider registry.
    #[must_use]
    pub fn new(registry: &'a ProviderRegistry) -> Self {
        Self {
            registry,
            checkpoint: None,
            concurrency: 1,
            cancel: CancelToken::new(),
        }
    }

    /// Persists the snapshot through `store` after every successful action,
    /// so an interrupted run resumes from exactly where it halted.
    #[must_use]
    pub fn with_checkpoint(mut self, store: &'a dyn StateStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    /// Sets the worker bound. Values below 1 are clamped to 1.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = if concurrency == 0 { 1 } else { concurrency };
        self
    }

    /// Returns a handle for cancelling the run.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Applies the plan, mutating `snapshot` after each successful action.
    ///
    /// On failure the snapshot still reflects every success, so it can be
    /// saved and re-planned against.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::PartialApply`] when a resource apply fails,
    /// [`ApplyError::Cancelled`] when the run is cancelled, or a state error
    /// when a checkpoint save is rejected.
    pub async fn apply(
        &self,
        plan: &Plan,
        desired: &DesiredSet,
        snapshot: &mut StateSnapshot,
    ) -> Result<ApplyReport> {
        info!(
            "Applying plan: {} action(s), concurrency {}",
            plan.action_count(),
            self.concurrency
        );

        if self.concurrency <= 1 {
            self.apply_sequential(plan, desired, snapshot).await
        } else {
            self.apply_concurrent(plan, desired, snapshot).await
        }
    }

    /// Strictly in-order application.
    async fn apply_sequential(
        &self,
        plan: &Plan,
        desired: &DesiredSet,
        snapshot: &mut StateSnapshot,
    ) -> Result<ApplyReport> {
        let mut applied: Vec<String> = Vec::new();
        let mut changed = 0;

        for (index, action) in plan.actions.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Apply cancelled before action {index}");
                return Err(ConvergeError::Apply(ApplyError::Cancelled { applied }));
            }

            if action.kind == ActionKind::NoOp {
                debug!("Action {index}: '{}' is converged", action.resource_id);
                applied.push(action.resource_id.clone());
                continue;
            }

            let call = match self.prepare_call(action, desired, snapshot) {
                Ok(call) => call,
                Err(cause) => return Err(partial(applied, action, cause)),
            };

            match call.run().await {
                Ok(outputs) => {
                    record_result(action, outputs, desired, snapshot);
                    snapshot.advance();
                    self.save_checkpoint(snapshot).await?;
                    info!("Applied {} '{}'", action.kind, action.resource_id);
                    applied.push(action.resource_id.clone());
                    changed += 1;
                }
                Err(cause) => {
                    error!("Action {index} ({action}) failed: {cause}");
                    return Err(partial(applied, action, cause));
                }
            }
        }

        let unchanged = applied.len() - changed;
        info!("Apply complete: {changed} changed, {unchanged} unchanged");
        Ok(ApplyReport {
            applied,
            changed,
            unchanged,
        })
    }

    /// Bounded-pool application over independent DAG subtrees.
    async fn apply_concurrent(
        &self,
        plan: &Plan,
        desired: &DesiredSet,
        snapshot: &mut StateSnapshot,
    ) -> Result<ApplyReport> {
        let total = plan.actions.len();
        let mut phases = vec![ApplyPhase::Pending; total];
        let mut applied: Vec<String> = Vec::new();
        let mut changed = 0;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers: JoinSet<(usize, Result<Option<Outputs>>)> = JoinSet::new();

        // First provider/resolution failure; reported as a partial apply.
        let mut failure: Option<(String, ConvergeError)> = None;
        // Checkpoint or task failure; reported as-is.
        let mut fatal: Option<ConvergeError> = None;
        let mut cancelled = false;

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                warn!("Apply cancelled; letting in-flight actions finish");
                cancelled = true;
            }

            if failure.is_none() && fatal.is_none() && !cancelled {
                self.dispatch_ready(
                    plan,
                    desired,
                    snapshot,
                    &semaphore,
                    &mut workers,
                    &mut phases,
                    &mut applied,
                    &mut failure,
                );
            }

            // In-flight applies always run to completion.
            let Some(joined) = workers.join_next().await else {
                break;
            };
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    if fatal.is_none() {
                        fatal = Some(ConvergeError::internal(format!(
                            "apply task failed to complete: {join_err}"
                        )));
                    }
                    continue;
                }
            };

            let action = &plan.actions[index];
            match result {
                Ok(outputs) => {
                    record_result(action, outputs, desired, snapshot);
                    snapshot.advance();
                    if let Err(e) = self.save_checkpoint(snapshot).await {
                        error!("Checkpoint save failed: {e}");
                        if fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                    phases[index] = ApplyPhase::Applied;
                    info!("Applied {} '{}'", action.kind, action.resource_id);
                    applied.push(action.resource_id.clone());
                    changed += 1;
                }
                Err(cause) => {
                    error!("Action {index} ({action}) failed: {cause}");
                    phases[index] = ApplyPhase::Failed;
                    if failure.is_none() && fatal.is_none() {
                        failure = Some((action.resource_id.clone(), cause));
                    }
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if cancelled {
            return Err(ConvergeError::Apply(ApplyError::Cancelled { applied }));
        }
        if let Some((failed_at, cause)) = failure {
            return Err(ConvergeError::Apply(ApplyError::PartialApply {
                applied,
                failed_at,
                cause: Box::new(cause),
            }));
        }

        let unchanged = applied.len() - changed;
        info!("Apply complete: {changed} changed, {unchanged} unchanged");
        Ok(ApplyReport {
            applied,
            changed,
            unchanged,
        })
    }

    /// Dispatches every pending action whose prerequisites are applied,
    /// until the pool is saturated.
    ///
    /// Prerequisite indices always precede their dependents, so one forward
    /// scan reaches everything unlocked by earlier marks in the same pass.
    #[allow(clippy::too_many_arguments)]
    fn dispatch_ready(
        &self,
        plan: &Plan,
        desired: &DesiredSet,
        snapshot: &StateSnapshot,
        semaphore: &Arc<Semaphore>,
        workers: &mut JoinSet<(usize, Result<Option<Outputs>>)>,
        phases: &mut [ApplyPhase],
        applied: &mut Vec<String>,
        failure: &mut Option<(String, ConvergeError)>,
    ) {
        for index in 0..plan.actions.len() {
            if phases[index] != ApplyPhase::Pending {
                continue;
            }

            let action = &plan.actions[index];
            let ready = action
                .prerequisites
                .iter()
                .all(|&p| phases[p] == ApplyPhase::Applied);
            if !ready {
                continue;
            }

            if action.kind == ActionKind::NoOp {
                debug!("Action {index}: '{}' is converged", action.resource_id);
                phases[index] = ApplyPhase::Applied;
                applied.push(action.resource_id.clone());
                continue;
            }

            let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() else {
                break;
            };

            match self.prepare_call(action, desired, snapshot) {
                Ok(call) => {
                    phases[index] = ApplyPhase::Applying;
                    debug!("Dispatching action {index}: {action}");
                    workers.spawn(async move {
                        let _permit = permit;
                        (index, call.run().await)
                    });
                }
                Err(cause) => {
                    phases[index] = ApplyPhase::Failed;
                    *failure = Some((action.resource_id.clone(), cause));
                    break;
                }
            }
        }
    }

    /// Resolves inputs and binds the provider for one action.
    fn prepare_call(
        &self,
        action: &Action,
        desired: &DesiredSet,
        snapshot: &StateSnapshot,
    ) -> Result<ProviderCall> {
        let provider = self.registry.get(&action.type_name, &action.resource_id)?;

        let inputs = match action.kind {
            ActionKind::Create | ActionKind::Update => {
                let resource = desired.get(&action.resource_id).ok_or_else(|| {
                    ConvergeError::internal(format!(
                        "plan names '{}' but it is not in the desired set",
                        action.resource_id
                    ))
                })?;
                resolve_inputs(resource, snapshot)?
            }
            ActionKind::Delete | ActionKind::NoOp => ResolvedInputs::new(),
        };

        Ok(ProviderCall {
            provider,
            kind: action.kind,
            resource_id: action.resource_id.clone(),
            inputs,
        })
    }

    /// Persists the snapshot if a checkpoint store is configured.
    async fn save_checkpoint(&self, snapshot: &StateSnapshot) -> Result<()> {
        if let Some(store) = self.checkpoint {
            store.save(snapshot).await?;
        }
        Ok(())
    }
}

impl ProviderCall {
    /// Runs the provider call; `Some(outputs)` for create/update, `None` for
    /// delete.
    async fn run(self) -> Result<Option<Outputs>> {
        match self.kind {
            ActionKind::Create => self
                .provider
                .create(&self.resource_id, &self.inputs)
                .await
                .map(Some)
                .map_err(ConvergeError::Provider),
            ActionKind::Update => self
                .provider
                .update(&self.resource_id, &self.inputs)
                .await
                .map(Some)
                .map_err(ConvergeError::Provider),
            ActionKind::Delete => match self.provider.delete(&self.resource_id).await {
                Ok(()) => Ok(None),
                Err(e) if e.is_not_found() => {
                    debug!("'{}' already absent remotely", self.resource_id);
                    Ok(None)
                }
                Err(e) => Err(ConvergeError::Provider(e)),
            },
            ActionKind::NoOp => Ok(None),
        }
    }
}

/// Substitutes every input to a concrete value from recorded outputs.
fn resolve_inputs(resource: &Resource, snapshot: &StateSnapshot) -> Result<ResolvedInputs> {
    let mut resolved = ResolvedInputs::new();

    for (field, value) in &resource.inputs {
        let concrete = match value {
            Value::Literal(v) => v.clone(),
            Value::Secret(secret) => secret
                .reveal()
                .map(|s| serde_json::Value::String(s.to_string()))
                .ok_or_else(|| {
                    ConvergeError::Apply(ApplyError::SecretUnavailable {
                        resource: resource.id.clone(),
                        field: field.clone(),
                    })
                })?,
            Value::Reference { resource: target, output } => snapshot
                .get(target)
                .and_then(|record| record.output(output))
                .cloned()
                .ok_or_else(|| {
                    ConvergeError::Apply(ApplyError::MissingOutput {
                        resource: resource.id.clone(),
                        dependency: target.clone(),
                        output: output.clone(),
                    })
                })?,
        };
        resolved.insert(field.clone(), concrete);
    }

    Ok(resolved)
}

/// Folds a successful provider result into the snapshot.
fn record_result(
    action: &Action,
    outputs: Option<Outputs>,
    desired: &DesiredSet,
    snapshot: &mut StateSnapshot,
) {
    match outputs {
        Some(outputs) => {
            if let Some(resource) = desired.get(&action.resource_id) {
                let record =
                    ResourceRecord::from_applied(resource, outputs, snapshot.get(&resource.id));
                snapshot.upsert(record);
            } else {
                warn!(
                    "Applied '{}' has no desired resource to record",
                    action.resource_id
                );
            }
        }
        None => {
            snapshot.remove(&action.resource_id);
        }
    }
}

/// Builds the partial-apply error for a halt at `action`.
fn partial(applied: Vec<String>, action: &Action, cause: ConvergeError) -> ConvergeError {
    ConvergeError::Apply(ApplyError::PartialApply {
        applied,
        failed_at: action.resource_id.clone(),
        cause: Box::new(cause),
    })
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Applied {} action(s): {} changed, {} unchanged",
            self.applied.len(),
            self.changed,
            self.unchanged
        )
    }
}
