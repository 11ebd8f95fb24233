//! In-memory provider.
//!
//! A provider backed by a map instead of a remote API, used by the test
//! suite and as a reference implementation. Supports scripted one-shot
//! failures so partial-apply and resume behavior can be exercised, and a
//! call journal so tests can assert exactly which provider operations ran.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ProviderError, ProviderOp};
use crate::resource::TypePolicy;

use super::{Outputs, Provider, ResolvedInputs};

/// Map-backed provider for one resource type.
#[derive(Debug)]
pub struct MemoryProvider {
    type_name: String,
    policy: TypePolicy,
    objects: Mutex<BTreeMap<String, Outputs>>,
    failures: Mutex<BTreeMap<String, ProviderOp>>,
    journal: Mutex<Vec<(ProviderOp, String)>>,
}

impl MemoryProvider {
    /// Creates a provider for the given type name.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            policy: TypePolicy::default(),
            objects: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(BTreeMap::new()),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Sets the planning policy reported for this type.
    #[must_use]
    pub const fn with_policy(mut self, policy: TypePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Scripts a single failure: the next `operation` on `id` fails, and
    /// subsequent calls succeed again.
    pub async fn fail_once(&self, id: &str, operation: ProviderOp) {
        self.failures.lock().await.insert(id.to_string(), operation);
    }

    /// Returns the journal of provider calls in invocation order.
    pub async fn operations(&self) -> Vec<(ProviderOp, String)> {
        self.journal.lock().await.clone()
    }

    /// Returns the number of live objects.
    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    async fn record(&self, operation: ProviderOp, id: &str) {
        self.journal.lock().await.push((operation, id.to_string()));
    }

    async fn scripted_failure(
        &self,
        id: &str,
        operation: ProviderOp,
    ) -> std::result::Result<(), ProviderError> {
        let mut failures = self.failures.lock().await;
        if failures.get(id) == Some(&operation) {
            failures.remove(id);
            debug!("Scripted failure for {operation} on '{id}'");
            return Err(ProviderError::failed(id, operation, "scripted failure"));
        }
        Ok(())
    }

    fn outputs_for(&self, id: &str, inputs: &ResolvedInputs) -> Outputs {
        let mut outputs = inputs.clone();
        outputs.insert(
            String::from("uri"),
            serde_json::Value::String(format!("mem://{}/{id}", self.type_name)),
        );
        outputs
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn policy(&self) -> TypePolicy {
        self.policy
    }

    async fn create(
        &self,
        id: &str,
        inputs: &ResolvedInputs,
    ) -> std::result::Result<Outputs, ProviderError> {
        self.record(ProviderOp::Create, id).await;
        self.scripted_failure(id, ProviderOp::Create).await?;

        let outputs = self.outputs_for(id, inputs);
        self.objects
            .lock()
            .await
            .insert(id.to_string(), outputs.clone());
        Ok(outputs)
    }

    async fn read(&self, id: &str) -> std::result::Result<Option<Outputs>, ProviderError> {
        self.record(ProviderOp::Read, id).await;
        self.scripted_failure(id, ProviderOp::Read).await?;

        Ok(self.objects.lock().await.get(id).cloned())
    }

    async fn update(
        &self,
        id: &str,
        inputs: &ResolvedInputs,
    ) -> std::result::Result<Outputs, ProviderError> {
        self.record(ProviderOp::Update, id).await;
        self.scripted_failure(id, ProviderOp::Update).await?;

        let mut objects = self.objects.lock().await;
        if !objects.contains_key(id) {
            return Err(ProviderError::not_found(id, ProviderOp::Update));
        }

        let outputs = self.outputs_for(id, inputs);
        objects.insert(id.to_string(), outputs.clone());
        Ok(outputs)
    }

    async fn delete(&self, id: &str) -> std::result::Result<(), ProviderError> {
        self.record(ProviderOp::Delete, id).await;
        self.scripted_failure(id, ProviderOp::Delete).await?;

        if self.objects.lock().await.remove(id).is_none() {
            return Err(ProviderError::not_found(id, ProviderOp::Delete));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(pairs: &[(&str, &str)]) -> ResolvedInputs {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::Value::String((*v).to_string())))
            .collect()
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let provider = MemoryProvider::new("database");

        let outputs = provider
            .create("db", &inputs(&[("engine", "postgres")]))
            .await
            .expect("create");
        assert_eq!(outputs["uri"], serde_json::json!("mem://database/db"));

        let read = provider.read("db").await.expect("read");
        assert_eq!(read, Some(outputs));
    }

    #[tokio::test]
    async fn test_scripted_failure_fires_once() {
        let provider = MemoryProvider::new("database");
        provider.fail_once("db", ProviderOp::Create).await;

        let first = provider.create("db", &ResolvedInputs::new()).await;
        assert!(first.is_err());

        let second = provider.create("db", &ResolvedInputs::new()).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let provider = MemoryProvider::new("database");

        let err = provider.delete("ghost").await.expect_err("missing");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_journal_records_operations() {
        let provider = MemoryProvider::new("database");
        provider
            .create("db", &ResolvedInputs::new())
            .await
            .expect("create");
        provider.delete("db").await.expect("delete");

        assert_eq!(
            provider.operations().await,
            vec![
                (ProviderOp::Create, String::from("db")),
                (ProviderOp::Delete, String::from("db")),
            ]
        );
    }
}
