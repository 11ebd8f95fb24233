//! The provider interface: the engine's only door to the outside world.
//!
//! A [`Provider`] implements create/read/update/delete for one resource
//! type. The engine never embeds vendor-specific logic; it only orchestrates
//! calls through this interface, in dependency order, with inputs already
//! resolved to concrete values. Retry policy belongs to provider
//! implementations, which know which of their failures are transient.

mod memory;

pub use memory::MemoryProvider;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ConvergeError, PlanError, ProviderError, Result};
use crate::resource::{TypePolicies, TypePolicy};

/// Inputs with every reference and secret substituted to a concrete value.
pub type ResolvedInputs = BTreeMap<String, serde_json::Value>;

/// Concrete outputs returned by a provider after an apply.
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// Interface implemented per resource type by an external collaborator.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The resource type this provider handles.
    fn type_name(&self) -> &str;

    /// Planning policy for this type.
    fn policy(&self) -> TypePolicy {
        TypePolicy::default()
    }

    /// Creates the resource and returns its concrete outputs.
    async fn create(
        &self,
        id: &str,
        inputs: &ResolvedInputs,
    ) -> std::result::Result<Outputs, ProviderError>;

    /// Reads the resource's current outputs, or `None` if it does not exist.
    async fn read(&self, id: &str) -> std::result::Result<Option<Outputs>, ProviderError>;

    /// Updates the resource in place and returns its new outputs.
    async fn update(
        &self,
        id: &str,
        inputs: &ResolvedInputs,
    ) -> std::result::Result<Outputs, ProviderError>;

    /// Deletes the resource.
    async fn delete(&self, id: &str) -> std::result::Result<(), ProviderError>;
}

/// Registry of providers, keyed by resource type name.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under its declared type name.
    ///
    /// A later registration for the same type replaces the earlier one.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers
            .insert(provider.type_name().to_string(), provider);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    /// Looks up the provider for a resource type.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UnknownType`] if no provider is registered.
    pub fn get(&self, type_name: &str, resource: &str) -> Result<Arc<dyn Provider>> {
        self.providers.get(type_name).cloned().ok_or_else(|| {
            ConvergeError::Plan(PlanError::UnknownType {
                type_name: type_name.to_string(),
                resource: resource.to_string(),
            })
        })
    }

    /// Returns true if a provider is registered for the type.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.providers.contains_key(type_name)
    }

    /// Collects the planning policies of all registered providers.
    #[must_use]
    pub fn policies(&self) -> TypePolicies {
        self.providers
            .iter()
            .map(|(type_name, provider)| (type_name.clone(), provider.policy()))
            .collect()
    }

    /// Returns the registered type names in ascending order.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
