//! Pluggable reconstruction backends.
//!
//! A [`ReconstructionProvider`] turns a prepared [`JobWorkspace`] (images
//! extracted) into a set of output files. Providers are looked up by name in
//! a [`ProviderRegistry`] once at worker startup.

pub mod meshroom;
pub mod outputs;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ReconstructionConfig;
use crate::error::CoreError;
use crate::process::ExecutionError;
use crate::workspace::JobWorkspace;

pub use meshroom::MeshroomProvider;
pub use outputs::{locate_outputs, OutputSet};

/// Result of one successful provider run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub outputs: OutputSet,
    pub duration_ms: u64,
}

#[async_trait]
pub trait ReconstructionProvider: Send + Sync {
    /// Registry name, reported to callers in `stats.provider`.
    fn name(&self) -> &str;

    /// Run the reconstruction inside `workspace`.
    ///
    /// Must not return before every process it started has exited.
    async fn run(&self, workspace: &JobWorkspace) -> Result<ExecutionResult, ExecutionError>;
}

type ProviderFactory =
    Box<dyn Fn(&ReconstructionConfig) -> Result<Arc<dyn ReconstructionProvider>, CoreError> + Send + Sync>;

/// Name → constructor map for reconstruction providers.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(meshroom::PROVIDER_NAME, |config| {
            Ok(Arc::new(MeshroomProvider::new(config)))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ReconstructionConfig) -> Result<Arc<dyn ReconstructionProvider>, CoreError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Construct the provider named by `config.provider`.
    pub fn create(
        &self,
        config: &ReconstructionConfig,
    ) -> Result<Arc<dyn ReconstructionProvider>, CoreError> {
        let factory = self.factories.get(&config.provider).ok_or_else(|| {
            CoreError::Config(format!(
                "Unknown reconstruction provider '{}'. Available: {}",
                config.provider,
                self.names().join(", ")
            ))
        })?;
        factory(config)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
