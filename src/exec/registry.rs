// src/exec/registry.rs

//! Startup wiring of backends.
//!
//! Backends are built from configuration through a factory table keyed by
//! [`BackendKind`], then collected into a [`BackendSet`] that keeps them in
//! registration order. Registration order is also the tie-break order of
//! the platform selector.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{FlowdagError, Result};
use crate::exec::backend::{Backend, BackendSpec, ComputingBackend};
use crate::exec::kernel::KernelRunner;
use crate::types::BackendKind;

pub type BackendFactory = fn(BackendSpec, Arc<dyn KernelRunner>) -> Arc<dyn ComputingBackend>;

fn build_tagged(spec: BackendSpec, kernel: Arc<dyn KernelRunner>) -> Arc<dyn ComputingBackend> {
    Arc::new(Backend::new(spec, kernel))
}

/// Constructor table for backend variants.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    factories: HashMap<BackendKind, BackendFactory>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(BackendKind::Cpu, build_tagged);
        registry.register(BackendKind::Accelerator, build_tagged);
        registry.register(BackendKind::Remote, build_tagged);
        registry
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the constructor used for `kind`.
    pub fn register(&mut self, kind: BackendKind, factory: BackendFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn build(
        &self,
        spec: BackendSpec,
        kernel: Arc<dyn KernelRunner>,
    ) -> Result<Arc<dyn ComputingBackend>> {
        let factory = self.factories.get(&spec.kind).ok_or_else(|| {
            FlowdagError::ConfigError(format!(
                "no factory registered for backend kind '{}' (backend '{}')",
                spec.kind, spec.name
            ))
        })?;
        Ok(factory(spec, kernel))
    }
}

/// Backends of one scheduler, in registration order.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: Vec<Arc<dyn ComputingBackend>>,
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.name().to_string()))
            .finish()
    }
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend. Names must be unique.
    pub fn push(&mut self, backend: Arc<dyn ComputingBackend>) -> Result<()> {
        if self.get(backend.name()).is_some() {
            return Err(FlowdagError::ConfigError(format!(
                "backend '{}' registered twice",
                backend.name()
            )));
        }
        self.backends.push(backend);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ComputingBackend>> {
        self.backends.iter().find(|b| b.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ComputingBackend>> {
        self.backends.iter()
    }

    /// Backends with at least one implementation of `core_element`.
    pub fn capable(&self, core_element: &str) -> Vec<Arc<dyn ComputingBackend>> {
        self.backends
            .iter()
            .filter(|b| b.can_run(core_element))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
