//! Backend Registry - Model Selection by Name
//!
//! Maps model and backend names to the constructors of a
//! [`ComputationModel`] implementation, so callers can choose a backend at
//! run time and hold the result as `Box<dyn ComputationModel>`.
//!
//! # Example
//! ```rust
//! use polycomm_distributed::{BackendOptions, BackendRegistry, ComputationModel};
//!
//! let registry = BackendRegistry::with_defaults();
//! let model = registry.create("threaded", &BackendOptions::new()).unwrap();
//! assert_eq!(model.world_size(), 1);
//! assert_eq!(registry.from_context().unwrap().name(), "serial");
//! ```
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use polycomm_core::{Error, Result};

use crate::config::{BackendOptions, SpawnConfig};
use crate::model::{ComputationModel, WorkerFn};
use crate::serial::{SerialModel, SERIAL};
use crate::threaded::ThreadedModel;

// =============================================================================
// Entries
// =============================================================================

type CreateFn = fn(&str, &BackendOptions) -> Result<Box<dyn ComputationModel>>;
type ContextFn = fn() -> Result<Option<Box<dyn ComputationModel>>>;
type SpawnFn = fn(&str, &SpawnConfig, WorkerFn) -> Result<()>;

#[derive(Clone, Copy)]
struct Entry {
    name: &'static str,
    backends: &'static [&'static str],
    create: CreateFn,
    from_context: ContextFn,
    spawn: SpawnFn,
}

impl Entry {
    fn of<M: ComputationModel + 'static>() -> Self {
        Self {
            name: M::model_name(),
            backends: M::available_backends(),
            create: |backend, options| {
                M::create_from_backend(backend, options).map(|m| Box::new(m) as Box<dyn ComputationModel>)
            },
            from_context: || {
                M::create_from_context().map(|m| m.map(|m| Box::new(m) as Box<dyn ComputationModel>))
            },
            spawn: M::spawn,
        }
    }
}

impl core::fmt::Debug for Entry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// BackendRegistry
// =============================================================================

/// Registered computation models, in registration order.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    entries: Vec<Entry>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the `serial` and `threaded` models.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<SerialModel>();
        registry.register::<ThreadedModel>();
        registry
    }

    /// Registers a model, replacing any model with the same name.
    pub fn register<M: ComputationModel + 'static>(&mut self) -> &mut Self {
        let entry = Entry::of::<M>();
        tracing::debug!(model = entry.name, backends = ?entry.backends, "registered model");
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self
    }

    /// Registered model names.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    /// Every backend name some registered model accepts.
    #[must_use]
    pub fn backends(&self) -> Vec<&'static str> {
        self.entries.iter().flat_map(|e| e.backends.iter().copied()).collect()
    }

    /// Returns true if `name` is a registered model or backend.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// Finds the entry for a model or backend name, and the backend name to
    /// pass to it.
    fn resolve<'a>(&self, name: &'a str) -> Result<(Entry, &'a str)> {
        if let Some(entry) = self.entries.iter().find(|e| e.name == name) {
            let backend = entry.backends.first().copied().unwrap_or(name);
            return Ok((*entry, backend));
        }
        self.entries
            .iter()
            .find(|e| e.backends.contains(&name))
            .map(|entry| (*entry, name))
            .ok_or_else(|| Error::UnknownBackend {
                name: name.to_string(),
            })
    }

    /// Starts the named model or backend.
    pub fn create(&self, name: &str, options: &BackendOptions) -> Result<Box<dyn ComputationModel>> {
        let (entry, backend) = self.resolve(name)?;
        tracing::debug!(model = entry.name, backend, "creating model");
        (entry.create)(backend, options)
    }

    /// Adopts the first existing context a non-serial model recognizes,
    /// falling back to a serial model.
    pub fn from_context(&self) -> Result<Box<dyn ComputationModel>> {
        for entry in self.entries.iter().filter(|e| e.name != SERIAL) {
            if let Some(model) = (entry.from_context)()? {
                tracing::debug!(model = entry.name, rank = model.rank(), "adopted existing context");
                return Ok(model);
            }
        }
        Ok(Box::new(SerialModel::new()))
    }

    /// Launches workers under the named model or backend.
    pub fn spawn(&self, name: &str, config: &SpawnConfig, entry: WorkerFn) -> Result<()> {
        let (model, backend) = self.resolve(name)?;
        (model.spawn)(backend, config, entry)
    }
}

// =============================================================================
// Tests
// =============================================================================
