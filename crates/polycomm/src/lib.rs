//! # Polycomm - Type-Polymorphic Collectives over Pluggable Backends
//!
//! Polycomm lets a parallel program issue all-reduce, all-gather, broadcast
//! and barrier on numbers, strings and native buffers through one interface,
//! whatever backend is running underneath.
//!
//! ## Crates
//!
//! - **core** (`polycomm-core`): devices, dtypes, the native `Buffer`, errors
//! - **distributed** (`polycomm-distributed`): the `ComputationModel`
//!   contract, operand codec, topology, serial and threaded backends,
//!   registry and spawn
//!
//! # Quick Start
//!
//! ```rust
//! use polycomm::prelude::*;
//!
//! // Outside any launcher this is the serial model.
//! let model = polycomm::auto_model().unwrap();
//! assert_eq!(model.all_gather(Operand::from(1.5f64)).unwrap(),
//!            Operand::Scalars(vec![Number::Float(1.5)]));
//!
//! // Three ranks in this process, one thread each.
//! let entry = worker_fn(|model| {
//!     let total = model.all_reduce(Operand::from(model.rank() as i64), "sum")?;
//!     assert_eq!(total, Operand::from(3i64));
//!     Ok(())
//! });
//! polycomm::spawn("threaded", &SpawnConfig::new(3), entry).unwrap();
//! ```
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

// =============================================================================
// Re-exports
// =============================================================================

pub use polycomm_core as core;
pub use polycomm_distributed as distributed;

use polycomm_core::Result;
use polycomm_distributed::{BackendOptions, BackendRegistry, ComputationModel, SpawnConfig, WorkerFn};

// =============================================================================
// Entry Points
// =============================================================================

/// Adopts the active communication context, or returns a serial model.
pub fn auto_model() -> Result<Box<dyn ComputationModel>> {
    BackendRegistry::with_defaults().from_context()
}

/// Starts the named backend with the default registry.
pub fn create(backend: &str, options: &BackendOptions) -> Result<Box<dyn ComputationModel>> {
    BackendRegistry::with_defaults().create(backend, options)
}

/// Launches workers under the named backend with the default registry.
pub fn spawn(backend: &str, config: &SpawnConfig, entry: WorkerFn) -> Result<()> {
    BackendRegistry::with_defaults().spawn(backend, config, entry)
}

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for collective communication.
///
/// ```rust
/// use polycomm::prelude::*;
/// ```
pub mod prelude {
    pub use polycomm_core::{Buffer, DType, Device, Error, Result, TruncationWarning};

    pub use polycomm_distributed::{
        all_gather, all_reduce_max, all_reduce_mean, all_reduce_min, all_reduce_product,
        all_reduce_sum, barrier, broadcast, broadcast_from, decode_text, encode_text,
        is_main_process, rank, worker_fn, world_size, BackendOptions, BackendRegistry,
        ComputationModel, DistConfig, Number, Operand, OperandKind, ReduceOp, SerialModel,
        SpawnConfig, ThreadedModel, WorkerFn,
    };
}

// =============================================================================
// Version Information
// =============================================================================

/// Returns the version of Polycomm.
#[must_use]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(version(), "0.1.0");
    }

    #[test]
    fn test_auto_model_is_serial() {
        let model = auto_model().unwrap();
        assert_eq!(model.name(), "serial");
        assert_eq!(model.world_size(), 1);
    }

    #[test]
    fn test_create_unknown() {
        assert!(create("gloo", &BackendOptions::new()).is_err());
    }
}
