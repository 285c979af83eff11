//! Polycomm Distributed - Type-Polymorphic Collective Communication
//!
//! A backend-agnostic layer over collective primitives (all-reduce,
//! all-gather, broadcast, barrier). Callers issue collectives on numbers,
//! strings or native buffers without knowing which backend, device or
//! numeric representation is in effect underneath.
//!
//! # Features
//!
//! ## Contract
//! - **`ComputationModel`** - one flat interface every backend implements
//! - **Operand codec** - scalars and strings ride as native buffers, hosted in
//!   a configurable collective-safe dtype and restored afterwards
//! - **Topology** - `nproc_per_node`, `nnodes` and `node_rank` derived lazily
//!   from rank and world size
//!
//! ## Backends
//! - `serial` - single-process reference model
//! - `threaded` - in-process multi-rank group, one thread per rank, with
//!   `spawn` support
//! - `BackendRegistry` - select a backend by name at run time
//!
//! # Example
//!
//! ```rust
//! use polycomm_distributed::prelude::*;
//!
//! let entry = worker_fn(|model| {
//!     let names = model.all_gather(Operand::from(format!("worker-{}", model.rank())))?;
//!     assert_eq!(names.into_texts().map(|t| t.len()), Some(model.world_size()));
//!     Ok(())
//! });
//! BackendRegistry::with_defaults()
//!     .spawn("threaded", &SpawnConfig::new(3), entry)
//!     .unwrap();
//! ```
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::manual_let_else)]

pub mod codec;
pub mod comm;
pub mod config;
pub mod model;
pub mod operand;
pub mod reduce;
pub mod registry;
pub mod serial;
pub mod threaded;
pub mod topology;

// =============================================================================
// Re-exports
// =============================================================================

pub use codec::{
    apply_with_casting, decode_text, encode_text, encode_text_checked, CastScope, TEXT_CAPACITY,
    TEXT_ROW_LEN,
};
pub use comm::{
    all_gather, all_reduce_max, all_reduce_mean, all_reduce_min, all_reduce_product,
    all_reduce_sum, barrier, broadcast, broadcast_from, is_main_process, rank, world_size,
};
pub use config::{BackendOptions, DistConfig, SpawnConfig};
pub use model::{worker_fn, ComputationModel, WorkerFn};
pub use operand::{Number, Operand, OperandKind};
pub use reduce::ReduceOp;
pub use registry::BackendRegistry;
pub use serial::{SerialModel, SERIAL};
pub use threaded::{ThreadGroup, ThreadedModel, THREADED};
pub use topology::{NodeLayout, Topology};

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for collective communication.
pub mod prelude {
    pub use crate::{
        // Communication
        all_gather,
        all_reduce_max,
        all_reduce_mean,
        all_reduce_min,
        all_reduce_product,
        all_reduce_sum,
        barrier,
        broadcast,
        broadcast_from,
        is_main_process,
        rank,
        world_size,
        // Contract
        worker_fn,
        BackendOptions,
        BackendRegistry,
        ComputationModel,
        DistConfig,
        Number,
        Operand,
        ReduceOp,
        // Models
        SerialModel,
        SpawnConfig,
        ThreadedModel,
        WorkerFn,
    };

    pub use polycomm_core::{Buffer, DType, Device, Error, Result};
}
