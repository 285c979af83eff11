//! Computation Model - The Collective Communication Contract
//!
//! [`ComputationModel`] is the one interface every backend implements and
//! the only one callers depend on. A backend supplies identity accessors and
//! four buffer-level primitives (`do_all_reduce`, `do_all_gather`,
//! `do_broadcast` and the node-size probe `compute_nproc_per_node`); the
//! provided methods layer the operand codec and the lazy topology deriver on
//! top of them.
//!
//! Constructors and `spawn` are associated functions bounded by
//! `Self: Sized`, so `dyn ComputationModel` stays usable for everything a
//! worker does once it holds a model.
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use std::sync::Arc;

use polycomm_core::{Buffer, DType, Device, Result};

use crate::codec;
use crate::config::{BackendOptions, SpawnConfig};
use crate::operand::Operand;
use crate::topology::{NodeLayout, Topology};

// =============================================================================
// Worker Entry Point
// =============================================================================

/// Entry point run by every spawned worker with that worker's model.
pub type WorkerFn = Arc<dyn Fn(Box<dyn ComputationModel>) -> Result<()> + Send + Sync>;

/// Wraps a closure as a [`WorkerFn`].
pub fn worker_fn<F>(entry: F) -> WorkerFn
where
    F: Fn(Box<dyn ComputationModel>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(entry)
}

// =============================================================================
// ComputationModel Trait
// =============================================================================

/// A communication backend bound to one process of a group.
///
/// All processes must issue the same collectives in the same order with
/// compatible operands. One thread per process issues collectives.
pub trait ComputationModel: Send + Sync {
    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------

    /// Name of this model variant, e.g. `"serial"`.
    fn name(&self) -> &'static str;

    /// Global rank of this process.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn world_size(&self) -> usize;

    /// Rank of this process within its node.
    fn local_rank(&self) -> usize;

    /// Topology cache backing the node accessors.
    fn topology(&self) -> &Topology;

    /// Compute location collectives run on.
    fn device(&self) -> Device;

    /// Name of the active communication backend, if any.
    fn backend_name(&self) -> Option<&str>;

    /// Floating dtype non-floating payloads are hosted in during a
    /// collective. `None` disables casting.
    fn collective_dtype(&self) -> Option<DType> {
        None
    }

    // -------------------------------------------------------------------------
    // Topology
    // -------------------------------------------------------------------------

    /// Resolves the node layout, probing on first use.
    fn node_layout(&self) -> Result<NodeLayout> {
        self.topology()
            .resolve(self.rank(), self.world_size(), || self.compute_nproc_per_node())
    }

    /// Processes per node.
    fn nproc_per_node(&self) -> Result<usize> {
        Ok(self.node_layout()?.nproc_per_node)
    }

    /// Number of nodes.
    fn nnodes(&self) -> Result<usize> {
        Ok(self.node_layout()?.nnodes)
    }

    /// Index of this process's node.
    fn node_rank(&self) -> Result<usize> {
        Ok(self.node_layout()?.node_rank)
    }

    // -------------------------------------------------------------------------
    // Primitives
    // -------------------------------------------------------------------------

    /// Counts the processes on this node. May itself be a collective.
    fn compute_nproc_per_node(&self) -> Result<usize>;

    /// Reduces `buffer` in place across the group.
    fn do_all_reduce(&self, buffer: &mut Buffer, op: &str) -> Result<()>;

    /// Replaces `buffer` with every rank's buffer concatenated along
    /// dimension 0 in rank order.
    fn do_all_gather(&self, buffer: &mut Buffer) -> Result<()>;

    /// Overwrites `buffer` with the one held by `src`.
    fn do_broadcast(&self, buffer: &mut Buffer, src: usize) -> Result<()>;

    // -------------------------------------------------------------------------
    // Collectives
    // -------------------------------------------------------------------------

    /// Reduces a scalar or buffer across the group with the named op.
    fn all_reduce(&self, operand: Operand, op: &str) -> Result<Operand> {
        codec::wrap_all_reduce(self, operand, op)
    }

    /// Collects every rank's value in rank order.
    fn all_gather(&self, operand: Operand) -> Result<Operand> {
        codec::wrap_all_gather(self, operand)
    }

    /// Distributes the value held by `src` to every rank.
    fn broadcast(&self, operand: Operand, src: usize) -> Result<Operand> {
        codec::wrap_broadcast(self, operand, src)
    }

    /// Blocks until every rank has entered the barrier.
    fn barrier(&self) -> Result<()>;

    /// Releases backend resources. Calling it again is a no-op.
    fn finalize(&self) -> Result<()>;

    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Name of this model variant, without an instance.
    fn model_name() -> &'static str
    where
        Self: Sized;

    /// Backend names `create_from_backend` and `spawn` accept.
    fn available_backends() -> &'static [&'static str]
    where
        Self: Sized;

    /// Adopts an already initialized communication context, if one exists.
    fn create_from_context() -> Result<Option<Self>>
    where
        Self: Sized;

    /// Initializes a new context for the named backend.
    fn create_from_backend(backend: &str, options: &BackendOptions) -> Result<Self>
    where
        Self: Sized;

    /// Launches workers running `entry` under the named backend and waits
    /// for all of them.
    fn spawn(backend: &str, config: &SpawnConfig, entry: WorkerFn) -> Result<()>
    where
        Self: Sized;
}

/// Checks `backend` against the names a model accepts.
pub(crate) fn check_backend(available: &[&str], backend: &str) -> Result<()> {
    if available.contains(&backend) {
        Ok(())
    } else {
        Err(polycomm_core::Error::UnknownBackend {
            name: backend.to_string(),
        })
    }
}
