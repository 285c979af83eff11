//! Threaded Model - In-Process Multi-Rank Backend
//!
//! Runs a real multi-rank group inside one process, one OS thread per rank.
//! Ranks meet in a shared [`ThreadGroup`]: every collective is one exchange
//! round where each rank deposits its contribution and the last arrival
//! publishes the full set to everyone. Reductions, gathers and broadcasts
//! are then computed locally from that set.
//!
//! A worker that fails or panics aborts the group, so peers blocked in an
//! exchange return an error instead of waiting forever.
//!
//! # Example
//! ```rust
//! use std::thread;
//! use polycomm_distributed::{BackendOptions, ComputationModel, Operand, ThreadedModel};
//!
//! let world = ThreadedModel::create_world(2, &BackendOptions::new()).unwrap();
//! let handles: Vec<_> = world
//!     .into_iter()
//!     .map(|model| thread::spawn(move || model.all_reduce(Operand::from(1i64), "sum").unwrap()))
//!     .collect();
//! for handle in handles {
//!     assert_eq!(handle.join().unwrap(), Operand::from(2i64));
//! }
//! ```
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use std::any::Any;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use polycomm_core::{Buffer, DType, Device, Error, Result};

use crate::config::{BackendOptions, DistConfig, SpawnConfig};
use crate::model::{check_backend, ComputationModel, WorkerFn};
use crate::reduce::ReduceOp;
use crate::topology::{NodeLayout, Topology};

/// Name of the threaded model and backend.
pub const THREADED: &str = "threaded";

// =============================================================================
// ThreadGroup
// =============================================================================

/// Contributions of one exchange round, indexed by rank.
pub type Contributions = Arc<Vec<Option<Buffer>>>;

#[derive(Debug)]
struct Rendezvous {
    generation: u64,
    arrived: usize,
    slots: Vec<Option<Buffer>>,
    published: Option<Contributions>,
    aborted: Option<(usize, String)>,
}

/// Shared rendezvous point for the ranks of one in-process group.
#[derive(Debug)]
pub struct ThreadGroup {
    world_size: usize,
    state: Mutex<Rendezvous>,
    cond: Condvar,
}

impl ThreadGroup {
    /// Creates a group of `world_size` ranks.
    #[must_use]
    pub fn new(world_size: usize) -> Self {
        Self {
            world_size,
            state: Mutex::new(Rendezvous {
                generation: 0,
                arrived: 0,
                slots: vec![None; world_size],
                published: None,
                aborted: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Number of ranks.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Deposits `contribution` for `rank` and blocks until every rank has
    /// deposited for this round.
    pub fn exchange(&self, rank: usize, contribution: Option<Buffer>) -> Result<Contributions> {
        if rank >= self.world_size {
            return Err(Error::InvalidRank {
                rank,
                world_size: self.world_size,
            });
        }

        let mut state = self.state.lock();
        if let Some((origin, reason)) = &state.aborted {
            return Err(aborted_error(*origin, reason));
        }

        let generation = state.generation;
        state.slots[rank] = contribution;
        state.arrived += 1;
        tracing::trace!(rank, generation, arrived = state.arrived, "entered exchange");

        if state.arrived == self.world_size {
            let slots = std::mem::replace(&mut state.slots, vec![None; self.world_size]);
            let published = Arc::new(slots);
            state.published = Some(Arc::clone(&published));
            state.arrived = 0;
            state.generation += 1;
            self.cond.notify_all();
            return Ok(published);
        }

        while state.generation == generation {
            if let Some((origin, reason)) = &state.aborted {
                return Err(aborted_error(*origin, reason));
            }
            self.cond.wait(&mut state);
        }
        state
            .published
            .clone()
            .ok_or_else(|| Error::backend("exchange completed without a result"))
    }

    /// Fails every pending and future exchange. The first abort wins.
    pub fn abort(&self, rank: usize, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.aborted.is_none() {
            let reason = reason.into();
            tracing::warn!(rank, %reason, "aborting thread group");
            state.aborted = Some((rank, reason));
        }
        self.cond.notify_all();
    }

    /// Rank whose failure aborted the group, if any.
    #[must_use]
    pub fn aborted_by(&self) -> Option<usize> {
        self.state.lock().aborted.as_ref().map(|(rank, _)| *rank)
    }
}

fn aborted_error(origin: usize, reason: &str) -> Error {
    Error::backend(format!("thread group aborted by rank {origin}: {reason}"))
}

fn collect_all(contributions: &[Option<Buffer>]) -> Result<Vec<&Buffer>> {
    contributions
        .iter()
        .enumerate()
        .map(|(rank, slot)| {
            slot.as_ref()
                .ok_or_else(|| Error::backend(format!("rank {rank} contributed no buffer")))
        })
        .collect()
}

// =============================================================================
// Worker Context
// =============================================================================

#[derive(Debug, Clone)]
struct WorkerContext {
    group: Arc<ThreadGroup>,
    rank: usize,
    local_rank: usize,
    device: Device,
    collective_dtype: Option<DType>,
    layout: Option<NodeLayout>,
}

thread_local! {
    /// Group membership of the current spawned worker thread.
    static CONTEXT: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

/// Installs a worker's context for the thread's lifetime and aborts the
/// group unless the worker completed.
struct WorkerScope {
    group: Arc<ThreadGroup>,
    rank: usize,
    completed: bool,
}

impl WorkerScope {
    fn enter(context: WorkerContext) -> Self {
        let scope = Self {
            group: Arc::clone(&context.group),
            rank: context.rank,
            completed: false,
        };
        CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(context));
        scope
    }
}

impl Drop for WorkerScope {
    fn drop(&mut self) {
        CONTEXT.with(|ctx| ctx.borrow_mut().take());
        if !self.completed {
            let reason = if thread::panicking() {
                "worker panicked"
            } else {
                "worker returned an error"
            };
            self.group.abort(self.rank, reason);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}

// =============================================================================
// ThreadedModel
// =============================================================================

/// One rank of an in-process thread group.
#[derive(Debug)]
pub struct ThreadedModel {
    group: Arc<ThreadGroup>,
    rank: usize,
    local_rank: usize,
    device: Device,
    collective_dtype: Option<DType>,
    topology: Topology,
    finalized: AtomicBool,
}

impl ThreadedModel {
    /// Creates every rank of a new group.
    ///
    /// Options are read as a [`DistConfig`]: `device`, `collective_dtype`
    /// and the `nproc_per_node` / `nnodes` topology hints apply to every
    /// rank. `local_rank` and `node_rank` describe one rank, so they are
    /// only accepted for a single-rank group. Each returned model must be
    /// moved to its own thread before issuing collectives.
    pub fn create_world(world_size: usize, options: &BackendOptions) -> Result<Vec<Self>> {
        Self::build_world(world_size, options, None)
    }

    fn build_world(
        world_size: usize,
        options: &BackendOptions,
        layout: Option<NodeLayout>,
    ) -> Result<Vec<Self>> {
        if world_size == 0 {
            return Err(Error::invalid_config("world_size must be at least 1"));
        }
        let config = DistConfig::from_options(options)?;
        if world_size > 1 && (config.local_rank.is_some() || config.node_rank.is_some()) {
            return Err(Error::invalid_config(
                "local_rank and node_rank can only be supplied for a single-rank group",
            ));
        }
        let device = config.device.unwrap_or_default();
        let collective_dtype = config.collective_dtype;
        let group = Arc::new(ThreadGroup::new(world_size));
        tracing::debug!(world_size, %device, ?collective_dtype, "created thread group");

        Ok((0..world_size)
            .map(|rank| {
                let identity = DistConfig {
                    rank,
                    world_size,
                    ..config.clone()
                };
                let local_rank = match layout {
                    Some(layout) => rank % layout.nproc_per_node,
                    None => identity.local_rank(),
                };
                let context = WorkerContext {
                    group: Arc::clone(&group),
                    rank,
                    local_rank,
                    device,
                    collective_dtype,
                    layout,
                };
                match layout {
                    Some(_) => Self::from_context(context),
                    None => Self::with_topology(context, identity.topology()),
                }
            })
            .collect())
    }

    fn from_context(context: WorkerContext) -> Self {
        let topology = context.layout.map_or_else(Topology::new, Topology::resolved);
        Self::with_topology(context, topology)
    }

    fn with_topology(context: WorkerContext, topology: Topology) -> Self {
        Self {
            group: context.group,
            rank: context.rank,
            local_rank: context.local_rank,
            device: context.device,
            collective_dtype: context.collective_dtype,
            topology,
            finalized: AtomicBool::new(false),
        }
    }

    fn context(&self) -> WorkerContext {
        WorkerContext {
            group: Arc::clone(&self.group),
            rank: self.rank,
            local_rank: self.local_rank,
            device: self.device,
            collective_dtype: self.collective_dtype,
            layout: self.topology.is_resolved().then(|| self.node_layout().ok()).flatten(),
        }
    }

    /// The shared group.
    #[must_use]
    pub fn group(&self) -> &Arc<ThreadGroup> {
        &self.group
    }

    /// True once `finalize` has run.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_finalized() {
            Err(Error::Finalized {
                backend: THREADED.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn exchange(&self, contribution: Option<Buffer>) -> Result<Contributions> {
        self.ensure_live()?;
        self.group.exchange(self.rank, contribution)
    }
}

impl ComputationModel for ThreadedModel {
    fn name(&self) -> &'static str {
        THREADED
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.group.world_size()
    }

    fn local_rank(&self) -> usize {
        self.local_rank
    }

    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn device(&self) -> Device {
        self.device
    }

    fn backend_name(&self) -> Option<&str> {
        Some(THREADED)
    }

    fn collective_dtype(&self) -> Option<DType> {
        self.collective_dtype
    }

    fn compute_nproc_per_node(&self) -> Result<usize> {
        let mut probe = Buffer::scalar((self.local_rank() + 1) as i64);
        self.do_all_reduce(&mut probe, ReduceOp::Max.name())?;
        probe
            .to_dtype(DType::I64)
            .to_vec::<i64>()?
            .first()
            .and_then(|&n| usize::try_from(n).ok())
            .ok_or_else(|| Error::backend("node size probe returned no value"))
    }

    fn do_all_reduce(&self, buffer: &mut Buffer, op: &str) -> Result<()> {
        let op: ReduceOp = op.parse()?;
        let contributions = self.exchange(Some(buffer.clone()))?;
        let device = buffer.device();
        *buffer = op.reduce(collect_all(&contributions)?)?;
        buffer.relocate(device);
        Ok(())
    }

    fn do_all_gather(&self, buffer: &mut Buffer) -> Result<()> {
        let contributions = self.exchange(Some(buffer.clone()))?;
        let parts: Vec<Buffer> = collect_all(&contributions)?.into_iter().cloned().collect();
        let device = buffer.device();
        *buffer = Buffer::concat0(&parts)?;
        buffer.relocate(device);
        Ok(())
    }

    fn do_broadcast(&self, buffer: &mut Buffer, src: usize) -> Result<()> {
        let world_size = self.world_size();
        if src >= world_size {
            return Err(Error::InvalidRank {
                rank: src,
                world_size,
            });
        }
        let contribution = (self.rank == src).then(|| buffer.clone());
        let contributions = self.exchange(contribution)?;
        let received = contributions
            .get(src)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::backend(format!("broadcast source {src} contributed no buffer")))?;
        let device = buffer.device();
        *buffer = received.clone();
        buffer.relocate(device);
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        self.exchange(None).map(|_| ())
    }

    fn finalize(&self) -> Result<()> {
        if !self.finalized.swap(true, Ordering::AcqRel) {
            tracing::debug!(rank = self.rank, "finalized threaded model");
        }
        Ok(())
    }

    fn model_name() -> &'static str {
        THREADED
    }

    fn available_backends() -> &'static [&'static str] {
        &[THREADED]
    }

    fn create_from_context() -> Result<Option<Self>> {
        Ok(CONTEXT.with(|ctx| ctx.borrow().clone().map(Self::from_context)))
    }

    fn create_from_backend(backend: &str, options: &BackendOptions) -> Result<Self> {
        check_backend(Self::available_backends(), backend)?;
        if DistConfig::from_options(options)?.world_size != 1 {
            return Err(Error::invalid_config(
                "the threaded backend initializes single-rank groups; use spawn for more ranks",
            ));
        }
        Self::create_world(1, options)?
            .pop()
            .ok_or_else(|| Error::backend("failed to create thread group"))
    }

    fn spawn(backend: &str, config: &SpawnConfig, entry: WorkerFn) -> Result<()> {
        check_backend(Self::available_backends(), backend)?;
        config.validate()?;
        if config.nnodes > 1 {
            return Err(Error::not_supported(THREADED, "multi-node spawn"));
        }

        let nproc = config.nproc_per_node;
        let layout = NodeLayout {
            nproc_per_node: nproc,
            nnodes: 1,
            node_rank: 0,
        };
        let models = Self::build_world(nproc, &config.options, Some(layout))?;
        let Some(group) = models.first().map(|m| Arc::clone(&m.group)) else {
            return Err(Error::invalid_config("nothing to spawn"));
        };
        tracing::debug!(nproc, "spawning threaded workers");

        let mut handles = Vec::with_capacity(nproc);
        for model in models {
            let rank = model.rank;
            let entry = Arc::clone(&entry);
            let spawned = thread::Builder::new()
                .name(format!("polycomm-worker-{rank}"))
                .spawn(move || -> Result<()> {
                    let mut scope = WorkerScope::enter(model.context());
                    tracing::debug!(rank, "worker started");
                    let result = entry(Box::new(model));
                    scope.completed = result.is_ok();
                    result
                });
            match spawned {
                Ok(handle) => handles.push((rank, handle)),
                Err(e) => {
                    group.abort(rank, format!("failed to start worker: {e}"));
                    for (_, handle) in handles {
                        let _ = handle.join();
                    }
                    return Err(Error::Worker {
                        rank,
                        message: e.to_string(),
                    });
                }
            }
        }

        let mut failures = Vec::new();
        for (rank, handle) in handles {
            let outcome = match handle.join() {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(panic_message(&*payload)),
            };
            if let Some(message) = outcome {
                tracing::debug!(rank, %message, "worker failed");
                failures.push(Error::Worker { rank, message });
            }
        }

        let origin = group.aborted_by();
        let first = failures
            .iter()
            .position(|e| matches!(e, Error::Worker { rank, .. } if Some(*rank) == origin))
            .unwrap_or(0);
        if failures.is_empty() {
            tracing::debug!(nproc, "all workers finished");
            Ok(())
        } else {
            Err(failures.swap_remove(first))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
