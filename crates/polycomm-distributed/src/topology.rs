//! Topology - Lazily Derived Node Layout
//!
//! Resolves `nproc_per_node`, `nnodes` and `node_rank` from the global rank
//! and world size. Each field is written at most once; a field supplied up
//! front (for example discovered from a launcher) is never re-derived.
//!
//! `nnodes` is `world_size / nproc_per_node` with the remainder discarded. A
//! world size that is not a multiple of `nproc_per_node` therefore
//! under-counts nodes; this is logged, not corrected.
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use std::sync::OnceLock;

use polycomm_core::{Error, Result};

// =============================================================================
// NodeLayout
// =============================================================================

/// A fully resolved topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    /// Processes per node.
    pub nproc_per_node: usize,
    /// Number of nodes.
    pub nnodes: usize,
    /// Index of this process's node.
    pub node_rank: usize,
}

// =============================================================================
// Topology
// =============================================================================

/// Per-model topology cache.
#[derive(Debug, Default)]
pub struct Topology {
    nproc_per_node: OnceLock<usize>,
    nnodes: OnceLock<usize>,
    node_rank: OnceLock<usize>,
}

impl Topology {
    /// Creates a topology with every field unresolved.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a topology seeded with externally supplied fields.
    #[must_use]
    pub fn with_hints(
        nproc_per_node: Option<usize>,
        nnodes: Option<usize>,
        node_rank: Option<usize>,
    ) -> Self {
        let topology = Self::new();
        if let Some(n) = nproc_per_node {
            let _ = topology.nproc_per_node.set(n);
        }
        if let Some(n) = nnodes {
            let _ = topology.nnodes.set(n);
        }
        if let Some(n) = node_rank {
            let _ = topology.node_rank.set(n);
        }
        topology
    }

    /// Creates a topology with every field already resolved.
    #[must_use]
    pub fn resolved(layout: NodeLayout) -> Self {
        Self::with_hints(
            Some(layout.nproc_per_node),
            Some(layout.nnodes),
            Some(layout.node_rank),
        )
    }

    /// Returns true once all three fields are known.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.nproc_per_node.get().is_some()
            && self.nnodes.get().is_some()
            && self.node_rank.get().is_some()
    }

    /// Resolves missing fields and returns the layout.
    ///
    /// `probe` counts the processes on this node. It is only invoked when
    /// `nproc_per_node` is unresolved and `world_size > 1`, and in a real
    /// backend it is itself a collective, so every rank must resolve at the
    /// same point in its call sequence.
    pub fn resolve<F>(&self, rank: usize, world_size: usize, probe: F) -> Result<NodeLayout>
    where
        F: FnOnce() -> Result<usize>,
    {
        let nproc_per_node = match self.nproc_per_node.get() {
            Some(&n) => n,
            None => {
                let n = if world_size > 1 { probe()? } else { 1 };
                *self.nproc_per_node.get_or_init(|| n)
            }
        };
        if nproc_per_node == 0 {
            return Err(Error::invalid_config("nproc_per_node must be at least 1"));
        }

        let nnodes = *self.nnodes.get_or_init(|| {
            if world_size % nproc_per_node != 0 {
                tracing::warn!(
                    world_size,
                    nproc_per_node,
                    "world size is not a multiple of nproc_per_node; node count is truncated"
                );
            }
            world_size / nproc_per_node
        });
        let node_rank = *self.node_rank.get_or_init(|| rank / nproc_per_node);

        tracing::debug!(rank, world_size, nproc_per_node, nnodes, node_rank, "resolved topology");
        Ok(NodeLayout {
            nproc_per_node,
            nnodes,
            node_rank,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_divisible_world() {
        let topology = Topology::new();
        let layout = topology.resolve(5, 8, || Ok(4)).unwrap();
        assert_eq!(layout.nproc_per_node, 4);
        assert_eq!(layout.nnodes, 2);
        assert_eq!(layout.node_rank, 1);
        assert!(topology.is_resolved());
    }

    #[test]
    fn test_non_divisible_world_truncates() {
        let layout = Topology::new().resolve(6, 7, || Ok(4)).unwrap();
        assert_eq!(layout.nnodes, 1);
        assert_eq!(layout.node_rank, 1);
    }

    #[test]
    fn test_single_process_skips_probe() {
        let probed = Cell::new(false);
        let layout = Topology::new()
            .resolve(0, 1, || {
                probed.set(true);
                Ok(8)
            })
            .unwrap();
        assert!(!probed.get());
        assert_eq!(
            layout,
            NodeLayout {
                nproc_per_node: 1,
                nnodes: 1,
                node_rank: 0,
            }
        );
    }

    #[test]
    fn test_probe_runs_once() {
        let calls = Cell::new(0);
        let topology = Topology::new();
        for _ in 0..3 {
            topology
                .resolve(1, 4, || {
                    calls.set(calls.get() + 1);
                    Ok(2)
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_hints_skip_derivation() {
        let topology = Topology::with_hints(Some(4), Some(3), None);
        let layout = topology
            .resolve(9, 8, || Err(Error::backend("probe must not run")))
            .unwrap();
        assert_eq!(layout.nproc_per_node, 4);
        assert_eq!(layout.nnodes, 3);
        assert_eq!(layout.node_rank, 2);
    }

    #[test]
    fn test_probe_failure_leaves_unresolved() {
        let topology = Topology::new();
        assert!(topology
            .resolve(0, 2, || Err(Error::backend("unreachable peer")))
            .is_err());
        assert!(!topology.is_resolved());
        assert_eq!(topology.resolve(0, 2, || Ok(2)).unwrap().nnodes, 1);
    }

    #[test]
    fn test_zero_nproc_rejected() {
        let topology = Topology::with_hints(Some(0), None, None);
        assert!(topology.resolve(0, 4, || Ok(1)).is_err());
    }
}
