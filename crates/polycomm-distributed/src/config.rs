//! Configuration - Backend Options, Process Identity and Spawn Settings
//!
//! [`BackendOptions`] is the open-ended map handed to
//! `create_from_backend`; each backend documents its own keys.
//! [`DistConfig`] is the typed view of the process identity most backends
//! read out of it, and [`SpawnConfig`] describes a worker launch.
//!
//! # Example
//! ```rust
//! use polycomm_distributed::{BackendOptions, DistConfig};
//!
//! let options = BackendOptions::new()
//!     .with("rank", 1)
//!     .with("world_size", 4)
//!     .with("collective_dtype", "f32");
//! let config = DistConfig::from_options(&options).unwrap();
//! assert_eq!(config.world_size, 4);
//! ```
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use polycomm_core::{DType, Device, Error, Result};

use crate::topology::Topology;

// =============================================================================
// BackendOptions
// =============================================================================

/// Open-ended construction options for a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendOptions(Map<String, Value>);

impl BackendOptions {
    /// Creates an empty option map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing JSON object.
    #[must_use]
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the raw value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns true if no options are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Reads a non-negative integer. Numeric strings are accepted.
    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_u64().and_then(|v| usize::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| Error::invalid_config(format!("option '{key}' must be a non-negative integer, got {value}")))
    }

    /// Reads a string.
    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(Error::invalid_config(format!(
                "option '{key}' must be a string, got {other}"
            ))),
        }
    }

    /// Reads a dtype name such as `"f32"` or `"float64"`.
    pub fn get_dtype(&self, key: &str) -> Result<Option<DType>> {
        self.get_str(key)?.map(str::parse).transpose()
    }

    /// Reads a device name such as `"cpu"` or `"cuda:1"`.
    pub fn get_device(&self, key: &str) -> Result<Option<Device>> {
        self.get_str(key)?.map(str::parse).transpose()
    }

    /// Deserializes the whole map into a typed config.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| Error::invalid_config(e.to_string()))
    }
}

impl From<Map<String, Value>> for BackendOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// =============================================================================
// DistConfig
// =============================================================================

/// Process identity and topology hints for one rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistConfig {
    /// Global rank.
    pub rank: usize,
    /// Total number of processes.
    pub world_size: usize,
    /// Rank within the node, when supplied by the launcher.
    pub local_rank: Option<usize>,
    /// Processes per node, when known up front.
    pub nproc_per_node: Option<usize>,
    /// Number of nodes, when known up front.
    pub nnodes: Option<usize>,
    /// Node index, when known up front.
    pub node_rank: Option<usize>,
    /// Floating dtype used to host non-floating payloads on the wire.
    pub collective_dtype: Option<DType>,
    /// Compute location for this rank.
    pub device: Option<Device>,
}

impl Default for DistConfig {
    fn default() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            local_rank: None,
            nproc_per_node: None,
            nnodes: None,
            node_rank: None,
            collective_dtype: None,
            device: None,
        }
    }
}

impl DistConfig {
    /// Creates a config for `rank` in a group of `world_size`.
    #[must_use]
    pub fn new(rank: usize, world_size: usize) -> Self {
        Self {
            rank,
            world_size,
            ..Self::default()
        }
    }

    /// Reads and validates the config from backend options.
    pub fn from_options(options: &BackendOptions) -> Result<Self> {
        let config: Self = options.deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks identity invariants.
    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(Error::invalid_config("world_size must be at least 1"));
        }
        if self.rank >= self.world_size {
            return Err(Error::InvalidRank {
                rank: self.rank,
                world_size: self.world_size,
            });
        }
        if self.nproc_per_node == Some(0) {
            return Err(Error::invalid_config("nproc_per_node must be at least 1"));
        }
        if let (Some(local), Some(nproc)) = (self.local_rank, self.nproc_per_node) {
            if local >= nproc {
                return Err(Error::invalid_config(format!(
                    "local_rank {local} is out of range for nproc_per_node {nproc}"
                )));
            }
        }
        Ok(())
    }

    /// Rank within the node: the supplied value, else derived from
    /// `nproc_per_node`, else the global rank.
    #[must_use]
    pub fn local_rank(&self) -> usize {
        match (self.local_rank, self.nproc_per_node) {
            (Some(local), _) => local,
            (None, Some(nproc)) if nproc > 0 => self.rank % nproc,
            _ => self.rank,
        }
    }

    /// Builds a topology seeded with the pre-supplied fields.
    #[must_use]
    pub fn topology(&self) -> Topology {
        Topology::with_hints(self.nproc_per_node, self.nnodes, self.node_rank)
    }
}

// =============================================================================
// SpawnConfig
// =============================================================================

/// Worker launch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Workers started on this node.
    pub nproc_per_node: usize,
    /// Number of participating nodes.
    pub nnodes: usize,
    /// Index of this node.
    pub node_rank: usize,
    /// Options forwarded to every worker's model.
    pub options: BackendOptions,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            nproc_per_node: 1,
            nnodes: 1,
            node_rank: 0,
            options: BackendOptions::new(),
        }
    }
}

impl SpawnConfig {
    /// Creates a single-node launch of `nproc_per_node` workers.
    #[must_use]
    pub fn new(nproc_per_node: usize) -> Self {
        Self {
            nproc_per_node,
            ..Self::default()
        }
    }

    /// Sets the node count.
    pub fn with_nnodes(mut self, nnodes: usize) -> Self {
        self.nnodes = nnodes;
        self
    }

    /// Sets this node's index.
    pub fn with_node_rank(mut self, node_rank: usize) -> Self {
        self.node_rank = node_rank;
        self
    }

    /// Sets the options forwarded to workers.
    pub fn with_options(mut self, options: BackendOptions) -> Self {
        self.options = options;
        self
    }

    /// Total number of workers across all nodes.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.nproc_per_node * self.nnodes
    }

    /// Checks the launch shape.
    pub fn validate(&self) -> Result<()> {
        if self.nproc_per_node == 0 {
            return Err(Error::invalid_config("nproc_per_node must be at least 1"));
        }
        if self.nnodes == 0 {
            return Err(Error::invalid_config("nnodes must be at least 1"));
        }
        if self.node_rank >= self.nnodes {
            return Err(Error::invalid_config(format!(
                "node_rank {} is out of range for nnodes {}",
                self.node_rank, self.nnodes
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_options_typed_getters() {
        let options = BackendOptions::new()
            .with("nproc", 4)
            .with("nproc_str", "8")
            .with("name", "threaded")
            .with("dtype", "float32")
            .with("device", "cuda:1");
        assert_eq!(options.get_usize("nproc").unwrap(), Some(4));
        assert_eq!(options.get_usize("nproc_str").unwrap(), Some(8));
        assert_eq!(options.get_usize("missing").unwrap(), None);
        assert_eq!(options.get_str("name").unwrap(), Some("threaded"));
        assert_eq!(options.get_dtype("dtype").unwrap(), Some(DType::F32));
        assert_eq!(options.get_device("device").unwrap(), Some(Device::Cuda(1)));
    }

    #[test]
    fn test_options_type_errors() {
        let options = BackendOptions::new().with("n", -1).with("s", 3);
        assert!(matches!(options.get_usize("n"), Err(Error::InvalidConfig { .. })));
        assert!(options.get_str("s").is_err());
        assert!(BackendOptions::new().with("d", "complex").get_dtype("d").is_err());
    }

    #[test]
    fn test_dist_config_from_options() {
        let options = BackendOptions::from_map(
            json!({
                "rank": 3,
                "world_size": 8,
                "nproc_per_node": 4,
                "collective_dtype": "f64",
                "unrelated": true,
            })
            .as_object()
            .cloned()
            .unwrap(),
        );
        let config = DistConfig::from_options(&options).unwrap();
        assert_eq!(config.rank, 3);
        assert_eq!(config.world_size, 8);
        assert_eq!(config.collective_dtype, Some(DType::F64));
        assert_eq!(config.local_rank(), 3);
        assert_eq!(config.topology().resolve(3, 8, || Ok(99)).unwrap().nnodes, 2);
    }

    #[test]
    fn test_dist_config_defaults() {
        let config = DistConfig::from_options(&BackendOptions::new()).unwrap();
        assert_eq!(config, DistConfig::default());
        assert_eq!(config.world_size, 1);
    }

    #[test]
    fn test_dist_config_rejects_bad_rank() {
        let options = BackendOptions::new().with("rank", 4).with("world_size", 4);
        assert_eq!(
            DistConfig::from_options(&options),
            Err(Error::InvalidRank {
                rank: 4,
                world_size: 4,
            })
        );
    }

    #[test]
    fn test_spawn_config() {
        let config = SpawnConfig::new(3).with_nnodes(2).with_node_rank(1);
        assert_eq!(config.world_size(), 6);
        assert!(config.validate().is_ok());
        assert!(SpawnConfig::new(0).validate().is_err());
        assert!(SpawnConfig::new(2).with_node_rank(1).validate().is_err());
    }
}
