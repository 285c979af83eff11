//! Error Types - Polycomm Error Handling
//!
//! One error type shared by the buffer layer and every communication backend.
//! Backend primitive failures travel as [`Error::Backend`] and are never
//! translated or retried by the collective layer.
//!
//! The non-fatal string truncation diagnostic is not an error; it is the
//! [`TruncationWarning`] record.
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use thiserror::Error;

use crate::dtype::DType;

// =============================================================================
// Error Types
// =============================================================================

/// The main error type for Polycomm operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// An operand kind the requested collective cannot carry.
    #[error("Unsupported operand kind for {operation}: {kind}")]
    UnsupportedOperandKind {
        /// The collective that rejected the operand.
        operation: &'static str,
        /// Name of the rejected operand kind.
        kind: &'static str,
    },

    /// A capability the active backend cannot perform.
    #[error("Backend '{backend}' does not support {capability}")]
    NotSupported {
        /// Name of the backend.
        backend: String,
        /// The missing capability.
        capability: &'static str,
    },

    /// No backend registered under this name.
    #[error("Unknown backend: {name}")]
    UnknownBackend {
        /// The requested name.
        name: String,
    },

    /// A reduction identifier the backend does not understand.
    #[error("Unsupported reduce op: {op}")]
    UnsupportedReduceOp {
        /// The textual identifier.
        op: String,
    },

    /// Shape mismatch between buffers.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape.
        actual: Vec<usize>,
    },

    /// Data type mismatch between buffers.
    #[error("DType mismatch: expected {expected}, got {actual}")]
    DTypeMismatch {
        /// The expected data type.
        expected: DType,
        /// The actual data type.
        actual: DType,
    },

    /// A rank outside `0..world_size`.
    #[error("Invalid rank {rank} for world size {world_size}")]
    InvalidRank {
        /// The offending rank.
        rank: usize,
        /// Size of the group.
        world_size: usize,
    },

    /// An encoded text row that does not decode.
    #[error("Invalid encoded text: {message}")]
    InvalidText {
        /// What was wrong with the row.
        message: String,
    },

    /// A collective issued after `finalize`.
    #[error("Backend '{backend}' has been finalized")]
    Finalized {
        /// Name of the backend.
        backend: String,
    },

    /// Failure reported by a backend primitive.
    #[error("Backend error: {message}")]
    Backend {
        /// Description from the backend.
        message: String,
    },

    /// Invalid construction options or environment.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// A spawned worker failed.
    #[error("Worker {rank} failed: {message}")]
    Worker {
        /// Rank of the failing worker.
        rank: usize,
        /// The worker's error or panic message.
        message: String,
    },
}

// =============================================================================
// Result Type
// =============================================================================

/// A specialized Result type for Polycomm operations.
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// Helper Functions
// =============================================================================

impl Error {
    /// Creates an unsupported operand kind error.
    #[must_use]
    pub fn unsupported_operand(operation: &'static str, kind: &'static str) -> Self {
        Self::UnsupportedOperandKind { operation, kind }
    }

    /// Creates a not-supported error for a backend capability.
    #[must_use]
    pub fn not_supported(backend: impl Into<String>, capability: &'static str) -> Self {
        Self::NotSupported {
            backend: backend.into(),
            capability,
        }
    }

    /// Creates a shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Creates a backend primitive error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid text error.
    #[must_use]
    pub fn invalid_text(message: impl Into<String>) -> Self {
        Self::InvalidText {
            message: message.into(),
        }
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Emitted when a string exceeds the fixed text encoding capacity.
///
/// The string is truncated and the operation proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncationWarning {
    /// Length of the input in UTF-8 bytes.
    pub original_len: usize,
    /// Number of bytes kept.
    pub capacity: usize,
}

impl core::fmt::Display for TruncationWarning {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Input string size {} is larger than {} and thus will be truncated",
            self.original_len, self.capacity
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
