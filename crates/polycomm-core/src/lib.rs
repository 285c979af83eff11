//! Polycomm Core - Foundation Layer for Polycomm
//!
//! This crate provides the types every communication backend shares: compute
//! locations, element dtypes, the native multi-dimensional [`Buffer`] that
//! collectives operate on, and the unified error type.
//!
//! # Key Features
//! - Device placement tags (CPU, CUDA ordinals) with host availability probing
//! - Runtime dtype system (f16, f32, f64, signed/unsigned integers, bool)
//! - Saturating dtype casts used to host payloads in a collective-safe dtype
//! - Zero-copy byte views for wire transport
//!
//! # Example
//! ```rust
//! use polycomm_core::{Buffer, DType, Device};
//!
//! let buf = Buffer::zeros(&[2, 4], DType::I64, Device::Cpu);
//! assert_eq!(buf.numel(), 8);
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
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::unnecessary_wraps)]

// =============================================================================
// Modules
// =============================================================================

pub mod buffer;
pub mod device;
pub mod dtype;
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

pub use buffer::{Buffer, BufferData, ElementwiseOp};
pub use device::{accelerator_count, Device};
pub use dtype::{cast_element, cast_slice, DType, Element};
pub use error::{Error, Result, TruncationWarning};
pub use half::f16;

// =============================================================================
// Prelude
// =============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::buffer::{Buffer, ElementwiseOp};
    pub use crate::device::Device;
    pub use crate::dtype::{DType, Element};
    pub use crate::error::{Error, Result, TruncationWarning};
}
