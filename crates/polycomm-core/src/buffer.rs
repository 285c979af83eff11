//! Buffer - Native Multi-Dimensional Operand
//!
//! The single representation every communication backend operates on: a
//! contiguous, row-major block of typed elements with a shape, a runtime
//! [`DType`] and a [`Device`] placement tag.
//!
//! # Key Features
//! - Typed storage for every [`DType`]
//! - Saturating dtype casts and in-place relocation
//! - Row concatenation and elementwise combination for collective backends
//! - Zero-copy byte view for wire transport
//!
//! # Example
//! ```rust
//! use polycomm_core::{Buffer, DType};
//!
//! let buf = Buffer::from_vec(vec![1i64, 2, 3], &[3]).unwrap();
//! let as_float = buf.to_dtype(DType::F32);
//! assert_eq!(as_float.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
//! ```
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use half::f16;
use num_traits::ToPrimitive;

use crate::device::Device;
use crate::dtype::{cast_slice, DType, Element};
use crate::error::{Error, Result};

// =============================================================================
// Storage
// =============================================================================

/// Typed element storage behind a [`Buffer`].
#[derive(Debug, Clone, PartialEq)]
pub enum BufferData {
    /// Half precision elements.
    F16(Vec<f16>),
    /// Single precision elements.
    F32(Vec<f32>),
    /// Double precision elements.
    F64(Vec<f64>),
    /// 8-bit signed elements.
    I8(Vec<i8>),
    /// 16-bit signed elements.
    I16(Vec<i16>),
    /// 32-bit signed elements.
    I32(Vec<i32>),
    /// 64-bit signed elements.
    I64(Vec<i64>),
    /// 8-bit unsigned elements.
    U8(Vec<u8>),
    /// 32-bit unsigned elements.
    U32(Vec<u32>),
    /// 64-bit unsigned elements.
    U64(Vec<u64>),
    /// Booleans stored as 0/1 bytes.
    Bool(Vec<u8>),
}

/// Runs `$body` with `$v` bound to the typed vector inside `$data`.
macro_rules! with_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            BufferData::F16($v) => $body,
            BufferData::F32($v) => $body,
            BufferData::F64($v) => $body,
            BufferData::I8($v) => $body,
            BufferData::I16($v) => $body,
            BufferData::I32($v) => $body,
            BufferData::I64($v) => $body,
            BufferData::U8($v) => $body,
            BufferData::U32($v) => $body,
            BufferData::U64($v) => $body,
            BufferData::Bool($v) => $body,
        }
    };
}

impl BufferData {
    fn dtype(&self) -> DType {
        match self {
            Self::F16(_) => DType::F16,
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
            Self::I8(_) => DType::I8,
            Self::I16(_) => DType::I16,
            Self::I32(_) => DType::I32,
            Self::I64(_) => DType::I64,
            Self::U8(_) => DType::U8,
            Self::U32(_) => DType::U32,
            Self::U64(_) => DType::U64,
            Self::Bool(_) => DType::Bool,
        }
    }

    fn len(&self) -> usize {
        with_data!(self, v => v.len())
    }

    fn zeros(len: usize, dtype: DType) -> Self {
        match dtype {
            DType::F16 => Self::F16(vec![f16::ZERO; len]),
            DType::F32 => Self::F32(vec![0.0; len]),
            DType::F64 => Self::F64(vec![0.0; len]),
            DType::I8 => Self::I8(vec![0; len]),
            DType::I16 => Self::I16(vec![0; len]),
            DType::I32 => Self::I32(vec![0; len]),
            DType::I64 => Self::I64(vec![0; len]),
            DType::U8 => Self::U8(vec![0; len]),
            DType::U32 => Self::U32(vec![0; len]),
            DType::U64 => Self::U64(vec![0; len]),
            DType::Bool => Self::Bool(vec![0; len]),
        }
    }

    fn convert<S: ToPrimitive + Copy>(src: &[S], dtype: DType) -> Self {
        match dtype {
            DType::F16 => Self::F16(cast_slice(src)),
            DType::F32 => Self::F32(cast_slice(src)),
            DType::F64 => Self::F64(cast_slice(src)),
            DType::I8 => Self::I8(cast_slice(src)),
            DType::I16 => Self::I16(cast_slice(src)),
            DType::I32 => Self::I32(cast_slice(src)),
            DType::I64 => Self::I64(cast_slice(src)),
            DType::U8 => Self::U8(cast_slice(src)),
            DType::U32 => Self::U32(cast_slice(src)),
            DType::U64 => Self::U64(cast_slice(src)),
            DType::Bool => Self::Bool(
                src.iter()
                    .map(|x| u8::from(x.to_f64().is_some_and(|f| f != 0.0)))
                    .collect(),
            ),
        }
    }

    fn cast(&self, dtype: DType) -> Self {
        if self.dtype() == dtype {
            return self.clone();
        }
        with_data!(self, v => Self::convert(v, dtype))
    }

    fn extend_from(&mut self, other: &Self) -> Result<()> {
        match (self, other) {
            (Self::F16(a), Self::F16(b)) => a.extend_from_slice(b),
            (Self::F32(a), Self::F32(b)) => a.extend_from_slice(b),
            (Self::F64(a), Self::F64(b)) => a.extend_from_slice(b),
            (Self::I8(a), Self::I8(b)) => a.extend_from_slice(b),
            (Self::I16(a), Self::I16(b)) => a.extend_from_slice(b),
            (Self::I32(a), Self::I32(b)) => a.extend_from_slice(b),
            (Self::I64(a), Self::I64(b)) => a.extend_from_slice(b),
            (Self::U8(a), Self::U8(b)) => a.extend_from_slice(b),
            (Self::U32(a), Self::U32(b)) => a.extend_from_slice(b),
            (Self::U64(a), Self::U64(b)) => a.extend_from_slice(b),
            (Self::Bool(a), Self::Bool(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(Error::DTypeMismatch {
                    expected: a.dtype(),
                    actual: b.dtype(),
                })
            }
        }
        Ok(())
    }
}

// =============================================================================
// Elementwise Operations
// =============================================================================

/// A binary elementwise operation generic over the element type.
///
/// Implemented by reduction descriptors so a backend can fold buffers of any
/// dtype without knowing the concrete element type.
pub trait ElementwiseOp {
    /// Combines two elements.
    fn apply<T: Element>(&self, a: T, b: T) -> T;
}

fn zip_in_place<T: Element, O: ElementwiseOp>(dst: &mut [T], src: &[T], op: &O) {
    for (a, &b) in dst.iter_mut().zip(src) {
        *a = op.apply(*a, b);
    }
}

// =============================================================================
// Buffer
// =============================================================================

/// A contiguous multi-dimensional array with a dtype and a device tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    data: BufferData,
    shape: Vec<usize>,
    device: Device,
}

impl Buffer {
    /// Creates a CPU buffer from a vector and a shape.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the shape does not describe `data.len()` elements.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        Self::from_data(T::into_data(data), shape, Device::Cpu)
    }

    /// Creates a CPU buffer by copying a slice.
    pub fn from_slice<T: Element>(data: &[T], shape: &[usize]) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape)
    }

    /// Creates a CPU boolean buffer.
    pub fn from_bools(data: &[bool], shape: &[usize]) -> Result<Self> {
        let bytes = data.iter().map(|&b| u8::from(b)).collect();
        Self::from_data(BufferData::Bool(bytes), shape, Device::Cpu)
    }

    /// Creates a buffer from raw storage.
    pub fn from_data(data: BufferData, shape: &[usize], device: Device) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::shape_mismatch(shape, &[data.len()]));
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
            device,
        })
    }

    /// Creates a one-element CPU buffer of shape `[1]`.
    #[must_use]
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            data: T::into_data(vec![value]),
            shape: vec![1],
            device: Device::Cpu,
        }
    }

    /// Creates a zero-filled buffer.
    #[must_use]
    pub fn zeros(shape: &[usize], dtype: DType, device: Device) -> Self {
        let len = shape.iter().product();
        Self {
            data: BufferData::zeros(len, dtype),
            shape: shape.to_vec(),
            device,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Returns the shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    /// Returns the element dtype.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Returns the device tag.
    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Returns the raw storage.
    #[must_use]
    pub fn data(&self) -> &BufferData {
        &self.data
    }

    /// Borrows the elements as `T`, if the dtype matches.
    #[must_use]
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::view(&self.data)
    }

    /// Copies the elements out as `T`.
    ///
    /// # Errors
    /// Returns `DTypeMismatch` if the buffer does not hold `T`.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.as_slice::<T>()
            .map(<[T]>::to_vec)
            .ok_or(Error::DTypeMismatch {
                expected: T::DTYPE,
                actual: self.dtype(),
            })
    }

    /// Copies the elements out as booleans.
    pub fn to_bools(&self) -> Result<Vec<bool>> {
        match &self.data {
            BufferData::Bool(v) => Ok(v.iter().map(|&b| b != 0).collect()),
            other => Err(Error::DTypeMismatch {
                expected: DType::Bool,
                actual: other.dtype(),
            }),
        }
    }

    /// Copies the elements out as `f64`, whatever the dtype.
    #[must_use]
    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_data!(&self.data, v => v.iter().map(|x| x.to_f64().unwrap_or(f64::NAN)).collect())
    }

    /// Borrowed byte view of the elements in native endianness.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        with_data!(&self.data, v => bytemuck::cast_slice(v.as_slice()))
    }

    // -------------------------------------------------------------------------
    // Conversions
    // -------------------------------------------------------------------------

    /// Returns a copy cast to `dtype`.
    #[must_use]
    pub fn to_dtype(&self, dtype: DType) -> Self {
        Self {
            data: self.data.cast(dtype),
            shape: self.shape.clone(),
            device: self.device,
        }
    }

    /// Casts the elements to `dtype` in place.
    pub fn cast_in_place(&mut self, dtype: DType) {
        if self.dtype() != dtype {
            self.data = self.data.cast(dtype);
        }
    }

    /// Returns a copy placed on `device`.
    #[must_use]
    pub fn to_device(&self, device: Device) -> Self {
        let mut out = self.clone();
        out.relocate(device);
        out
    }

    /// Moves the buffer to `device` in place.
    pub fn relocate(&mut self, device: Device) {
        self.device = device;
    }

    // -------------------------------------------------------------------------
    // Shape Operations
    // -------------------------------------------------------------------------

    /// Returns a buffer with the same elements and a new shape.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != self.numel() {
            return Err(Error::shape_mismatch(shape, &self.shape));
        }
        Ok(Self {
            data: self.data.clone(),
            shape: shape.to_vec(),
            device: self.device,
        })
    }

    /// Adds a leading dimension of size 1.
    #[must_use]
    pub fn unsqueeze0(&self) -> Self {
        let mut shape = Vec::with_capacity(self.ndim() + 1);
        shape.push(1);
        shape.extend_from_slice(&self.shape);
        Self {
            data: self.data.clone(),
            shape,
            device: self.device,
        }
    }

    /// Concatenates buffers along dimension 0.
    ///
    /// A 0-d buffer counts as a single row. All parts must share dtype and
    /// trailing dimensions. The result lives on the first part's device.
    pub fn concat0(parts: &[Buffer]) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Err(Error::backend("cannot concatenate zero buffers"));
        };
        let trailing = first.shape.get(1..).unwrap_or(&[]).to_vec();
        let mut data = BufferData::zeros(0, first.dtype());
        let mut rows = 0;
        for part in parts {
            let part_trailing = part.shape.get(1..).unwrap_or(&[]);
            if part_trailing != trailing.as_slice() {
                return Err(Error::shape_mismatch(&first.shape, &part.shape));
            }
            data.extend_from(&part.data)?;
            rows += part.shape.first().copied().unwrap_or(1);
        }
        let mut shape = vec![rows];
        shape.extend(trailing);
        Self::from_data(data, &shape, first.device)
    }

    // -------------------------------------------------------------------------
    // Elementwise
    // -------------------------------------------------------------------------

    /// Folds `other` into `self` elementwise with `op`.
    ///
    /// # Errors
    /// Returns `DTypeMismatch` or `ShapeMismatch` if the operands disagree.
    pub fn combine_in_place<O: ElementwiseOp>(&mut self, other: &Buffer, op: &O) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::shape_mismatch(&self.shape, &other.shape));
        }
        match (&mut self.data, &other.data) {
            (BufferData::F16(a), BufferData::F16(b)) => zip_in_place(a, b, op),
            (BufferData::F32(a), BufferData::F32(b)) => zip_in_place(a, b, op),
            (BufferData::F64(a), BufferData::F64(b)) => zip_in_place(a, b, op),
            (BufferData::I8(a), BufferData::I8(b)) => zip_in_place(a, b, op),
            (BufferData::I16(a), BufferData::I16(b)) => zip_in_place(a, b, op),
            (BufferData::I32(a), BufferData::I32(b)) => zip_in_place(a, b, op),
            (BufferData::I64(a), BufferData::I64(b)) => zip_in_place(a, b, op),
            (BufferData::U8(a), BufferData::U8(b)) => zip_in_place(a, b, op),
            (BufferData::U32(a), BufferData::U32(b)) => zip_in_place(a, b, op),
            (BufferData::U64(a), BufferData::U64(b)) => zip_in_place(a, b, op),
            (BufferData::Bool(a), BufferData::Bool(b)) => {
                zip_in_place(a, b, op);
                for x in a.iter_mut() {
                    *x = u8::from(*x != 0);
                }
            }
            (a, b) => {
                return Err(Error::DTypeMismatch {
                    expected: a.dtype(),
                    actual: b.dtype(),
                })
            }
        }
        Ok(())
    }

    /// Divides every element by a participant count.
    pub fn div_count_in_place(&mut self, count: usize) {
        if matches!(self.data, BufferData::Bool(_)) {
            return;
        }
        with_data!(&mut self.data, v => {
            for x in v.iter_mut() {
                *x = x.div_count(count);
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
