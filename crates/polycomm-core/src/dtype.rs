//! Data Types - Polycomm Type System
//!
//! Defines the element representations a [`Buffer`](crate::Buffer) can hold
//! and the [`Element`] trait implemented by every native element type. The
//! runtime [`DType`] tag is what backends inspect to decide whether a buffer
//! must be hosted in a collective-safe floating representation.
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use core::fmt::{self, Debug};
use core::str::FromStr;

use bytemuck::Pod;
use half::f16;
use num_traits::{Bounded, NumCast, ToPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::buffer::BufferData;
use crate::error::Error;

// =============================================================================
// DType Enum
// =============================================================================

/// Runtime representation of buffer element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    /// 16-bit floating point (half precision).
    F16,
    /// 32-bit floating point (single precision).
    #[default]
    F32,
    /// 64-bit floating point (double precision).
    F64,
    /// 8-bit signed integer.
    I8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 8-bit unsigned integer.
    U8,
    /// 32-bit unsigned integer.
    U32,
    /// 64-bit unsigned integer.
    U64,
    /// Boolean type, stored as one byte per element.
    Bool,
}

impl DType {
    /// Every supported dtype.
    pub const ALL: [DType; 11] = [
        Self::F16,
        Self::F32,
        Self::F64,
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::U8,
        Self::U32,
        Self::U64,
        Self::Bool,
    ];

    /// Returns the size in bytes of this data type.
    #[must_use]
    pub const fn size_of(self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Bool => 1,
            Self::F16 | Self::I16 => 2,
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::F64 | Self::I64 | Self::U64 => 8,
        }
    }

    /// Returns true if this is a floating point type.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }

    /// Returns true if this is an integer type.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::U8 | Self::U32 | Self::U64
        )
    }

    /// Returns the name of this data type as a string.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dtype = match s.trim().to_ascii_lowercase().as_str() {
            "f16" | "float16" | "half" => Self::F16,
            "f32" | "float32" | "float" => Self::F32,
            "f64" | "float64" | "double" => Self::F64,
            "i8" | "int8" => Self::I8,
            "i16" | "int16" | "short" => Self::I16,
            "i32" | "int32" | "int" => Self::I32,
            "i64" | "int64" | "long" => Self::I64,
            "u8" | "uint8" => Self::U8,
            "u32" | "uint32" => Self::U32,
            "u64" | "uint64" => Self::U64,
            "bool" => Self::Bool,
            other => return Err(Error::invalid_config(format!("unknown dtype '{other}'"))),
        };
        Ok(dtype)
    }
}

impl Serialize for DType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for DType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Element Trait
// =============================================================================

/// Trait for native types that can be stored in a [`Buffer`](crate::Buffer).
///
/// The arithmetic hooks are what reductions run on. Integer types wrap on
/// overflow, matching what wire-level reductions do.
pub trait Element:
    Copy + Debug + Default + Send + Sync + Pod + NumCast + ToPrimitive + Bounded + PartialOrd + 'static
{
    /// The runtime dtype for this type.
    const DTYPE: DType;

    /// Sum of two elements.
    fn add_elem(self, other: Self) -> Self;

    /// Product of two elements.
    fn mul_elem(self, other: Self) -> Self;

    /// Divides by a participant count.
    fn div_count(self, count: usize) -> Self;

    #[doc(hidden)]
    fn into_data(data: Vec<Self>) -> BufferData;

    #[doc(hidden)]
    fn view(data: &BufferData) -> Option<&[Self]>;

    /// Smaller of two elements.
    #[must_use]
    fn min_elem(self, other: Self) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }

    /// Larger of two elements.
    #[must_use]
    fn max_elem(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

macro_rules! impl_int_element {
    ($ty:ty, $dtype:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$dtype;

            fn add_elem(self, other: Self) -> Self {
                self.wrapping_add(other)
            }

            fn mul_elem(self, other: Self) -> Self {
                self.wrapping_mul(other)
            }

            fn div_count(self, count: usize) -> Self {
                match <$ty as NumCast>::from(count) {
                    Some(n) if n != 0 => self / n,
                    _ => self,
                }
            }

            fn into_data(data: Vec<Self>) -> BufferData {
                BufferData::$dtype(data)
            }

            fn view(data: &BufferData) -> Option<&[Self]> {
                match data {
                    BufferData::$dtype(v) => Some(v.as_slice()),
                    _ => None,
                }
            }
        }
    };
}

macro_rules! impl_float_element {
    ($ty:ty, $dtype:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$dtype;

            fn add_elem(self, other: Self) -> Self {
                self + other
            }

            fn mul_elem(self, other: Self) -> Self {
                self * other
            }

            fn div_count(self, count: usize) -> Self {
                match <$ty as NumCast>::from(count) {
                    Some(n) => self / n,
                    None => self,
                }
            }

            fn into_data(data: Vec<Self>) -> BufferData {
                BufferData::$dtype(data)
            }

            fn view(data: &BufferData) -> Option<&[Self]> {
                match data {
                    BufferData::$dtype(v) => Some(v.as_slice()),
                    _ => None,
                }
            }
        }
    };
}

impl_float_element!(f16, F16);
impl_float_element!(f32, F32);
impl_float_element!(f64, F64);
impl_int_element!(i8, I8);
impl_int_element!(i16, I16);
impl_int_element!(i32, I32);
impl_int_element!(i64, I64);
impl_int_element!(u8, U8);
impl_int_element!(u32, U32);
impl_int_element!(u64, U64);

// =============================================================================
// Casting
// =============================================================================

/// Converts one element, saturating at the target bounds when out of range.
///
/// Float to integer truncates toward zero. NaN maps to the target's default.
#[must_use]
pub fn cast_element<S: ToPrimitive + Copy, T: NumCast + Bounded + Default>(value: S) -> T {
    if let Some(v) = T::from(value) {
        return v;
    }
    match value.to_f64() {
        Some(f) if f.is_nan() => T::default(),
        Some(f) if f > 0.0 => T::max_value(),
        Some(_) => T::min_value(),
        None => T::default(),
    }
}

/// Converts a slice element by element with [`cast_element`].
#[must_use]
pub fn cast_slice<S: ToPrimitive + Copy, T: NumCast + Bounded + Default>(src: &[S]) -> Vec<T> {
    src.iter().map(|&x| cast_element(x)).collect()
}

// =============================================================================
// Tests
// =============================================================================
