//! Operand - Type-Polymorphic Collective Payloads
//!
//! Every public collective accepts and returns an [`Operand`]. Scalars and
//! strings are converted to native [`Buffer`]s by the codec before a backend
//! sees them; the list variants only ever appear as results (all-gather of
//! scalars or strings) and are rejected as inputs.
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use core::fmt;

use polycomm_core::{Buffer, DType};

// =============================================================================
// Number
// =============================================================================

/// A numeric scalar that remembers whether it was integral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// Integral value.
    Int(i64),
    /// Floating point value.
    Float(f64),
}

impl Number {
    /// Returns true for [`Number::Int`].
    #[must_use]
    pub const fn is_int(self) -> bool {
        matches!(self, Self::Int(_))
    }

    /// Returns the value as `f64`.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Returns the value as `i64`, truncating floats toward zero.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Int(v) => v,
            Self::Float(v) => polycomm_core::cast_element(v),
        }
    }

    /// The dtype this scalar is hosted in when no collective dtype is set.
    #[must_use]
    pub const fn natural_dtype(self) -> DType {
        match self {
            Self::Int(_) => DType::I64,
            Self::Float(_) => DType::F64,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_number_from {
    ($variant:ident, $cast:ty, $($ty:ty),+) => {
        $(
            impl From<$ty> for Number {
                fn from(value: $ty) -> Self {
                    Self::$variant(<$cast>::from(value))
                }
            }
        )+
    };
}

impl_number_from!(Int, i64, i8, i16, i32, i64, u8, u16, u32);
impl_number_from!(Float, f64, f32, f64);

// =============================================================================
// Operand
// =============================================================================

/// Discriminant of an [`Operand`], used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// A single number.
    Scalar,
    /// A single string.
    Text,
    /// A native buffer.
    Buffer,
    /// A sequence of numbers.
    ScalarList,
    /// A sequence of strings.
    TextList,
}

impl OperandKind {
    /// Returns the name of this kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Text => "text",
            Self::Buffer => "buffer",
            Self::ScalarList => "scalar list",
            Self::TextList => "text list",
        }
    }
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input or output of a collective operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A number.
    Scalar(Number),
    /// A UTF-8 string.
    Text(String),
    /// A native buffer.
    Buffer(Buffer),
    /// Numbers collected in rank order.
    Scalars(Vec<Number>),
    /// Strings collected in rank order.
    Texts(Vec<String>),
}

impl Operand {
    /// Returns the kind of this operand.
    #[must_use]
    pub fn kind(&self) -> OperandKind {
        match self {
            Self::Scalar(_) => OperandKind::Scalar,
            Self::Text(_) => OperandKind::Text,
            Self::Buffer(_) => OperandKind::Buffer,
            Self::Scalars(_) => OperandKind::ScalarList,
            Self::Texts(_) => OperandKind::TextList,
        }
    }

    /// Returns the number, if this is a scalar.
    #[must_use]
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Self::Scalar(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the buffer, if this is one.
    #[must_use]
    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Consumes the operand, returning the buffer if this is one.
    #[must_use]
    pub fn into_buffer(self) -> Option<Buffer> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Consumes the operand, returning the numbers if this is a scalar list.
    #[must_use]
    pub fn into_scalars(self) -> Option<Vec<Number>> {
        match self {
            Self::Scalars(v) => Some(v),
            _ => None,
        }
    }

    /// Consumes the operand, returning the strings if this is a text list.
    #[must_use]
    pub fn into_texts(self) -> Option<Vec<String>> {
        match self {
            Self::Texts(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Number> for Operand {
    fn from(value: Number) -> Self {
        Self::Scalar(value)
    }
}

macro_rules! impl_operand_from_number {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Self::Scalar(Number::from(value))
                }
            }
        )+
    };
}

impl_operand_from_number!(i8, i16, i32, i64, u8, u16, u32, f32, f64);

impl From<Buffer> for Operand {
    fn from(value: Buffer) -> Self {
        Self::Buffer(value)
    }
}

impl From<String> for Operand {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

// =============================================================================
// Tests
// =============================================================================
