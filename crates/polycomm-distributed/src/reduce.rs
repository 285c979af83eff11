//! Reduce Operations - Reduction Descriptors
//!
//! The collective contract only carries a textual reduction identifier;
//! backends that fold buffers themselves parse it into a [`ReduceOp`].
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use core::fmt;
use core::str::FromStr;

use polycomm_core::{Buffer, Element, ElementwiseOp, Error, Result};

// =============================================================================
// Reduce Operations
// =============================================================================

/// Reduction operation for collective communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// Sum all values.
    Sum,
    /// Compute product of all values.
    Product,
    /// Find minimum value.
    Min,
    /// Find maximum value.
    Max,
    /// Compute average of all values.
    Average,
}

impl ReduceOp {
    /// Returns the canonical identifier.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Product => "product",
            Self::Min => "min",
            Self::Max => "max",
            Self::Average => "mean",
        }
    }

    /// Reduces buffers contributed in rank order into one buffer.
    ///
    /// All contributions must share shape and dtype.
    pub fn reduce<'a, I>(self, contributions: I) -> Result<Buffer>
    where
        I: IntoIterator<Item = &'a Buffer>,
    {
        let mut iter = contributions.into_iter();
        let Some(first) = iter.next() else {
            return Err(Error::backend("reduction over zero contributions"));
        };
        let mut acc = first.clone();
        let mut count = 1;
        for buf in iter {
            acc.combine_in_place(buf, &self)?;
            count += 1;
        }
        if self == Self::Average {
            acc.div_count_in_place(count);
        }
        Ok(acc)
    }
}

impl ElementwiseOp for ReduceOp {
    fn apply<T: Element>(&self, a: T, b: T) -> T {
        match self {
            Self::Sum | Self::Average => a.add_elem(b),
            Self::Product => a.mul_elem(b),
            Self::Min => a.min_elem(b),
            Self::Max => a.max_elem(b),
        }
    }
}

impl FromStr for ReduceOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "product" | "prod" => Ok(Self::Product),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "mean" | "avg" | "average" => Ok(Self::Average),
            _ => Err(Error::UnsupportedReduceOp { op: s.to_string() }),
        }
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(values: &[f32]) -> Buffer {
        Buffer::from_slice(values, &[values.len()]).unwrap()
    }

    #[test]
    fn test_reduce_op_sum() {
        assert_eq!(ReduceOp::Sum.apply(1.0f32, 2.0), 3.0);
    }

    #[test]
    fn test_reduce_op_product() {
        assert_eq!(ReduceOp::Product.apply(2.0f32, 3.0), 6.0);
    }

    #[test]
    fn test_reduce_op_min_max() {
        assert_eq!(ReduceOp::Min.apply(2i64, 3), 2);
        assert_eq!(ReduceOp::Max.apply(2i64, 3), 3);
    }

    #[test]
    fn test_reduce_sum() {
        let parts = [buf(&[1.0, 2.0]), buf(&[3.0, 4.0]), buf(&[5.0, 6.0])];
        let out = ReduceOp::Sum.reduce(&parts).unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![9.0, 12.0]);
    }

    #[test]
    fn test_reduce_average() {
        let parts = [buf(&[1.0, 2.0]), buf(&[3.0, 4.0])];
        let out = ReduceOp::Average.reduce(&parts).unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_reduce_empty_fails() {
        assert!(ReduceOp::Sum.reduce(&[]).is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!("SUM".parse::<ReduceOp>().unwrap(), ReduceOp::Sum);
        assert_eq!("prod".parse::<ReduceOp>().unwrap(), ReduceOp::Product);
        assert_eq!("avg".parse::<ReduceOp>().unwrap(), ReduceOp::Average);
        assert_eq!(
            "xor".parse::<ReduceOp>(),
            Err(Error::UnsupportedReduceOp { op: "xor".into() })
        );
    }

    #[test]
    fn test_name_round_trip() {
        for op in [
            ReduceOp::Sum,
            ReduceOp::Product,
            ReduceOp::Min,
            ReduceOp::Max,
            ReduceOp::Average,
        ] {
            assert_eq!(op.name().parse::<ReduceOp>().unwrap(), op);
        }
    }
}
