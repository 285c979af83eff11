//! Communication - High-level Communication Utilities
//!
//! Buffer-in-place helpers for the common collective patterns, usable with
//! any model including `dyn ComputationModel`.
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use polycomm_core::{Buffer, Error, Result};

use crate::model::ComputationModel;
use crate::operand::Operand;
use crate::reduce::ReduceOp;

fn expect_buffer(result: Operand) -> Result<Buffer> {
    let kind = result.kind();
    result
        .into_buffer()
        .ok_or_else(|| Error::backend(format!("collective returned a {kind}, expected a buffer")))
}

fn reduce_in_place<M>(buffer: &mut Buffer, op: ReduceOp, model: &M) -> Result<()>
where
    M: ComputationModel + ?Sized,
{
    let reduced = model.all_reduce(Operand::Buffer(buffer.clone()), op.name())?;
    *buffer = expect_buffer(reduced)?;
    Ok(())
}

// =============================================================================
// All-Reduce Operations
// =============================================================================

/// Performs all-reduce sum on a buffer.
pub fn all_reduce_sum<M: ComputationModel + ?Sized>(buffer: &mut Buffer, model: &M) -> Result<()> {
    reduce_in_place(buffer, ReduceOp::Sum, model)
}

/// Performs all-reduce mean on a buffer.
pub fn all_reduce_mean<M: ComputationModel + ?Sized>(buffer: &mut Buffer, model: &M) -> Result<()> {
    reduce_in_place(buffer, ReduceOp::Average, model)
}

/// Performs all-reduce min on a buffer.
pub fn all_reduce_min<M: ComputationModel + ?Sized>(buffer: &mut Buffer, model: &M) -> Result<()> {
    reduce_in_place(buffer, ReduceOp::Min, model)
}

/// Performs all-reduce max on a buffer.
pub fn all_reduce_max<M: ComputationModel + ?Sized>(buffer: &mut Buffer, model: &M) -> Result<()> {
    reduce_in_place(buffer, ReduceOp::Max, model)
}

/// Performs all-reduce product on a buffer.
pub fn all_reduce_product<M: ComputationModel + ?Sized>(
    buffer: &mut Buffer,
    model: &M,
) -> Result<()> {
    reduce_in_place(buffer, ReduceOp::Product, model)
}

// =============================================================================
// Broadcast Operations
// =============================================================================

/// Broadcasts a buffer from the root rank (0).
pub fn broadcast<M: ComputationModel + ?Sized>(buffer: &mut Buffer, model: &M) -> Result<()> {
    broadcast_from(buffer, 0, model)
}

/// Broadcasts a buffer from a specific rank.
pub fn broadcast_from<M: ComputationModel + ?Sized>(
    buffer: &mut Buffer,
    src: usize,
    model: &M,
) -> Result<()> {
    let received = model.broadcast(Operand::Buffer(buffer.clone()), src)?;
    *buffer = expect_buffer(received)?;
    Ok(())
}

// =============================================================================
// Gather Operations
// =============================================================================

/// All-gathers a buffer across all ranks, concatenated along dimension 0.
pub fn all_gather<M: ComputationModel + ?Sized>(buffer: &Buffer, model: &M) -> Result<Buffer> {
    expect_buffer(model.all_gather(Operand::Buffer(buffer.clone()))?)
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Synchronizes all processes.
pub fn barrier<M: ComputationModel + ?Sized>(model: &M) -> Result<()> {
    model.barrier()
}

/// Checks if this is the main process (rank 0).
#[must_use]
pub fn is_main_process<M: ComputationModel + ?Sized>(model: &M) -> bool {
    model.rank() == 0
}

/// Returns the world size.
#[must_use]
pub fn world_size<M: ComputationModel + ?Sized>(model: &M) -> usize {
    model.world_size()
}

/// Returns the current rank.
#[must_use]
pub fn rank<M: ComputationModel + ?Sized>(model: &M) -> usize {
    model.rank()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendOptions;
    use crate::serial::SerialModel;
    use crate::threaded::ThreadedModel;
    use std::thread;

    #[test]
    fn test_helpers_on_serial_model() {
        let model = SerialModel::new();
        let mut buffer = Buffer::from_vec(vec![1.0f32, 2.0, 3.0], &[3]).unwrap();

        all_reduce_sum(&mut buffer, &model).unwrap();
        assert_eq!(buffer.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);

        broadcast(&mut buffer, &model).unwrap();
        assert_eq!(buffer.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);

        let gathered = all_gather(&buffer, &model).unwrap();
        assert_eq!(gathered.shape(), &[3]);

        barrier(&model).unwrap();
        assert!(is_main_process(&model));
        assert_eq!(world_size(&model), 1);
        assert_eq!(rank(&model), 0);
    }

    #[test]
    fn test_helpers_on_dyn_model() {
        let model: Box<dyn ComputationModel> = Box::new(SerialModel::new());
        let mut buffer = Buffer::from_vec(vec![5i32], &[1]).unwrap();
        all_reduce_max(&mut buffer, model.as_ref()).unwrap();
        assert_eq!(buffer.to_vec::<i32>().unwrap(), vec![5]);
    }

    #[test]
    fn test_helpers_across_ranks() {
        let handles: Vec<_> = ThreadedModel::create_world(2, &BackendOptions::new())
            .unwrap()
            .into_iter()
            .map(|model| {
                thread::spawn(move || {
                    let base = model.rank() as f64 + 1.0;
                    let mut mean = Buffer::from_vec(vec![base, base * 2.0], &[1, 2]).unwrap();
                    all_reduce_mean(&mut mean, &model).unwrap();

                    let mut product = Buffer::from_vec(vec![base], &[1]).unwrap();
                    all_reduce_product(&mut product, &model).unwrap();

                    let mut min = Buffer::from_vec(vec![base], &[1]).unwrap();
                    all_reduce_min(&mut min, &model).unwrap();

                    let mut from_one = Buffer::from_vec(vec![base], &[1]).unwrap();
                    broadcast_from(&mut from_one, 1, &model).unwrap();

                    let gathered = all_gather(&mean, &model).unwrap();
                    (mean, product, min, from_one, gathered)
                })
            })
            .collect();

        for handle in handles {
            let (mean, product, min, from_one, gathered) = handle.join().unwrap();
            assert_eq!(mean.to_vec::<f64>().unwrap(), vec![1.5, 3.0]);
            assert_eq!(product.to_vec::<f64>().unwrap(), vec![2.0]);
            assert_eq!(min.to_vec::<f64>().unwrap(), vec![1.0]);
            assert_eq!(from_one.to_vec::<f64>().unwrap(), vec![2.0]);
            assert_eq!(gathered.shape(), &[2, 2]);
        }
    }
}
