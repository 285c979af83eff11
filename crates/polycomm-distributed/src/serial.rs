//! Serial Model - Single-Process Reference Backend
//!
//! The model used when no distributed context is active. Every collective is
//! a local identity, shaped exactly like the result a multi-process backend
//! returns for a group of one: all-gather wraps scalars and strings into a
//! one-element sequence, and a 0-d buffer gathers to shape `[1]`.
//!
//! No casting happens here since nothing crosses a process boundary.
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use polycomm_core::{Buffer, Device, Error, Result};

use crate::config::{BackendOptions, SpawnConfig};
use crate::model::{ComputationModel, WorkerFn};
use crate::operand::Operand;
use crate::topology::{NodeLayout, Topology};

/// Name of the serial model.
pub const SERIAL: &str = "serial";

// =============================================================================
// SerialModel
// =============================================================================

/// Single-process model: rank 0 of a group of one.
#[derive(Debug)]
pub struct SerialModel {
    device: Device,
    topology: Topology,
}

impl SerialModel {
    /// Creates a serial model on the best available device.
    #[must_use]
    pub fn new() -> Self {
        Self::on_device(Device::best_available())
    }

    /// Creates a serial model on `device`.
    #[must_use]
    pub fn on_device(device: Device) -> Self {
        tracing::debug!(%device, "created serial model");
        Self {
            device,
            topology: Topology::resolved(NodeLayout {
                nproc_per_node: 1,
                nnodes: 1,
                node_rank: 0,
            }),
        }
    }
}

impl Default for SerialModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputationModel for SerialModel {
    fn name(&self) -> &'static str {
        SERIAL
    }

    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn local_rank(&self) -> usize {
        0
    }

    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn device(&self) -> Device {
        self.device
    }

    fn backend_name(&self) -> Option<&str> {
        None
    }

    fn compute_nproc_per_node(&self) -> Result<usize> {
        Ok(1)
    }

    fn do_all_reduce(&self, _buffer: &mut Buffer, _op: &str) -> Result<()> {
        Ok(())
    }

    fn do_all_gather(&self, buffer: &mut Buffer) -> Result<()> {
        if buffer.ndim() == 0 {
            *buffer = buffer.unsqueeze0();
        }
        Ok(())
    }

    fn do_broadcast(&self, _buffer: &mut Buffer, _src: usize) -> Result<()> {
        Ok(())
    }

    fn all_reduce(&self, operand: Operand, _op: &str) -> Result<Operand> {
        match operand {
            Operand::Scalar(_) | Operand::Buffer(_) => Ok(operand),
            other => Err(Error::unsupported_operand("all_reduce", other.kind().name())),
        }
    }

    fn all_gather(&self, operand: Operand) -> Result<Operand> {
        match operand {
            Operand::Scalar(value) => Ok(Operand::Scalars(vec![value])),
            Operand::Text(text) => Ok(Operand::Texts(vec![text])),
            Operand::Buffer(mut buffer) => {
                self.do_all_gather(&mut buffer)?;
                Ok(Operand::Buffer(buffer))
            }
            other => Err(Error::unsupported_operand("all_gather", other.kind().name())),
        }
    }

    fn broadcast(&self, operand: Operand, src: usize) -> Result<Operand> {
        if src != 0 {
            return Err(Error::InvalidRank {
                rank: src,
                world_size: 1,
            });
        }
        match operand {
            Operand::Scalar(_) | Operand::Text(_) | Operand::Buffer(_) => Ok(operand),
            other => Err(Error::unsupported_operand("broadcast", other.kind().name())),
        }
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        Ok(())
    }

    fn model_name() -> &'static str {
        SERIAL
    }

    fn available_backends() -> &'static [&'static str] {
        &[]
    }

    fn create_from_context() -> Result<Option<Self>> {
        Ok(Some(Self::new()))
    }

    fn create_from_backend(_backend: &str, options: &BackendOptions) -> Result<Self> {
        Ok(options
            .get_device("device")?
            .map_or_else(Self::new, Self::on_device))
    }

    fn spawn(_backend: &str, _config: &SpawnConfig, _entry: WorkerFn) -> Result<()> {
        Err(Error::not_supported(SERIAL, "spawn"))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::worker_fn;
    use crate::operand::Number;
    use polycomm_core::DType;

    #[test]
    fn test_identity() {
        let model = SerialModel::on_device(Device::Cpu);
        assert_eq!(model.rank(), 0);
        assert_eq!(model.world_size(), 1);
        assert_eq!(model.local_rank(), 0);
        assert_eq!(model.nproc_per_node().unwrap(), 1);
        assert_eq!(model.nnodes().unwrap(), 1);
        assert_eq!(model.node_rank().unwrap(), 0);
        assert_eq!(model.backend_name(), None);
        assert_eq!(model.name(), "serial");
        assert_eq!(model.device(), Device::Cpu);
    }

    #[test]
    fn test_all_reduce_identity() {
        let model = SerialModel::new();
        assert_eq!(model.all_reduce(Operand::from(3i64), "sum").unwrap(), Operand::from(3i64));
        let buf = Buffer::from_vec(vec![1.0f32, 2.0], &[2]).unwrap();
        assert_eq!(
            model.all_reduce(Operand::Buffer(buf.clone()), "max").unwrap(),
            Operand::Buffer(buf)
        );
    }

    #[test]
    fn test_all_reduce_rejects_text() {
        let model = SerialModel::new();
        assert_eq!(
            model.all_reduce(Operand::from("abc"), "sum"),
            Err(Error::unsupported_operand("all_reduce", "text"))
        );
    }

    #[test]
    fn test_all_gather_wraps() {
        let model = SerialModel::new();
        assert_eq!(
            model.all_gather(Operand::from(2.5f64)).unwrap(),
            Operand::Scalars(vec![Number::Float(2.5)])
        );
        assert_eq!(
            model.all_gather(Operand::from("abc")).unwrap(),
            Operand::Texts(vec!["abc".into()])
        );
        let buf = Buffer::from_vec(vec![1u8, 2], &[2]).unwrap();
        assert_eq!(
            model.all_gather(Operand::Buffer(buf.clone())).unwrap(),
            Operand::Buffer(buf)
        );
    }

    #[test]
    fn test_all_gather_zero_dim_buffer() {
        let model = SerialModel::new();
        let buf = Buffer::from_vec(vec![4i32], &[]).unwrap();
        let out = model.all_gather(Operand::Buffer(buf)).unwrap().into_buffer().unwrap();
        assert_eq!(out.shape(), &[1]);
    }

    #[test]
    fn test_broadcast_identity() {
        let model = SerialModel::new();
        assert_eq!(model.broadcast(Operand::from("x"), 0).unwrap(), Operand::from("x"));
        let buf = Buffer::zeros(&[2, 2], DType::F64, Device::Cpu);
        assert_eq!(
            model.broadcast(Operand::Buffer(buf.clone()), 0).unwrap(),
            Operand::Buffer(buf)
        );
        assert!(matches!(
            model.broadcast(Operand::from(1i64), 1),
            Err(Error::InvalidRank { .. })
        ));
    }

    #[test]
    fn test_codec_path_matches_overrides() {
        let model = SerialModel::on_device(Device::Cpu);
        let via_codec = crate::codec::wrap_all_gather(&model, Operand::from(7i64)).unwrap();
        assert_eq!(via_codec, model.all_gather(Operand::from(7i64)).unwrap());
        let via_codec = crate::codec::wrap_all_gather(&model, Operand::from("t")).unwrap();
        assert_eq!(via_codec, model.all_gather(Operand::from("t")).unwrap());
    }

    #[test]
    fn test_spawn_not_supported() {
        let entry = worker_fn(|_model| Ok(()));
        assert_eq!(
            SerialModel::spawn("serial", &SpawnConfig::new(2), entry),
            Err(Error::not_supported("serial", "spawn"))
        );
    }

    #[test]
    fn test_create_from_context_and_backend() {
        assert!(SerialModel::create_from_context().unwrap().is_some());
        let options = BackendOptions::new().with("device", "cpu");
        let model = SerialModel::create_from_backend("serial", &options).unwrap();
        assert_eq!(model.device(), Device::Cpu);
    }
}
