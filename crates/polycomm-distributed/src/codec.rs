//! Operand Codec - Native Buffer Normalization Around Collectives
//!
//! Backends only ever see [`Buffer`]s. This module turns scalars and strings
//! into buffers before a primitive runs and turns the result back into the
//! caller's operand kind afterwards. It also hosts the buffer on the model's
//! device and collective dtype for the duration of the primitive call.
//!
//! Text travels as rows of [`TEXT_ROW_LEN`] 64-bit integers: up to
//! [`TEXT_CAPACITY`] UTF-8 byte values followed by zero padding, with the
//! byte length in the last column. Longer strings are cut at the last
//! character boundary that fits and a [`TruncationWarning`] is logged.
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use core::ops::{Deref, DerefMut};

use polycomm_core::{Buffer, DType, Device, Error, Result, TruncationWarning};

use crate::model::ComputationModel;
use crate::operand::{Number, Operand};

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of UTF-8 bytes an encoded string keeps.
pub const TEXT_CAPACITY: usize = 1024;

/// Elements per encoded text row: the payload plus the trailing length.
pub const TEXT_ROW_LEN: usize = TEXT_CAPACITY + 1;

// =============================================================================
// Text Encoding
// =============================================================================

/// Encodes a string as a `[1, TEXT_ROW_LEN]` `I64` buffer on `device`.
///
/// Returns the truncation diagnostic when the string did not fit.
pub fn encode_text_checked(
    text: &str,
    device: Device,
) -> Result<(Buffer, Option<TruncationWarning>)> {
    let mut end = text.len().min(TEXT_CAPACITY);
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    let warning = (end < text.len()).then(|| TruncationWarning {
        original_len: text.len(),
        capacity: TEXT_CAPACITY,
    });
    if let Some(warning) = &warning {
        tracing::warn!(
            original_len = warning.original_len,
            kept = end,
            "{warning}"
        );
    }

    let mut row = vec![0i64; TEXT_ROW_LEN];
    for (slot, &byte) in row.iter_mut().zip(&text.as_bytes()[..end]) {
        *slot = i64::from(byte);
    }
    row[TEXT_CAPACITY] = end as i64;

    let mut buffer = Buffer::from_vec(row, &[1, TEXT_ROW_LEN])?;
    buffer.relocate(device);
    Ok((buffer, warning))
}

/// Encodes a string as a `[1, TEXT_ROW_LEN]` `I64` buffer on `device`.
pub fn encode_text(text: &str, device: Device) -> Result<Buffer> {
    encode_text_checked(text, device).map(|(buffer, _)| buffer)
}

/// Decodes every row of an encoded text batch, in row order.
///
/// Rows hosted in another dtype (for example after a float collective) are
/// cast back to integers first.
pub fn decode_text(buffer: &Buffer) -> Result<Vec<String>> {
    match buffer.shape() {
        [_, cols] if *cols == TEXT_ROW_LEN => {}
        shape => {
            return Err(Error::invalid_text(format!(
                "expected rows of {TEXT_ROW_LEN} elements, got shape {shape:?}"
            )))
        }
    }
    let values = buffer.to_dtype(DType::I64).to_vec::<i64>()?;
    values.chunks_exact(TEXT_ROW_LEN).map(decode_row).collect()
}

fn decode_row(row: &[i64]) -> Result<String> {
    let Some((&len, payload)) = row.split_last() else {
        return Err(Error::invalid_text("empty row"));
    };
    let len = usize::try_from(len)
        .ok()
        .filter(|&n| n <= TEXT_CAPACITY)
        .ok_or_else(|| Error::invalid_text(format!("length field {len} out of range")))?;

    let bytes = payload[..len]
        .iter()
        .map(|&v| u8::try_from(v).map_err(|_| Error::invalid_text(format!("byte value {v} out of range"))))
        .collect::<Result<Vec<u8>>>()?;
    String::from_utf8(bytes).map_err(|e| Error::invalid_text(e.to_string()))
}

// =============================================================================
// Scoped Device / DType Adjustment
// =============================================================================

/// Hosts a buffer on a device and collective dtype until dropped.
///
/// On drop the dtype is restored first, then the device, on every exit path.
pub struct CastScope<'a> {
    buffer: &'a mut Buffer,
    original_device: Option<Device>,
    original_dtype: Option<DType>,
}

impl<'a> CastScope<'a> {
    /// Relocates `buffer` to `device` and, when `collective_dtype` is set and
    /// the buffer is not already floating point, casts it.
    pub fn enter(buffer: &'a mut Buffer, device: Device, collective_dtype: Option<DType>) -> Self {
        let mut original_device = None;
        if buffer.device() != device {
            original_device = Some(buffer.device());
            buffer.relocate(device);
        }

        let mut original_dtype = None;
        if let Some(dtype) = collective_dtype {
            if !buffer.dtype().is_float() && buffer.dtype() != dtype {
                original_dtype = Some(buffer.dtype());
                buffer.cast_in_place(dtype);
            }
        }

        Self {
            buffer,
            original_device,
            original_dtype,
        }
    }

    /// True if the buffer was relocated on entry.
    #[must_use]
    pub fn relocated(&self) -> bool {
        self.original_device.is_some()
    }

    /// True if the buffer was cast on entry.
    #[must_use]
    pub fn recast(&self) -> bool {
        self.original_dtype.is_some()
    }
}

impl Deref for CastScope<'_> {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        self.buffer
    }
}

impl DerefMut for CastScope<'_> {
    fn deref_mut(&mut self) -> &mut Buffer {
        self.buffer
    }
}

impl Drop for CastScope<'_> {
    fn drop(&mut self) {
        if let Some(dtype) = self.original_dtype {
            self.buffer.cast_in_place(dtype);
        }
        if let Some(device) = self.original_device {
            self.buffer.relocate(device);
        }
    }
}

/// Runs `primitive` on `buffer` hosted on `device` / `collective_dtype`.
///
/// The caller observes the original dtype and device afterwards, whether or
/// not the primitive succeeded. Primitive errors are returned unchanged.
pub fn apply_with_casting<F>(
    buffer: &mut Buffer,
    device: Device,
    collective_dtype: Option<DType>,
    primitive: F,
) -> Result<()>
where
    F: FnOnce(&mut Buffer) -> Result<()>,
{
    let mut scope = CastScope::enter(buffer, device, collective_dtype);
    tracing::trace!(
        dtype = %scope.dtype(),
        device = %scope.device(),
        relocated = scope.relocated(),
        recast = scope.recast(),
        "running collective primitive"
    );
    primitive(&mut *scope)
}

// =============================================================================
// Collective Wrappers
// =============================================================================

fn run_primitive<M, F>(model: &M, buffer: &mut Buffer, primitive: F) -> Result<()>
where
    M: ComputationModel + ?Sized,
    F: FnOnce(&mut Buffer) -> Result<()>,
{
    apply_with_casting(buffer, model.device(), model.collective_dtype(), primitive)
}

fn number_buffer(value: Number, dtype: DType, device: Device) -> Buffer {
    let buffer = match value {
        Number::Int(v) => Buffer::scalar(v),
        Number::Float(v) => Buffer::scalar(v),
    };
    let mut buffer = buffer.to_dtype(dtype);
    buffer.relocate(device);
    buffer
}

/// Reads every element back as the kind of `template`.
fn numbers_like(buffer: &Buffer, template: Number) -> Result<Vec<Number>> {
    if template.is_int() {
        Ok(buffer
            .to_dtype(DType::I64)
            .to_vec::<i64>()?
            .into_iter()
            .map(Number::Int)
            .collect())
    } else {
        Ok(buffer
            .to_dtype(DType::F64)
            .to_vec::<f64>()?
            .into_iter()
            .map(Number::Float)
            .collect())
    }
}

fn single_number(buffer: &Buffer, template: Number) -> Result<Number> {
    match numbers_like(buffer, template)?.as_slice() {
        [value] => Ok(*value),
        _ => Err(Error::shape_mismatch(&[1], buffer.shape())),
    }
}

fn single_text(buffer: &Buffer) -> Result<String> {
    decode_text(buffer)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::invalid_text("collective returned no rows"))
}

/// All-reduce over any reducible operand.
///
/// Strings and sequences are rejected before the primitive runs.
pub fn wrap_all_reduce<M>(model: &M, operand: Operand, op: &str) -> Result<Operand>
where
    M: ComputationModel + ?Sized,
{
    match operand {
        Operand::Scalar(value) => {
            let dtype = model.collective_dtype().unwrap_or(value.natural_dtype());
            let mut buffer = number_buffer(value, dtype, model.device());
            run_primitive(model, &mut buffer, |b| model.do_all_reduce(b, op))?;
            single_number(&buffer, value).map(Operand::Scalar)
        }
        Operand::Buffer(mut buffer) => {
            run_primitive(model, &mut buffer, |b| model.do_all_reduce(b, op))?;
            Ok(Operand::Buffer(buffer))
        }
        other => Err(Error::unsupported_operand("all_reduce", other.kind().name())),
    }
}

/// All-gather over any operand.
///
/// Scalars come back as a rank-ordered sequence of scalars, strings as a
/// rank-ordered sequence of strings, buffers concatenated along dimension 0.
pub fn wrap_all_gather<M>(model: &M, operand: Operand) -> Result<Operand>
where
    M: ComputationModel + ?Sized,
{
    match operand {
        Operand::Scalar(value) => {
            let dtype = model.collective_dtype().unwrap_or(value.natural_dtype());
            let mut buffer = number_buffer(value, dtype, model.device());
            run_primitive(model, &mut buffer, |b| model.do_all_gather(b))?;
            numbers_like(&buffer, value).map(Operand::Scalars)
        }
        Operand::Text(text) => {
            let mut buffer = encode_text(&text, model.device())?;
            run_primitive(model, &mut buffer, |b| model.do_all_gather(b))?;
            decode_text(&buffer).map(Operand::Texts)
        }
        Operand::Buffer(mut buffer) => {
            run_primitive(model, &mut buffer, |b| model.do_all_gather(b))?;
            Ok(Operand::Buffer(buffer))
        }
        other => Err(Error::unsupported_operand("all_gather", other.kind().name())),
    }
}

/// Broadcast from `src`.
///
/// On every other rank the scalar or string passed in is replaced by a
/// zero placeholder before the primitive runs, so its value never leaks into
/// the result. Buffers are used as their own receive placeholder.
pub fn wrap_broadcast<M>(model: &M, operand: Operand, src: usize) -> Result<Operand>
where
    M: ComputationModel + ?Sized,
{
    let world_size = model.world_size();
    if src >= world_size {
        return Err(Error::InvalidRank {
            rank: src,
            world_size,
        });
    }
    let is_src = model.rank() == src;
    let device = model.device();

    match operand {
        Operand::Scalar(value) => {
            let dtype = model.collective_dtype().unwrap_or(value.natural_dtype());
            let mut buffer = if is_src {
                number_buffer(value, dtype, device)
            } else {
                Buffer::zeros(&[1], dtype, device)
            };
            run_primitive(model, &mut buffer, |b| model.do_broadcast(b, src))?;
            single_number(&buffer, value).map(Operand::Scalar)
        }
        Operand::Text(text) => {
            let mut buffer = if is_src {
                encode_text(&text, device)?
            } else {
                Buffer::zeros(&[1, TEXT_ROW_LEN], DType::I64, device)
            };
            run_primitive(model, &mut buffer, |b| model.do_broadcast(b, src))?;
            single_text(&buffer).map(Operand::Text)
        }
        Operand::Buffer(mut buffer) => {
            run_primitive(model, &mut buffer, |b| model.do_broadcast(b, src))?;
            Ok(Operand::Buffer(buffer))
        }
        other => Err(Error::unsupported_operand("broadcast", other.kind().name())),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendOptions, SpawnConfig};
    use crate::model::WorkerFn;
    use crate::reduce::ReduceOp;
    use crate::topology::{NodeLayout, Topology};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Single-rank model that records what its primitives saw.
    struct RecordingModel {
        topology: Topology,
        collective_dtype: Option<DType>,
        device: Device,
        calls: AtomicUsize,
        seen_dtypes: Mutex<Vec<DType>>,
        fail: bool,
    }

    impl RecordingModel {
        fn new(collective_dtype: Option<DType>, device: Device) -> Self {
            Self {
                topology: Topology::resolved(NodeLayout {
                    nproc_per_node: 1,
                    nnodes: 1,
                    node_rank: 0,
                }),
                collective_dtype,
                device,
                calls: AtomicUsize::new(0),
                seen_dtypes: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn record(&self, buffer: &Buffer) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_dtypes.lock().push(buffer.dtype());
            assert_eq!(buffer.device(), self.device);
            if self.fail {
                Err(Error::backend("link down"))
            } else {
                Ok(())
            }
        }
    }

    impl ComputationModel for RecordingModel {
        fn name(&self) -> &'static str {
            "recording"
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
            Some("recording")
        }
        fn collective_dtype(&self) -> Option<DType> {
            self.collective_dtype
        }
        fn compute_nproc_per_node(&self) -> Result<usize> {
            Ok(1)
        }
        fn do_all_reduce(&self, buffer: &mut Buffer, op: &str) -> Result<()> {
            op.parse::<ReduceOp>()?;
            self.record(buffer)
        }
        fn do_all_gather(&self, buffer: &mut Buffer) -> Result<()> {
            self.record(buffer)
        }
        fn do_broadcast(&self, buffer: &mut Buffer, _src: usize) -> Result<()> {
            self.record(buffer)
        }
        fn barrier(&self) -> Result<()> {
            Ok(())
        }
        fn finalize(&self) -> Result<()> {
            Ok(())
        }
        fn model_name() -> &'static str {
            "recording"
        }
        fn available_backends() -> &'static [&'static str] {
            &["recording"]
        }
        fn create_from_context() -> Result<Option<Self>> {
            Ok(None)
        }
        fn create_from_backend(_backend: &str, _options: &BackendOptions) -> Result<Self> {
            Ok(Self::new(None, Device::Cpu))
        }
        fn spawn(_backend: &str, _config: &SpawnConfig, _entry: WorkerFn) -> Result<()> {
            Err(Error::not_supported("recording", "spawn"))
        }
    }

    #[test]
    fn test_text_round_trip() {
        let full = "x".repeat(TEXT_CAPACITY);
        for text in ["", "abc", "héllo wörld ✓", full.as_str()] {
            let buffer = encode_text(text, Device::Cpu).unwrap();
            assert_eq!(buffer.shape(), &[1, TEXT_ROW_LEN]);
            assert_eq!(buffer.dtype(), DType::I64);
            assert_eq!(decode_text(&buffer).unwrap(), vec![text.to_string()]);
        }
    }

    #[test]
    fn test_text_truncation() {
        let long = "a".repeat(2000);
        let (buffer, warning) = encode_text_checked(&long, Device::Cpu).unwrap();
        assert_eq!(
            warning,
            Some(TruncationWarning {
                original_len: 2000,
                capacity: TEXT_CAPACITY,
            })
        );
        let values = buffer.to_vec::<i64>().unwrap();
        assert_eq!(values[TEXT_CAPACITY], 1024);
        assert_eq!(decode_text(&buffer).unwrap(), vec![long[..1024].to_string()]);
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let text = format!("{}é", "a".repeat(TEXT_CAPACITY - 1));
        let (buffer, warning) = encode_text_checked(&text, Device::Cpu).unwrap();
        assert!(warning.is_some());
        assert_eq!(decode_text(&buffer).unwrap(), vec!["a".repeat(TEXT_CAPACITY - 1)]);
    }

    #[test]
    fn test_encode_places_on_device() {
        let buffer = encode_text("abc", Device::Cuda(0)).unwrap();
        assert_eq!(buffer.device(), Device::Cuda(0));
    }

    #[test]
    fn test_decode_batch_preserves_order() {
        let rows: Vec<Buffer> = ["zero", "one", "two"]
            .iter()
            .map(|s| encode_text(s, Device::Cpu).unwrap())
            .collect();
        let batch = Buffer::concat0(&rows).unwrap();
        assert_eq!(decode_text(&batch).unwrap(), vec!["zero", "one", "two"]);
    }

    #[test]
    fn test_decode_rejects_bad_rows() {
        let wrong_shape = Buffer::zeros(&[1, 10], DType::I64, Device::Cpu);
        assert!(matches!(decode_text(&wrong_shape), Err(Error::InvalidText { .. })));

        let mut row = vec![0i64; TEXT_ROW_LEN];
        row[TEXT_CAPACITY] = 2000;
        let bad_len = Buffer::from_vec(row, &[1, TEXT_ROW_LEN]).unwrap();
        assert!(decode_text(&bad_len).is_err());

        let mut row = vec![0i64; TEXT_ROW_LEN];
        row[0] = 0xff;
        row[TEXT_CAPACITY] = 1;
        let bad_utf8 = Buffer::from_vec(row, &[1, TEXT_ROW_LEN]).unwrap();
        assert!(decode_text(&bad_utf8).is_err());
    }

    #[test]
    fn test_decode_float_hosted_rows() {
        let buffer = encode_text("float", Device::Cpu).unwrap().to_dtype(DType::F32);
        assert_eq!(decode_text(&buffer).unwrap(), vec!["float"]);
    }

    #[test]
    fn test_apply_with_casting_restores_dtype() {
        let mut buffer = Buffer::from_vec(vec![1i32, 2, 3], &[3]).unwrap();
        let mut seen = None;
        apply_with_casting(&mut buffer, Device::Cpu, Some(DType::F32), |b| {
            seen = Some(b.dtype());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, Some(DType::F32));
        assert_eq!(buffer.dtype(), DType::I32);
        assert_eq!(buffer.to_vec::<i32>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_apply_with_casting_skips_float_inputs() {
        let mut buffer = Buffer::from_vec(vec![1.5f32], &[1]).unwrap();
        apply_with_casting(&mut buffer, Device::Cpu, Some(DType::F64), |b| {
            assert_eq!(b.dtype(), DType::F32);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_apply_with_casting_restores_on_failure() {
        let mut buffer = Buffer::from_vec(vec![4u8, 5], &[2]).unwrap();
        let result = apply_with_casting(&mut buffer, Device::Cuda(0), Some(DType::F32), |b| {
            assert_eq!(b.device(), Device::Cuda(0));
            assert_eq!(b.dtype(), DType::F32);
            Err(Error::backend("group mismatch"))
        });
        assert_eq!(result, Err(Error::backend("group mismatch")));
        assert_eq!(buffer.dtype(), DType::U8);
        assert_eq!(buffer.device(), Device::Cpu);
        assert_eq!(buffer.to_vec::<u8>().unwrap(), vec![4, 5]);
    }

    #[test]
    fn test_cast_scope_restores_dtype_then_device() {
        let mut buffer = Buffer::from_vec(vec![7i64], &[1]).unwrap();
        {
            let scope = CastScope::enter(&mut buffer, Device::Cuda(1), Some(DType::F64));
            assert!(scope.relocated());
            assert!(scope.recast());
            assert_eq!(scope.dtype(), DType::F64);
            assert_eq!(scope.device(), Device::Cuda(1));
        }
        assert_eq!(buffer.dtype(), DType::I64);
        assert_eq!(buffer.device(), Device::Cpu);
    }

    #[test]
    fn test_integer_buffer_reduce_sees_float() {
        let model = RecordingModel::new(Some(DType::F32), Device::Cpu);
        let input = Buffer::from_vec(vec![3i64, 4], &[2]).unwrap();
        let out = wrap_all_reduce(&model, Operand::Buffer(input.clone()), "sum").unwrap();
        assert_eq!(out, Operand::Buffer(input));
        assert_eq!(*model.seen_dtypes.lock(), vec![DType::F32]);
    }

    #[test]
    fn test_scalar_kinds_restored() {
        let model = RecordingModel::new(Some(DType::F32), Device::Cpu);
        assert_eq!(
            wrap_all_reduce(&model, Operand::from(5i32), "sum").unwrap(),
            Operand::Scalar(Number::Int(5))
        );
        assert_eq!(
            wrap_all_reduce(&model, Operand::from(0.5f64), "max").unwrap(),
            Operand::Scalar(Number::Float(0.5))
        );
        assert_eq!(
            wrap_all_gather(&model, Operand::from(9i64)).unwrap(),
            Operand::Scalars(vec![Number::Int(9)])
        );
    }

    #[test]
    fn test_text_rejected_by_all_reduce() {
        let model = RecordingModel::new(None, Device::Cpu);
        assert_eq!(
            wrap_all_reduce(&model, Operand::from("abc"), "sum"),
            Err(Error::unsupported_operand("all_reduce", "text"))
        );
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sequences_rejected_before_primitive() {
        let model = RecordingModel::new(None, Device::Cpu);
        let list = Operand::Scalars(vec![Number::Int(1)]);
        assert!(matches!(
            wrap_all_reduce(&model, list.clone(), "sum"),
            Err(Error::UnsupportedOperandKind { .. })
        ));
        assert!(wrap_all_gather(&model, list.clone()).is_err());
        assert!(wrap_broadcast(&model, Operand::Texts(vec![]), 0).is_err());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_broadcast_rejects_out_of_range_src() {
        let model = RecordingModel::new(None, Device::Cpu);
        assert_eq!(
            wrap_broadcast(&model, Operand::from(1i64), 1),
            Err(Error::InvalidRank {
                rank: 1,
                world_size: 1,
            })
        );
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_text_gather_and_broadcast() {
        let model = RecordingModel::new(Some(DType::F64), Device::Cpu);
        assert_eq!(
            wrap_all_gather(&model, Operand::from("node-a")).unwrap(),
            Operand::Texts(vec!["node-a".into()])
        );
        assert_eq!(
            wrap_broadcast(&model, Operand::from("node-a"), 0).unwrap(),
            Operand::from("node-a")
        );
    }

    #[test]
    fn test_integer_broadcast_hosted_in_i64() {
        let model = RecordingModel::new(None, Device::Cpu);
        let big = (1i64 << 53) + 1;
        assert_eq!(
            wrap_broadcast(&model, Operand::from(big), 0).unwrap(),
            Operand::from(big)
        );
        assert_eq!(*model.seen_dtypes.lock(), vec![DType::I64]);
    }

    #[test]
    fn test_primitive_error_propagates() {
        let mut model = RecordingModel::new(Some(DType::F32), Device::Cpu);
        model.fail = true;
        assert_eq!(
            wrap_all_gather(&model, Operand::from(1i64)),
            Err(Error::backend("link down"))
        );
    }
}
