use half::{bf16, f16};
use tilegen_ir::{Elem, FloatKind, IntKind};

use crate::value::Scalar;

/// Typed storage of a [host buffer](HostBuffer).
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum HostData {
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

/// Device memory emulated on the host, bound to one pointer argument of a kernel.
///
/// Elements are stored in their native representation so that reads and writes round exactly
/// like a device would. Predicates are stored as bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBuffer {
    data: HostData,
}

impl HostBuffer {
    pub fn zeros(elem: Elem, len: usize) -> Self {
        let data = match elem.storage_elem() {
            Elem::Float(FloatKind::F16) => HostData::F16(vec![f16::ZERO; len]),
            Elem::Float(FloatKind::BF16) => HostData::BF16(vec![bf16::ZERO; len]),
            Elem::Float(FloatKind::F32) => HostData::F32(vec![0.0; len]),
            Elem::Float(FloatKind::F64) => HostData::F64(vec![0.0; len]),
            Elem::Int(IntKind::I8) | Elem::Bool => HostData::I8(vec![0; len]),
            Elem::Int(IntKind::I16) => HostData::I16(vec![0; len]),
            Elem::Int(IntKind::I32) => HostData::I32(vec![0; len]),
            Elem::Int(IntKind::I64) => HostData::I64(vec![0; len]),
        };
        Self { data }
    }

    /// A buffer holding `values` converted to `elem`.
    ///
    /// Floats are rounded to the nearest representable value, integers truncated toward zero.
    pub fn from_f64(elem: Elem, values: &[f64]) -> Self {
        let mut buffer = Self::zeros(elem, values.len());
        for (index, value) in values.iter().enumerate() {
            let scalar = match elem.storage_elem() {
                Elem::Float(_) => Scalar::Float(*value),
                _ => Scalar::Int(*value as i64),
            };
            buffer.write(index, scalar);
        }
        buffer
    }

    pub fn elem(&self) -> Elem {
        match &self.data {
            HostData::F16(_) => Elem::Float(FloatKind::F16),
            HostData::BF16(_) => Elem::Float(FloatKind::BF16),
            HostData::F32(_) => Elem::Float(FloatKind::F32),
            HostData::F64(_) => Elem::Float(FloatKind::F64),
            HostData::I8(_) => Elem::Int(IntKind::I8),
            HostData::I16(_) => Elem::Int(IntKind::I16),
            HostData::I32(_) => Elem::Int(IntKind::I32),
            HostData::I64(_) => Elem::Int(IntKind::I64),
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            HostData::F16(data) => data.len(),
            HostData::BF16(data) => data.len(),
            HostData::F32(data) => data.len(),
            HostData::F64(data) => data.len(),
            HostData::I8(data) => data.len(),
            HostData::I16(data) => data.len(),
            HostData::I32(data) => data.len(),
            HostData::I64(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &HostData {
        &self.data
    }

    /// Every element widened to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        (0..self.len()).map(|index| self.read(index).as_f64()).collect()
    }

    pub(crate) fn read(&self, index: usize) -> Scalar {
        match &self.data {
            HostData::F16(data) => Scalar::Float(data[index].to_f64()),
            HostData::BF16(data) => Scalar::Float(data[index].to_f64()),
            HostData::F32(data) => Scalar::Float(data[index] as f64),
            HostData::F64(data) => Scalar::Float(data[index]),
            HostData::I8(data) => Scalar::Int(data[index] as i64),
            HostData::I16(data) => Scalar::Int(data[index] as i64),
            HostData::I32(data) => Scalar::Int(data[index] as i64),
            HostData::I64(data) => Scalar::Int(data[index]),
        }
    }

    pub(crate) fn write(&mut self, index: usize, value: Scalar) {
        match &mut self.data {
            HostData::F16(data) => data[index] = f16::from_f64(value.as_f64()),
            HostData::BF16(data) => data[index] = bf16::from_f64(value.as_f64()),
            HostData::F32(data) => data[index] = value.as_f64() as f32,
            HostData::F64(data) => data[index] = value.as_f64(),
            HostData::I8(data) => data[index] = value.as_i64() as i8,
            HostData::I16(data) => data[index] = value.as_i64() as i16,
            HostData::I32(data) => data[index] = value.as_i64() as i32,
            HostData::I64(data) => data[index] = value.as_i64(),
        }
    }
}
