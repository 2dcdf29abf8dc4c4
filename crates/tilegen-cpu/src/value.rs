use half::{bf16, f16};
use tilegen_ir::{ConstantValue, Elem, FloatKind, IntKind, Shape, Type};

/// A single lane of a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// Integers are kept sign-extended, wrapped to the width of their type.
    Int(i64),
    /// Floats are kept rounded to the precision of their type.
    Float(f64),
    Bool(bool),
    /// Element offset into the buffer bound to argument `buffer`.
    Ptr { buffer: usize, offset: i64 },
}

impl Scalar {
    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Int(val) => *val as f64,
            Scalar::Float(val) => *val,
            Scalar::Bool(val) => *val as u8 as f64,
            Scalar::Ptr { offset, .. } => *offset as f64,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Scalar::Int(val) => *val,
            Scalar::Float(val) => *val as i64,
            Scalar::Bool(val) => *val as i64,
            Scalar::Ptr { offset, .. } => *offset,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Scalar::Bool(val) => *val,
            Scalar::Int(val) => *val != 0,
            Scalar::Float(val) => *val != 0.0,
            Scalar::Ptr { .. } => true,
        }
    }

    /// The constant as a lane of type `elem`.
    pub fn from_constant(value: ConstantValue, elem: Elem) -> Self {
        match value.cast_to(elem) {
            ConstantValue::Int(val) => Scalar::Int(val).cast(elem),
            ConstantValue::Float(val) => Scalar::Float(val).cast(elem),
            ConstantValue::Bool(val) => Scalar::Bool(val),
        }
    }

    /// Convert to `elem` the way a device conversion instruction would.
    pub fn cast(self, elem: Elem) -> Self {
        match elem {
            Elem::Float(kind) => Scalar::Float(round_float(self.as_f64(), kind)),
            Elem::Int(kind) => Scalar::Int(wrap_int(self.as_i64(), kind)),
            Elem::Bool => Scalar::Bool(self.as_bool()),
        }
    }
}

pub fn round_float(value: f64, kind: FloatKind) -> f64 {
    match kind {
        FloatKind::F16 => f16::from_f64(value).to_f64(),
        FloatKind::BF16 => bf16::from_f64(value).to_f64(),
        FloatKind::F32 => value as f32 as f64,
        FloatKind::F64 => value,
    }
}

pub fn wrap_int(value: i64, kind: IntKind) -> i64 {
    match kind {
        IntKind::I8 => value as i8 as i64,
        IntKind::I16 => value as i16 as i64,
        IntKind::I32 => value as i32 as i64,
        IntKind::I64 => value,
    }
}

/// A value of a program instance, lanes in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub ty: Type,
    pub lanes: Vec<Scalar>,
}

impl Tile {
    pub fn splat(ty: Type, lane: Scalar) -> Self {
        Self {
            ty,
            lanes: vec![lane; ty.num_elements()],
        }
    }

    pub fn scalar(&self) -> Scalar {
        self.lanes[0]
    }

    /// Lanes of this tile broadcast to `shape`.
    pub fn broadcast_lanes(&self, shape: Shape) -> Vec<Scalar> {
        match (self.ty.shape, shape) {
            (Shape::Scalar, shape) => vec![self.lanes[0]; shape.num_elements()],
            (Shape::Vector(len), Shape::Vector(target)) => (0..target as usize)
                .map(|i| self.lanes[if len == 1 { 0 } else { i }])
                .collect(),
            (Shape::Matrix(rows, cols), Shape::Matrix(target_rows, target_cols)) => {
                let mut lanes = Vec::with_capacity(shape.num_elements());
                for i in 0..target_rows as usize {
                    for j in 0..target_cols as usize {
                        let row = if rows == 1 { 0 } else { i };
                        let col = if cols == 1 { 0 } else { j };
                        lanes.push(self.lanes[row * cols as usize + col]);
                    }
                }
                lanes
            }
            _ => self.lanes.clone(),
        }
    }
}
