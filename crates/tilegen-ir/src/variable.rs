use core::fmt::Display;

use derive_more::From;

use crate::{Elem, Type};

pub type Id = u32;

/// An SSA value produced by an instruction, a kernel argument or a loop header.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    pub id: Id,
    pub ty: Type,
}

impl Value {
    pub fn elem(&self) -> Elem {
        self.ty.elem()
    }
}

/// Compile-time constant splatted over every lane of a tile.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, From)]
pub enum ConstantValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<i32> for ConstantValue {
    fn from(value: i32) -> Self {
        ConstantValue::Int(value as i64)
    }
}

impl ConstantValue {
    /// Convert the constant so that it is representable by `elem`.
    pub fn cast_to(self, elem: Elem) -> Self {
        match (self, elem) {
            (ConstantValue::Int(val), Elem::Float(_)) => ConstantValue::Float(val as f64),
            (ConstantValue::Float(val), Elem::Int(_)) => ConstantValue::Int(val as i64),
            (ConstantValue::Bool(val), Elem::Int(_)) => ConstantValue::Int(val as i64),
            (ConstantValue::Bool(val), Elem::Float(_)) => ConstantValue::Float(val as u32 as f64),
            (ConstantValue::Int(val), Elem::Bool) => ConstantValue::Bool(val != 0),
            (ConstantValue::Float(val), Elem::Bool) => ConstantValue::Bool(val != 0.0),
            (value, _) => value,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "%{}", self.id)
    }
}

impl Display for ConstantValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConstantValue::Int(val) => write!(f, "{val}"),
            ConstantValue::Float(val) => write!(f, "{val:?}"),
            ConstantValue::Bool(val) => write!(f, "{val}"),
        }
    }
}
