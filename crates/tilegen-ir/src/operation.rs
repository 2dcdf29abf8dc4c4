use core::fmt::Display;

use smallvec::{SmallVec, smallvec};

use crate::{ConstantValue, Value};

/// Axis of the launch grid a program id is read from.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramAxis {
    X,
    Y,
    Z,
}

/// A single instruction of a kernel body.
///
/// Every operation except [store](Operation::Store) and [for loops](Operation::For) defines
/// exactly one value. Loops define their results through [ForLoop::results].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub out: Option<Value>,
    pub operation: Operation,
}

/// Tile-level operations.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Id of the current program instance along one grid axis.
    ProgramId(ProgramAxis),
    /// Constant splatted to the shape of the output.
    Constant(ConstantValue),
    /// `[start, end)` as a vector of `i32`.
    MakeRange { start: u32, end: u32 },
    Splat(UnaryOperator),
    ExpandDims { input: Value, axis: u32 },
    Broadcast(UnaryOperator),
    Arithmetic(Arithmetic),
    /// Signed `lhs < rhs`.
    Lower(BinaryOperator),
    And(BinaryOperator),
    Select(Select),
    Cast(UnaryOperator),
    /// Offset a pointer tile by an integer tile, in elements.
    AddPtr(BinaryOperator),
    Load(LoadOperator),
    Store(StoreOperator),
    /// `acc + lhs @ rhs`
    Dot(DotOperator),
    For(ForLoop),
}

/// Integer arithmetic is signed and wraps at the operand width.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Arithmetic {
    Add(BinaryOperator),
    Sub(BinaryOperator),
    Mul(BinaryOperator),
    Div(BinaryOperator),
    Rem(BinaryOperator),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct BinaryOperator {
    pub lhs: Value,
    pub rhs: Value,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct UnaryOperator {
    pub input: Value,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Select {
    pub cond: Value,
    pub then: Value,
    pub or_else: Value,
}

/// Gather from global memory. Lanes whose mask is false read `other`, or zero without one.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct LoadOperator {
    pub ptr: Value,
    pub mask: Option<Value>,
    pub other: Option<Value>,
}

/// Scatter to global memory. Lanes whose mask is false are not written.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StoreOperator {
    pub ptr: Value,
    pub value: Value,
    pub mask: Option<Value>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DotOperator {
    pub lhs: Value,
    pub rhs: Value,
    pub acc: Value,
    pub allow_tf32: bool,
}

/// Structured loop over `[start, end)` by `step`, threading `carried` values between
/// iterations.
///
/// `carried[i]` starts as `init[i]`, is replaced by `yielded[i]` after each iteration and ends
/// up in `results[i]`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct ForLoop {
    pub start: Value,
    pub end: Value,
    pub step: Value,
    pub induction: Value,
    pub init: Vec<Value>,
    pub carried: Vec<Value>,
    pub body: Vec<Instruction>,
    pub yielded: Vec<Value>,
    pub results: Vec<Value>,
}

impl Operation {
    /// Values read by the operation itself, not counting nested loop bodies.
    pub fn args(&self) -> SmallVec<[Value; 4]> {
        match self {
            Operation::ProgramId(_) | Operation::Constant(_) | Operation::MakeRange { .. } => {
                SmallVec::new()
            }
            Operation::Splat(op) | Operation::Broadcast(op) | Operation::Cast(op) => {
                smallvec![op.input]
            }
            Operation::ExpandDims { input, .. } => smallvec![*input],
            Operation::Arithmetic(op) => {
                let op = op.operator();
                smallvec![op.lhs, op.rhs]
            }
            Operation::Lower(op) | Operation::And(op) | Operation::AddPtr(op) => {
                smallvec![op.lhs, op.rhs]
            }
            Operation::Select(op) => smallvec![op.cond, op.then, op.or_else],
            Operation::Load(op) => {
                let mut args = smallvec![op.ptr];
                args.extend(op.mask);
                args.extend(op.other);
                args
            }
            Operation::Store(op) => {
                let mut args = smallvec![op.ptr, op.value];
                args.extend(op.mask);
                args
            }
            Operation::Dot(op) => smallvec![op.lhs, op.rhs, op.acc],
            Operation::For(op) => {
                let mut args = smallvec![op.start, op.end, op.step];
                args.extend(op.init.iter().copied());
                args
            }
        }
    }
}

impl Arithmetic {
    pub fn operator(&self) -> &BinaryOperator {
        match self {
            Arithmetic::Add(op)
            | Arithmetic::Sub(op)
            | Arithmetic::Mul(op)
            | Arithmetic::Div(op)
            | Arithmetic::Rem(op) => op,
        }
    }
}

impl Display for ProgramAxis {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProgramAxis::X => f.write_str("x"),
            ProgramAxis::Y => f.write_str("y"),
            ProgramAxis::Z => f.write_str("z"),
        }
    }
}

impl Display for Arithmetic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Arithmetic::Add(op) => write!(f, "add {}, {}", op.lhs, op.rhs),
            Arithmetic::Sub(op) => write!(f, "sub {}, {}", op.lhs, op.rhs),
            Arithmetic::Mul(op) => write!(f, "mul {}, {}", op.lhs, op.rhs),
            Arithmetic::Div(op) => write!(f, "div {}, {}", op.lhs, op.rhs),
            Arithmetic::Rem(op) => write!(f, "rem {}, {}", op.lhs, op.rhs),
        }
    }
}

/// Prints the operation on a single line. Loop bodies are printed by
/// [KernelProgram](crate::KernelProgram).
impl Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Operation::ProgramId(axis) => write!(f, "program_id {axis}"),
            Operation::Constant(value) => write!(f, "constant {value}"),
            Operation::MakeRange { start, end } => write!(f, "make_range [{start}, {end})"),
            Operation::Splat(op) => write!(f, "splat {}", op.input),
            Operation::ExpandDims { input, axis } => write!(f, "expand_dims {input}, axis={axis}"),
            Operation::Broadcast(op) => write!(f, "broadcast {}", op.input),
            Operation::Arithmetic(op) => write!(f, "{op}"),
            Operation::Lower(op) => write!(f, "cmp slt {}, {}", op.lhs, op.rhs),
            Operation::And(op) => write!(f, "and {}, {}", op.lhs, op.rhs),
            Operation::Select(op) => write!(f, "select {}, {}, {}", op.cond, op.then, op.or_else),
            Operation::Cast(op) => write!(f, "cast {}", op.input),
            Operation::AddPtr(op) => write!(f, "addptr {}, {}", op.lhs, op.rhs),
            Operation::Load(op) => {
                write!(f, "load {}", op.ptr)?;
                if let Some(mask) = op.mask {
                    write!(f, ", mask={mask}")?;
                }
                if let Some(other) = op.other {
                    write!(f, ", other={other}")?;
                }
                Ok(())
            }
            Operation::Store(op) => {
                write!(f, "store {}, {}", op.ptr, op.value)?;
                if let Some(mask) = op.mask {
                    write!(f, ", mask={mask}")?;
                }
                Ok(())
            }
            Operation::Dot(op) => write!(
                f,
                "dot {}, {}, {} allow_tf32={}",
                op.lhs, op.rhs, op.acc, op.allow_tf32
            ),
            Operation::For(op) => write!(
                f,
                "for {} = {} to {} step {}",
                op.induction, op.start, op.end, op.step
            ),
        }
    }
}
