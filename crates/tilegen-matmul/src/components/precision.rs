use tilegen_ir::{Elem, FloatKind, KernelBuilder, Value};

/// Float type the dot accumulates in, chosen once per kernel.
///
/// Half precision accumulation is only used when both operands and the output share the same
/// 16-bit float type, and double precision only for all-`f64` products.
pub fn accumulation_kind(lhs: Elem, rhs: Elem, out: Elem) -> FloatKind {
    match (lhs, rhs, out) {
        (Elem::Float(l), Elem::Float(r), Elem::Float(o)) if l == r && r == o => match l {
            FloatKind::F16 | FloatKind::BF16 | FloatKind::F64 => l,
            FloatKind::F32 => FloatKind::F32,
        },
        _ => FloatKind::F32,
    }
}

/// Primitive conversions needed to go from one element type to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Identity,
    /// Float to a float with more mantissa bits.
    Extend,
    /// Float to a float with fewer mantissa bits.
    Truncate,
    /// Between `f16` and `bf16`, where neither type can represent the other: extend to `f32`
    /// then truncate.
    ThroughF32,
    /// Signed integer to float.
    IntToFloat,
    /// Float to signed integer, rounding toward zero.
    FloatToInt,
    /// Sign extension or truncation between integers.
    IntResize,
}

impl CastKind {
    pub fn new(from: Elem, to: Elem) -> Self {
        let from = from.storage_elem();
        let to = to.storage_elem();

        match (from, to) {
            _ if from == to => CastKind::Identity,
            (Elem::Float(FloatKind::F16), Elem::Float(FloatKind::BF16))
            | (Elem::Float(FloatKind::BF16), Elem::Float(FloatKind::F16)) => CastKind::ThroughF32,
            (Elem::Float(from), Elem::Float(to)) if from.mantissa_bits() > to.mantissa_bits() => {
                CastKind::Truncate
            }
            (Elem::Float(_), Elem::Float(_)) => CastKind::Extend,
            (Elem::Int(_), Elem::Float(_)) => CastKind::IntToFloat,
            (Elem::Float(_), Elem::Int(_)) => CastKind::FloatToInt,
            (Elem::Int(_), Elem::Int(_)) => CastKind::IntResize,
            (from, to) => panic!("Type conversion not supported: {from} -> {to}"),
        }
    }
}

/// Emit the conversion of every lane of `value` to `to`.
pub fn emit_cast(builder: &mut KernelBuilder, value: Value, to: Elem) -> Value {
    let to = to.storage_elem();
    match CastKind::new(value.elem(), to) {
        CastKind::Identity => value,
        CastKind::ThroughF32 => {
            let wide = builder.cast(value, Elem::Float(FloatKind::F32));
            builder.cast(wide, to)
        }
        _ => builder.cast(value, to),
    }
}
