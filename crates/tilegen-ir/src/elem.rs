use core::fmt::Display;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum FloatKind {
    F16,
    BF16,
    F32,
    F64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum IntKind {
    I8,
    I16,
    I32,
    I64,
}

/// Scalar element type stored in a buffer or carried by a tile.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Elem {
    Float(FloatKind),
    Int(IntKind),
    Bool,
}

impl FloatKind {
    /// Number of explicitly stored mantissa bits, used to pick the cast direction.
    pub const fn mantissa_bits(&self) -> u32 {
        match self {
            FloatKind::F16 => 10,
            FloatKind::BF16 => 7,
            FloatKind::F32 => 23,
            FloatKind::F64 => 52,
        }
    }

    /// Whether the kind is one of the 16-bit float formats.
    pub const fn is_half(&self) -> bool {
        matches!(self, FloatKind::F16 | FloatKind::BF16)
    }
}

impl IntKind {
    /// Largest value representable by the kind.
    pub const fn max_value(&self) -> i64 {
        match self {
            IntKind::I8 => i8::MAX as i64,
            IntKind::I16 => i16::MAX as i64,
            IntKind::I32 => i32::MAX as i64,
            IntKind::I64 => i64::MAX,
        }
    }
}

impl Elem {
    /// Get the size in bytes.
    pub const fn size(&self) -> usize {
        match self {
            Elem::Float(kind) => match kind {
                FloatKind::F16 => core::mem::size_of::<half::f16>(),
                FloatKind::BF16 => core::mem::size_of::<half::bf16>(),
                FloatKind::F32 => core::mem::size_of::<f32>(),
                FloatKind::F64 => core::mem::size_of::<f64>(),
            },
            Elem::Int(kind) => match kind {
                IntKind::I8 => core::mem::size_of::<i8>(),
                IntKind::I16 => core::mem::size_of::<i16>(),
                IntKind::I32 => core::mem::size_of::<i32>(),
                IntKind::I64 => core::mem::size_of::<i64>(),
            },
            Elem::Bool => core::mem::size_of::<bool>(),
        }
    }

    /// Get the size in bits.
    pub const fn size_bits(&self) -> usize {
        self.size() * 8
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Elem::Float(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Elem::Int(_))
    }

    /// The element type used to hold this element inside a kernel.
    ///
    /// Predicates are stored as bytes in global memory.
    pub fn storage_elem(&self) -> Elem {
        match self {
            Elem::Bool => Elem::Int(IntKind::I8),
            elem => *elem,
        }
    }
}

impl From<FloatKind> for Elem {
    fn from(kind: FloatKind) -> Self {
        Elem::Float(kind)
    }
}

impl From<IntKind> for Elem {
    fn from(kind: IntKind) -> Self {
        Elem::Int(kind)
    }
}

impl Display for FloatKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FloatKind::F16 => f.write_str("f16"),
            FloatKind::BF16 => f.write_str("bf16"),
            FloatKind::F32 => f.write_str("f32"),
            FloatKind::F64 => f.write_str("f64"),
        }
    }
}

impl Display for IntKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IntKind::I8 => f.write_str("i8"),
            IntKind::I16 => f.write_str("i16"),
            IntKind::I32 => f.write_str("i32"),
            IntKind::I64 => f.write_str("i64"),
        }
    }
}

impl Display for Elem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Elem::Float(kind) => write!(f, "{kind}"),
            Elem::Int(kind) => write!(f, "{kind}"),
            Elem::Bool => f.write_str("i1"),
        }
    }
}
