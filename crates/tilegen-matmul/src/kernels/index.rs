use core::fmt::{Debug, Display};

use num_traits::{FromPrimitive, PrimInt};
use tilegen_ir::{ConstantValue, Elem, IntKind};

/// Integer type used by an emitted kernel for address computations.
pub trait IndexType:
    PrimInt + FromPrimitive + Into<i64> + Display + Debug + Send + Sync + 'static
{
    const KIND: IntKind;

    fn elem() -> Elem {
        Elem::Int(Self::KIND)
    }

    /// Convert a host extent or stride.
    ///
    /// # Panics
    ///
    /// If the value can't be represented. Extents, strides and the reduction loop advance all
    /// take part in the index width selection.
    fn from_extent(value: usize) -> Self {
        match Self::from_usize(value) {
            Some(value) => value,
            None => panic!("{value} doesn't fit in a {} index", Self::KIND),
        }
    }

    fn constant(value: usize) -> ConstantValue {
        ConstantValue::Int(Self::from_extent(value).into())
    }
}

impl IndexType for i32 {
    const KIND: IntKind = IntKind::I32;
}

impl IndexType for i64 {
    const KIND: IntKind = IntKind::I64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extents_convert_to_constants() {
        assert_eq!(<i32 as IndexType>::constant(42), ConstantValue::Int(42));
        assert_eq!(<i64 as IndexType>::elem(), Elem::Int(IntKind::I64));
        assert_eq!(
            <i64 as IndexType>::constant(3_000_000_000),
            ConstantValue::Int(3_000_000_000)
        );
    }

    #[test]
    #[should_panic(expected = "doesn't fit in a i32 index")]
    fn narrow_index_overflow_panics() {
        <i32 as IndexType>::from_extent(3_000_000_000);
    }
}
