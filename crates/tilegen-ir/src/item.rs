use core::fmt::Display;

use crate::Elem;

/// Shape of a tile value. Kernels only ever manipulate rank 0 to rank 2 tiles.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Scalar,
    Vector(u32),
    Matrix(u32, u32),
}

impl Shape {
    pub fn num_elements(&self) -> usize {
        match self {
            Shape::Scalar => 1,
            Shape::Vector(len) => *len as usize,
            Shape::Matrix(rows, cols) => *rows as usize * *cols as usize,
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            Shape::Scalar => 0,
            Shape::Vector(_) => 1,
            Shape::Matrix(..) => 2,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Shape::Scalar)
    }

    /// Insert a unit dimension at `axis`.
    ///
    /// Returns `None` when the result would exceed rank 2 or the axis is out of range.
    pub fn expand(&self, axis: usize) -> Option<Shape> {
        match (self, axis) {
            (Shape::Scalar, 0) => Some(Shape::Vector(1)),
            (Shape::Vector(len), 0) => Some(Shape::Matrix(1, *len)),
            (Shape::Vector(len), 1) => Some(Shape::Matrix(*len, 1)),
            _ => None,
        }
    }

    /// Whether a value of this shape can be broadcast to `target`.
    pub fn broadcasts_to(&self, target: &Shape) -> bool {
        match (self, target) {
            (Shape::Scalar, _) => true,
            (Shape::Vector(a), Shape::Vector(b)) => *a == 1 || a == b,
            (Shape::Matrix(r, c), Shape::Matrix(tr, tc)) => {
                (*r == 1 || r == tr) && (*c == 1 || c == tc)
            }
            _ => false,
        }
    }
}

/// Whether a value holds data or addresses into a global buffer of some element type.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Scalar(Elem),
    Pointer(Elem),
}

/// Full type of an SSA value: what every lane holds and the tile shape.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type {
    pub storage: StorageType,
    pub shape: Shape,
}

impl Type {
    pub fn scalar(elem: impl Into<Elem>) -> Self {
        Self {
            storage: StorageType::Scalar(elem.into()),
            shape: Shape::Scalar,
        }
    }

    pub fn pointer(elem: impl Into<Elem>) -> Self {
        Self {
            storage: StorageType::Pointer(elem.into()),
            shape: Shape::Scalar,
        }
    }

    pub fn tile(elem: impl Into<Elem>, shape: Shape) -> Self {
        Self {
            storage: StorageType::Scalar(elem.into()),
            shape,
        }
    }

    /// Same lane type, different shape.
    pub fn with_shape(self, shape: Shape) -> Self {
        Self { shape, ..self }
    }

    /// Same shape, different element.
    pub fn with_elem(self, elem: Elem) -> Self {
        Self {
            storage: StorageType::Scalar(elem),
            ..self
        }
    }

    /// The element held by each lane, or pointed to for pointer values.
    pub fn elem(&self) -> Elem {
        match self.storage {
            StorageType::Scalar(elem) | StorageType::Pointer(elem) => elem,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.storage, StorageType::Pointer(_))
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Shape::Scalar => Ok(()),
            Shape::Vector(len) => write!(f, "{len}x"),
            Shape::Matrix(rows, cols) => write!(f, "{rows}x{cols}x"),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let lane = match self.storage {
            StorageType::Scalar(elem) => format!("{elem}"),
            StorageType::Pointer(elem) => format!("ptr<{elem}>"),
        };
        match self.shape {
            Shape::Scalar => f.write_str(&lane),
            shape => write!(f, "tensor<{shape}{lane}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FloatKind, IntKind};

    #[test]
    fn expand_then_broadcast() {
        let row = Shape::Vector(32).expand(0).unwrap();
        assert_eq!(row, Shape::Matrix(1, 32));
        assert!(row.broadcasts_to(&Shape::Matrix(64, 32)));
        assert!(!row.broadcasts_to(&Shape::Matrix(64, 16)));
        assert_eq!(Shape::Matrix(2, 2).expand(0), None);
    }

    #[test]
    fn display_matches_tile_notation() {
        let ty = Type::tile(FloatKind::F16, Shape::Matrix(64, 32));
        assert_eq!(ty.to_string(), "tensor<64x32xf16>");
        let ptrs = Type::pointer(FloatKind::F32).with_shape(Shape::Vector(16));
        assert_eq!(ptrs.to_string(), "tensor<16xptr<f32>>");
        assert_eq!(Type::scalar(IntKind::I32).to_string(), "i32");
    }
}
