use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use tilegen_ir::Elem;

/// Role of a logical dimension of a matmul operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimRole {
    /// Summed over ("k").
    Contracting,
    /// Shared, independently iterated.
    Batch,
    /// Survives into the output ("m" for the lhs, "n" for the rhs).
    NonContracting,
    /// Extra reduction axis of extent `split_k`, just before the contracting dimension.
    SplitK,
}

/// Number of elements and distance between consecutive elements along one contiguous fragment of
/// a logical dimension.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterationStride {
    pub count: usize,
    pub stride: usize,
}

/// One fragment per contiguous part of a logical dimension, minor part first.
pub type IterationSpec = SmallVec<[IterationStride; 2]>;

/// A matmul operand: a logical view over a physical buffer.
///
/// Each logical dimension is made of one or more physical dimensions, listed major first as a
/// reshape would merge them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperandDesc {
    pub elem: Elem,
    pub physical_shape: Vec<usize>,
    /// Physical dimensions from the fastest to the slowest varying one.
    pub minor_to_major: Vec<usize>,
    pub logical_dims: Vec<Vec<usize>>,
    pub roles: Vec<DimRole>,
}

/// The matmul output, with logical dimensions ordered `[split_k?, batch?, m, n]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputDesc {
    pub elem: Elem,
    pub shape: Vec<usize>,
    /// Logical dimensions from the fastest to the slowest varying one.
    pub minor_to_major: Vec<usize>,
}

/// Description of a tensor contraction to lower, regardless of actual data.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorContractionOp {
    pub lhs: OperandDesc,
    pub rhs: OperandDesc,
    pub out: OutputDesc,
}

impl OperandDesc {
    /// An operand whose logical dimensions are its physical dimensions.
    pub fn new(
        elem: Elem,
        shape: Vec<usize>,
        minor_to_major: Vec<usize>,
        roles: Vec<DimRole>,
    ) -> Self {
        let logical_dims = (0..shape.len()).map(|dim| vec![dim]).collect();
        Self::reshaped(elem, shape, minor_to_major, logical_dims, roles)
    }

    /// An operand stored with the last dimension varying fastest.
    pub fn row_major(elem: Elem, shape: Vec<usize>, roles: Vec<DimRole>) -> Self {
        let minor_to_major = (0..shape.len()).rev().collect();
        Self::new(elem, shape, minor_to_major, roles)
    }

    /// An operand whose logical dimensions group several physical dimensions.
    pub fn reshaped(
        elem: Elem,
        physical_shape: Vec<usize>,
        minor_to_major: Vec<usize>,
        logical_dims: Vec<Vec<usize>>,
        roles: Vec<DimRole>,
    ) -> Self {
        let rank = physical_shape.len();
        let mut sorted = minor_to_major.clone();
        sorted.sort_unstable();
        assert!(
            sorted.iter().copied().eq(0..rank),
            "Layout {minor_to_major:?} isn't a permutation of {rank} dimensions"
        );
        let mut used = logical_dims.iter().flatten().copied().collect::<Vec<_>>();
        used.sort_unstable();
        assert!(
            used.iter().copied().eq(0..rank),
            "Logical dimensions {logical_dims:?} must cover each physical dimension exactly once"
        );
        assert_eq!(
            logical_dims.len(),
            roles.len(),
            "Each logical dimension needs a role"
        );

        Self {
            elem,
            physical_shape,
            minor_to_major,
            logical_dims,
            roles,
        }
    }

    pub fn rank(&self) -> usize {
        self.logical_dims.len()
    }

    pub fn logical_shape(&self) -> Vec<usize> {
        self.logical_dims
            .iter()
            .map(|dims| dims.iter().map(|dim| self.physical_shape[*dim]).product())
            .collect()
    }

    /// Number of elements of the backing buffer.
    pub fn num_elements(&self) -> usize {
        self.physical_shape.iter().product()
    }

    /// Indices of the logical dimensions with the given role.
    pub fn dims_with_role(&self, role: DimRole) -> Vec<usize> {
        self.roles
            .iter()
            .enumerate()
            .filter_map(|(dim, r)| (*r == role).then_some(dim))
            .collect()
    }

    /// Distance in elements between consecutive indices of each physical dimension.
    pub fn physical_strides(&self) -> Vec<usize> {
        let mut strides = vec![0; self.physical_shape.len()];
        let mut acc = 1;
        for dim in self.minor_to_major.iter() {
            strides[*dim] = acc;
            acc *= self.physical_shape[*dim];
        }
        strides
    }

    /// How to walk logical dimension `dim` in memory.
    ///
    /// Unit physical dimensions are skipped and fragments that are adjacent in memory are merged,
    /// so a dimension laid out contiguously always yields a single entry.
    pub fn iteration_spec(&self, dim: usize) -> IterationSpec {
        let strides = self.physical_strides();
        let physical = &self.logical_dims[dim];
        let mut spec = IterationSpec::new();

        for dim in physical.iter().rev() {
            let count = self.physical_shape[*dim];
            let stride = strides[*dim];
            if count == 1 {
                continue;
            }
            match spec.last_mut() {
                Some(last) if last.stride * last.count == stride => last.count *= count,
                _ => spec.push(IterationStride::new(count, stride)),
            }
        }

        if spec.is_empty() {
            let stride = physical.last().map(|dim| strides[*dim]).unwrap_or(1);
            spec = smallvec![IterationStride::new(1, stride)];
        }

        spec
    }
}

impl OutputDesc {
    pub fn new(elem: Elem, shape: Vec<usize>, minor_to_major: Vec<usize>) -> Self {
        let mut sorted = minor_to_major.clone();
        sorted.sort_unstable();
        assert!(
            sorted.iter().copied().eq(0..shape.len()),
            "Layout {minor_to_major:?} isn't a permutation of {} dimensions",
            shape.len()
        );
        Self {
            elem,
            shape,
            minor_to_major,
        }
    }

    /// An output stored with the last dimension varying fastest.
    pub fn row_major(elem: Elem, shape: Vec<usize>) -> Self {
        let minor_to_major = (0..shape.len()).rev().collect();
        Self::new(elem, shape, minor_to_major)
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

impl TensorContractionOp {
    /// Extent of the split-k dimension, `1` when the reduction isn't split.
    pub fn split_k(&self) -> usize {
        self.lhs
            .dims_with_role(DimRole::SplitK)
            .first()
            .map(|dim| self.lhs.logical_shape()[*dim])
            .unwrap_or(1)
    }
}
