use crate::components::{
    DimRole, IterationSpec, IterationStride, OperandDesc, TensorContractionOp,
};

/// How program instances along the batch grid axis are spread over the operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchMode {
    /// Single matrix product.
    None,
    /// A batch dimension shared by both operands.
    Batch {
        size: usize,
        lhs_stride: usize,
        rhs_stride: usize,
    },
    /// The lhs non-contracting dimension isn't contiguous. Its major part is iterated like a
    /// batch of the lhs only.
    SplitNonContracting { size: usize, lhs_major_stride: usize },
}

impl BatchMode {
    pub fn size(&self) -> usize {
        match self {
            BatchMode::None => 1,
            BatchMode::Batch { size, .. } | BatchMode::SplitNonContracting { size, .. } => *size,
        }
    }

    pub fn lhs_stride(&self) -> usize {
        match self {
            BatchMode::None => 0,
            BatchMode::Batch { lhs_stride, .. } => *lhs_stride,
            BatchMode::SplitNonContracting {
                lhs_major_stride, ..
            } => *lhs_major_stride,
        }
    }

    pub fn rhs_stride(&self) -> usize {
        match self {
            BatchMode::Batch { rhs_stride, .. } => *rhs_stride,
            BatchMode::None | BatchMode::SplitNonContracting { .. } => 0,
        }
    }
}

/// Output strides of each classified axis, `0` for absent axes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputStrides {
    pub m: usize,
    pub n: usize,
    pub split_k: usize,
    pub batch: usize,
}

/// Everything needed to address the tiles of a matmul.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatmulAnalysis {
    /// Rows of one lhs matrix: the minor part of a split non-contracting dimension.
    pub m_minor: usize,
    /// Rows of the output, `m_minor` times the major part of a split dimension.
    pub m_full: usize,
    pub n: usize,
    /// Full reduction length, split-k included.
    pub k: usize,
    pub split_k: usize,
    pub lhs_stride_m: usize,
    pub lhs_stride_k: usize,
    pub rhs_stride_k: usize,
    pub rhs_stride_n: usize,
    pub batch: BatchMode,
    pub out: OutputStrides,
}

struct OperandDims {
    contracting: usize,
    non_contracting: usize,
    batch: Option<usize>,
    split_k: Option<usize>,
}

impl OperandDims {
    fn classify(operand: &OperandDesc, name: &str) -> Self {
        let contracting = operand.dims_with_role(DimRole::Contracting);
        let non_contracting = operand.dims_with_role(DimRole::NonContracting);
        let batch = operand.dims_with_role(DimRole::Batch);
        let split_k = operand.dims_with_role(DimRole::SplitK);

        assert_eq!(
            contracting.len(),
            1,
            "The {name} operand must have exactly one contracting dimension"
        );
        assert_eq!(
            non_contracting.len(),
            1,
            "The {name} operand must have exactly one non-contracting dimension"
        );
        assert!(
            batch.len() <= 1,
            "The {name} operand has more than one batch dimension"
        );
        assert!(
            split_k.len() <= 1,
            "The {name} operand has more than one split-k dimension"
        );

        Self {
            contracting: contracting[0],
            non_contracting: non_contracting[0],
            batch: batch.first().copied(),
            split_k: split_k.first().copied(),
        }
    }
}

impl MatmulAnalysis {
    /// Derive strides and extents from dimension roles and layouts.
    ///
    /// # Panics
    ///
    /// When the roles or layouts are structurally unsupported: several contracting dimensions,
    /// a batch dimension combined with a split non-contracting one, fragmented dimensions other
    /// than the lhs non-contracting one, or an output layout inconsistent with the operands.
    pub fn new(op: &TensorContractionOp) -> Self {
        let lhs_dims = OperandDims::classify(&op.lhs, "lhs");
        let rhs_dims = OperandDims::classify(&op.rhs, "rhs");

        assert_eq!(
            lhs_dims.batch.is_some(),
            rhs_dims.batch.is_some(),
            "Both operands must agree on the presence of a batch dimension"
        );
        assert_eq!(
            lhs_dims.split_k.is_some(),
            rhs_dims.split_k.is_some(),
            "Both operands must agree on the presence of a split-k dimension"
        );

        let lhs_shape = op.lhs.logical_shape();
        let rhs_shape = op.rhs.logical_shape();

        let lhs_m = op.lhs.iteration_spec(lhs_dims.non_contracting);
        let rhs_n = single(&op.rhs, rhs_dims.non_contracting, "rhs non-contracting");
        let lhs_k = single(&op.lhs, lhs_dims.contracting, "lhs contracting");
        let rhs_k = single(&op.rhs, rhs_dims.contracting, "rhs contracting");

        let contracting_extent = lhs_shape[lhs_dims.contracting];
        assert_eq!(
            contracting_extent, rhs_shape[rhs_dims.contracting],
            "Contracting dimensions differ in length"
        );

        let split_k = match (lhs_dims.split_k, rhs_dims.split_k) {
            (Some(lhs_split), Some(rhs_split)) => {
                let split_k = lhs_shape[lhs_split];
                assert_eq!(
                    split_k, rhs_shape[rhs_split],
                    "Split-k dimensions differ in length"
                );
                assert_split_is_contiguous(&op.lhs, lhs_split, lhs_k, "lhs");
                assert_split_is_contiguous(&op.rhs, rhs_split, rhs_k, "rhs");
                split_k
            }
            _ => 1,
        };

        assert!(
            lhs_m.len() <= 2,
            "The lhs non-contracting dimension has more than two fragments"
        );
        let lhs_nc_split = lhs_m.len() == 2;
        assert!(
            !(lhs_nc_split && lhs_dims.batch.is_some()),
            "A split non-contracting dimension and a batch dimension can't be combined"
        );

        let m_minor = lhs_m[0].count;
        let batch = match (lhs_nc_split, lhs_dims.batch, rhs_dims.batch) {
            (true, _, _) => BatchMode::SplitNonContracting {
                size: lhs_m[1].count,
                lhs_major_stride: lhs_m[1].stride,
            },
            (false, Some(lhs_batch), Some(rhs_batch)) => {
                let lhs_batch = single(&op.lhs, lhs_batch, "lhs batch");
                let rhs_batch = single(&op.rhs, rhs_batch, "rhs batch");
                assert_eq!(
                    lhs_batch.count, rhs_batch.count,
                    "Batch dimensions differ in length"
                );
                BatchMode::Batch {
                    size: lhs_batch.count,
                    lhs_stride: lhs_batch.stride,
                    rhs_stride: rhs_batch.stride,
                }
            }
            _ => BatchMode::None,
        };
        let m_full = match batch {
            BatchMode::SplitNonContracting { size, .. } => m_minor * size,
            _ => m_minor,
        };

        let mut analysis = Self {
            m_minor,
            m_full,
            n: rhs_n.count,
            k: contracting_extent * split_k,
            split_k,
            lhs_stride_m: lhs_m[0].stride,
            lhs_stride_k: lhs_k.stride,
            rhs_stride_k: rhs_k.stride,
            rhs_stride_n: rhs_n.stride,
            batch,
            out: OutputStrides::default(),
        };
        analysis.out = analysis.output_strides(op, lhs_dims.batch.is_some());
        analysis
    }

    pub fn has_split_k(&self) -> bool {
        self.split_k > 1
    }

    /// Walk the output layout from the fastest varying dimension and assign the running extent
    /// product to each classified axis.
    fn output_strides(&self, op: &TensorContractionOp, have_batch: bool) -> OutputStrides {
        let have_split_k = self.has_split_k();
        let rank = op.out.shape.len();
        assert_eq!(
            rank,
            2 + have_split_k as usize + have_batch as usize,
            "Unexpected output rank {rank}"
        );

        let n_idx = rank - 1;
        let m_idx = rank - 2;
        let split_k_idx = have_split_k.then_some(0);
        let batch_idx = have_batch.then_some(have_split_k as usize);
        let lhs_nc_split = matches!(self.batch, BatchMode::SplitNonContracting { .. });

        let mut strides = OutputStrides::default();
        let mut acc = 1;

        for dim in op.out.minor_to_major.iter().copied() {
            let size = op.out.shape[dim];
            if dim == n_idx {
                assert_eq!(size, self.n, "Output n extent mismatch");
                strides.n = acc;
            } else if dim == m_idx {
                assert_eq!(size, self.m_full, "Output m extent mismatch");
                strides.m = acc;
                if lhs_nc_split {
                    // The output m dimension is contiguous even though the lhs one is split.
                    strides.batch = acc * self.m_minor;
                }
            } else if Some(dim) == split_k_idx {
                assert_eq!(size, self.split_k, "Output split-k extent mismatch");
                strides.split_k = acc;
            } else if Some(dim) == batch_idx {
                assert_eq!(size, self.batch.size(), "Output batch extent mismatch");
                strides.batch = acc;
            } else {
                panic!("Unexpected output dimension {dim}");
            }
            acc *= size;
        }

        assert!(
            strides.m >= 1 && strides.n >= 1,
            "Output m and n strides must be positive, got {strides:?}"
        );
        if have_split_k {
            assert!(
                strides.split_k > 1,
                "The split-k output dimension can't be the minor-most one"
            );
        }
        if have_batch || lhs_nc_split {
            assert!(
                strides.batch > 1,
                "The batch output dimension can't be the minor-most one"
            );
        }

        strides
    }
}

fn single(operand: &OperandDesc, dim: usize, name: &str) -> IterationStride {
    let spec: IterationSpec = operand.iteration_spec(dim);
    assert_eq!(
        spec.len(),
        1,
        "The {name} dimension must be contiguous, got {spec:?}"
    );
    spec[0]
}

/// The split-k and contracting dimensions must form one contiguous reduction axis.
fn assert_split_is_contiguous(
    operand: &OperandDesc,
    split_dim: usize,
    contracting: IterationStride,
    name: &str,
) {
    let split = single(operand, split_dim, &format!("{name} split-k"));
    assert_eq!(
        split.stride,
        contracting.count * contracting.stride,
        "The {name} split-k dimension must directly wrap the contracting dimension"
    );
}
