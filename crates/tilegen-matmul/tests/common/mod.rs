use rand::{Rng, SeedableRng, rngs::StdRng};
use tilegen_cpu::{CpuCompiler, ExecutionStats, HostBuffer, execute};
use tilegen_ir::{Elem, KernelBuilder, Type, verify};
use tilegen_matmul::{
    components::{
        DeviceProperties, DimRole, IndexWidth, LaunchGeometry, MatmulAnalysis, OperandDesc,
        OutputDesc, TensorContractionOp, TilingConfig, accumulation_kind,
    },
    kernels::{LoweringOptions, MatmulArgs, MatmulEmitter, MatmulKernel, lower_matmul},
};

/// Result of running a lowered matmul on the host.
#[allow(unused)]
pub struct MatmulRun {
    pub kernel: MatmulKernel,
    pub stats: ExecutionStats,
    pub actual: Vec<f64>,
    pub expected: Vec<f64>,
}

/// A `[m, k] x [k, n] -> [m, n]` row-major product.
#[allow(unused)]
pub fn plain(elem: Elem, out: Elem, m: usize, n: usize, k: usize) -> TensorContractionOp {
    TensorContractionOp::new(
        OperandDesc::row_major(
            elem,
            vec![m, k],
            vec![DimRole::NonContracting, DimRole::Contracting],
        ),
        OperandDesc::row_major(
            elem,
            vec![k, n],
            vec![DimRole::Contracting, DimRole::NonContracting],
        ),
        OutputDesc::row_major(out, vec![m, n]),
    )
}

/// Lower `op` with the host compiler, run it over random integer-valued inputs and compute the
/// expected output with a naive contraction.
///
/// Buffers are sized exactly, so any stray unmasked access fails the launch.
pub fn run(
    op: &TensorContractionOp,
    config: &TilingConfig,
    device: &DeviceProperties,
) -> MatmulRun {
    let mut compiler = CpuCompiler::new();
    let lowered = lower_matmul(
        "matmul",
        op,
        config,
        device,
        &LoweringOptions::default(),
        &mut compiler,
    )
    .unwrap();

    execute_kernel(op, config, lowered.kernel)
}

/// Like [run], with the kernel emitted for 64-bit offsets whatever the buffer sizes.
#[allow(unused)]
pub fn run_wide(
    op: &TensorContractionOp,
    config: &TilingConfig,
    device: &DeviceProperties,
) -> MatmulRun {
    let options = LoweringOptions::default();
    let analysis = MatmulAnalysis::new(op);
    let geometry = LaunchGeometry::new(
        analysis.m_minor,
        analysis.n,
        analysis.batch.size(),
        config,
        device,
    )
    .unwrap();
    let accumulation = accumulation_kind(op.lhs.elem, op.rhs.elem, op.out.elem);

    let mut builder = KernelBuilder::new("wide_matmul");
    let args = MatmulArgs::new(
        builder.arg(Type::pointer(op.lhs.elem.storage_elem()), None),
        builder.arg(Type::pointer(op.rhs.elem.storage_elem()), None),
        builder.arg(Type::pointer(op.out.elem.storage_elem()), None),
    );
    MatmulEmitter::<i64>::new(
        &analysis,
        config,
        &geometry,
        accumulation,
        options.group_m,
        options.allow_tf32,
    )
    .emit(&mut builder, args);

    let program = builder.build();
    verify(&program).unwrap();

    let kernel = MatmulKernel {
        program,
        geometry,
        index_width: IndexWidth::Wide,
        accumulation,
    };
    execute_kernel(op, config, kernel)
}

fn execute_kernel(
    op: &TensorContractionOp,
    config: &TilingConfig,
    kernel: MatmulKernel,
) -> MatmulRun {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut random = |len: usize| {
        (0..len)
            .map(|_| rng.random_range(-3..=3) as f64)
            .collect::<Vec<_>>()
    };
    let lhs = HostBuffer::from_f64(op.lhs.elem, &random(op.lhs.num_elements()));
    let rhs = HostBuffer::from_f64(op.rhs.elem, &random(op.rhs.num_elements()));
    let out = HostBuffer::zeros(op.out.elem, op.out.num_elements());
    let mut buffers = vec![lhs, rhs, out];

    let stats = execute(&kernel.program, kernel.launch().grid, &mut buffers).unwrap();

    let expected = reference(
        op,
        &buffers[0].to_f64(),
        &buffers[1].to_f64(),
        config.block_k as usize,
    );
    let expected = HostBuffer::from_f64(op.out.elem, &expected).to_f64();

    MatmulRun {
        kernel,
        stats,
        actual: buffers[2].to_f64(),
        expected,
    }
}

/// Naive contraction in the output layout.
///
/// With a split reduction, split `s` sums the blocks of `block_k` reduction indices whose block
/// number is `s` modulo the split factor.
pub fn reference(
    op: &TensorContractionOp,
    lhs: &[f64],
    rhs: &[f64],
    block_k: usize,
) -> Vec<f64> {
    let out_rank = op.out.shape.len();
    let split_k = op.split_k();
    let has_split = split_k > 1;
    let has_batch = !op.lhs.dims_with_role(DimRole::Batch).is_empty();

    let lhs_contracting = op.lhs.dims_with_role(DimRole::Contracting)[0];
    let contracting = op.lhs.logical_shape()[lhs_contracting];

    let out_strides = strides(&op.out.shape, &op.out.minor_to_major);
    let mut out = vec![0.0; op.out.num_elements()];

    for index in indices(&op.out.shape) {
        let split = if has_split { index[0] } else { 0 };
        let batch = if has_batch {
            index[has_split as usize]
        } else {
            0
        };
        let (i, j) = (index[out_rank - 2], index[out_rank - 1]);

        let mut sum = 0.0;
        for reduction in 0..contracting * split_k {
            if (reduction / block_k) % split_k != split {
                continue;
            }
            let (chunk, kk) = (reduction / contracting, reduction % contracting);
            let coordinate = |role: DimRole, non_contracting: usize| match role {
                DimRole::Contracting => kk,
                DimRole::SplitK => chunk,
                DimRole::Batch => batch,
                DimRole::NonContracting => non_contracting,
            };
            let lhs_index = logical_offset(&op.lhs, |role| coordinate(role, i));
            let rhs_index = logical_offset(&op.rhs, |role| coordinate(role, j));
            sum += lhs[lhs_index] * rhs[rhs_index];
        }

        let offset = index
            .iter()
            .zip(out_strides.iter())
            .map(|(index, stride)| index * stride)
            .sum::<usize>();
        out[offset] = sum;
    }

    out
}

/// Buffer offset of the element whose logical coordinates are given per role.
fn logical_offset(operand: &OperandDesc, coordinate: impl Fn(DimRole) -> usize) -> usize {
    let strides = operand.physical_strides();
    let mut offset = 0;

    for (dims, role) in operand.logical_dims.iter().zip(operand.roles.iter()) {
        let mut remaining = coordinate(*role);
        for dim in dims.iter().rev() {
            let extent = operand.physical_shape[*dim];
            offset += (remaining % extent) * strides[*dim];
            remaining /= extent;
        }
    }

    offset
}

fn strides(shape: &[usize], minor_to_major: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut acc = 1;
    for dim in minor_to_major {
        strides[*dim] = acc;
        acc *= shape[*dim];
    }
    strides
}

/// Every multi-index of `shape`, last dimension fastest.
fn indices(shape: &[usize]) -> Vec<Vec<usize>> {
    let mut all = vec![Vec::new()];
    for extent in shape {
        all = all
            .into_iter()
            .flat_map(|prefix| {
                (0..*extent).map(move |i| {
                    let mut index = prefix.clone();
                    index.push(i);
                    index
                })
            })
            .collect();
    }
    all
}
