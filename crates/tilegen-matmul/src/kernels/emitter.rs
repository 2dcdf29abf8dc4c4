use core::marker::PhantomData;

use tilegen_ir::{Elem, FloatKind, IntKind, KernelBuilder, ProgramAxis, Shape, Type, Value};

use crate::components::{LaunchGeometry, MatmulAnalysis, TilingConfig, emit_cast};
use crate::kernels::IndexType;

/// Pointer arguments of a matmul kernel.
#[derive(new, Debug, Clone, Copy)]
pub struct MatmulArgs {
    pub lhs: Value,
    pub rhs: Value,
    pub out: Value,
}

/// Emits the body of a blocked matmul kernel, addressing memory with `I` offsets.
///
/// Each program instance computes one `block_m x block_n` tile of the output for one batch and
/// one split of the reduction. Program ids, ranges and loop bounds are always 32-bit; they are
/// converted to `I` before being scaled by strides.
#[derive(new, Debug)]
pub struct MatmulEmitter<'a, I: IndexType> {
    analysis: &'a MatmulAnalysis,
    config: &'a TilingConfig,
    geometry: &'a LaunchGeometry,
    accumulation: FloatKind,
    group_m: u32,
    allow_tf32: bool,
    #[new(default)]
    _index: PhantomData<I>,
}

/// Program coordinates of the tile being computed.
struct TileIds {
    pid_m: Value,
    pid_n: Value,
    pid_k: Value,
    pid_batch: Value,
}

/// Offsets along one tiled dimension, both as 32-bit lanes and in the index type.
#[derive(Clone, Copy)]
struct TileRange {
    narrow: Value,
    index: Value,
}

impl<I: IndexType> MatmulEmitter<'_, I> {
    pub fn emit(&self, builder: &mut KernelBuilder, args: MatmulArgs) {
        let ids = self.tile_ids(builder);

        let block_m = self.config.block_m;
        let block_n = self.config.block_n;
        let block_k = self.config.block_k;

        let range_m = self.tile_range(builder, ids.pid_m, block_m);
        let range_n = self.tile_range(builder, ids.pid_n, block_n);
        let range_k = self.tile_range(builder, ids.pid_k, block_k);

        let pid_batch = builder.cast(ids.pid_batch, I::elem());
        let lhs_ptrs = self.lhs_pointers(builder, args.lhs, pid_batch, range_m, range_k);
        let rhs_ptrs = self.rhs_pointers(builder, args.rhs, pid_batch, range_k, range_n);

        let acc = self.reduction_loop(builder, lhs_ptrs, rhs_ptrs, range_k);

        self.store_output(builder, args.out, acc, ids.pid_k, pid_batch, range_m, range_n);
    }

    /// Decode the program ids, swizzling the fused tile id into `(pid_m, pid_n)` so that
    /// neighbouring programs reuse the same operand tiles.
    fn tile_ids(&self, builder: &mut KernelBuilder) -> TileIds {
        let i32_ty = Type::scalar(IntKind::I32);

        let pid_nc = builder.program_id(self.geometry.tile_axis);
        let pid_batch = builder.program_id(self.geometry.batch_axis);
        let pid_k = builder.program_id(ProgramAxis::Z);

        let group_m = builder.constant(self.group_m as i64, i32_ty);
        let grid_m = builder.constant(self.geometry.grid_m as i64, i32_ty);
        let width = builder.constant(self.group_m as i64 * self.geometry.grid_n as i64, i32_ty);

        let group_id = builder.div(pid_nc, width);
        let first_pid_m = builder.mul(group_id, group_m);
        let remaining = builder.sub(grid_m, first_pid_m);
        let is_last_group = builder.lower(remaining, group_m);
        let group_size = builder.select(is_last_group, remaining, group_m);

        let row = builder.rem(pid_nc, group_size);
        let pid_m = builder.add(first_pid_m, row);
        let in_group = builder.rem(pid_nc, width);
        let pid_n = builder.div(in_group, group_size);

        TileIds {
            pid_m,
            pid_n,
            pid_k,
            pid_batch,
        }
    }

    /// `pid * block + [0, block)`
    fn tile_range(&self, builder: &mut KernelBuilder, pid: Value, block: u32) -> TileRange {
        let shape = Shape::Vector(block);
        let block_size = builder.constant(block as i64, Type::scalar(IntKind::I32));
        let start = builder.mul(pid, block_size);
        let start = builder.splat(start, shape);
        let lanes = builder.make_range(0, block);
        let narrow = builder.add(start, lanes);
        let index = builder.cast(narrow, I::elem());

        TileRange { narrow, index }
    }

    /// Outer sum `rows * row_stride + cols * col_stride`, as a `rows x cols` tile.
    fn outer_offsets(
        &self,
        builder: &mut KernelBuilder,
        rows: Value,
        row_stride: usize,
        cols: Value,
        col_stride: usize,
    ) -> Value {
        let (Shape::Vector(num_rows), Shape::Vector(num_cols)) = (rows.ty.shape, cols.ty.shape)
        else {
            unreachable!("Offsets are computed from ranges");
        };
        let shape = Shape::Matrix(num_rows, num_cols);

        let rows = builder.expand_dims(rows, 1);
        let row_stride = self.index_constant(builder, row_stride, rows.ty.shape);
        let rows = builder.mul(rows, row_stride);
        let rows = builder.broadcast(rows, shape);

        let cols = builder.expand_dims(cols, 0);
        let col_stride = self.index_constant(builder, col_stride, cols.ty.shape);
        let cols = builder.mul(cols, col_stride);
        let cols = builder.broadcast(cols, shape);

        builder.add(rows, cols)
    }

    /// Pointer tile `base + batch * batch_stride + offsets`.
    fn pointer_tile(
        &self,
        builder: &mut KernelBuilder,
        base: Value,
        pid_batch: Value,
        batch_stride: usize,
        offsets: Value,
    ) -> Value {
        let batch_stride = self.index_constant(builder, batch_stride, Shape::Scalar);
        let batch_offset = builder.mul(pid_batch, batch_stride);
        let base = builder.add_ptr(base, batch_offset);
        let base = builder.splat(base, offsets.ty.shape);

        builder.add_ptr(base, offsets)
    }

    fn lhs_pointers(
        &self,
        builder: &mut KernelBuilder,
        lhs: Value,
        pid_batch: Value,
        range_m: TileRange,
        range_k: TileRange,
    ) -> Value {
        let analysis = self.analysis;
        // Rows past the end wrap around so that loads stay in bounds; they are masked on store.
        let extent = self.index_constant(builder, analysis.m_minor, range_m.index.ty.shape);
        let rows = builder.rem(range_m.index, extent);
        let offsets = self.outer_offsets(
            builder,
            rows,
            analysis.lhs_stride_m,
            range_k.index,
            analysis.lhs_stride_k,
        );

        self.pointer_tile(builder, lhs, pid_batch, analysis.batch.lhs_stride(), offsets)
    }

    fn rhs_pointers(
        &self,
        builder: &mut KernelBuilder,
        rhs: Value,
        pid_batch: Value,
        range_k: TileRange,
        range_n: TileRange,
    ) -> Value {
        let analysis = self.analysis;
        let extent = self.index_constant(builder, analysis.n, range_n.index.ty.shape);
        let cols = builder.rem(range_n.index, extent);
        let offsets = self.outer_offsets(
            builder,
            range_k.index,
            analysis.rhs_stride_k,
            cols,
            analysis.rhs_stride_n,
        );

        self.pointer_tile(builder, rhs, pid_batch, analysis.batch.rhs_stride(), offsets)
    }

    /// Accumulate `lhs @ rhs` over the whole reduction axis and return the accumulator tile.
    fn reduction_loop(
        &self,
        builder: &mut KernelBuilder,
        lhs_ptrs: Value,
        rhs_ptrs: Value,
        range_k: TileRange,
    ) -> Value {
        let i32_ty = Type::scalar(IntKind::I32);
        let k = self.analysis.k;
        let step_k = self.config.step_k() as usize;
        assert!(
            k <= i32::MAX as usize,
            "The reduction loop is bounded by 32-bit integers, got k = {k}"
        );

        let acc_elem = Elem::Float(self.accumulation);
        let acc_shape = Shape::Matrix(self.config.block_m, self.config.block_n);
        let lhs_shape = lhs_ptrs.ty.shape;
        let rhs_shape = rhs_ptrs.ty.shape;

        let start = builder.constant(0, i32_ty);
        let end = builder.constant(k as i64, i32_ty);
        let step = builder.constant(step_k as i64, i32_ty);
        let acc = builder.constant(0, Type::tile(acc_elem, acc_shape));

        let needs_mask = k % step_k > 0;
        let (lhs_fill, rhs_fill) = if needs_mask {
            (
                Some(builder.constant(0, Type::tile(lhs_ptrs.elem(), lhs_shape))),
                Some(builder.constant(0, Type::tile(rhs_ptrs.elem(), rhs_shape))),
            )
        } else {
            (None, None)
        };

        let lhs_advance = step_k * self.analysis.lhs_stride_k;
        let lhs_advance = self.index_constant(builder, lhs_advance, lhs_shape);
        let rhs_advance = step_k * self.analysis.rhs_stride_k;
        let rhs_advance = self.index_constant(builder, rhs_advance, rhs_shape);

        let results = builder.for_loop(
            start,
            end,
            step,
            &[lhs_ptrs, rhs_ptrs, acc],
            |builder, ki, carried| {
                let (lhs_ptrs, rhs_ptrs, acc) = (carried[0], carried[1], carried[2]);

                let (lhs_mask, rhs_mask) = if needs_mask {
                    let remaining = builder.sub(end, ki);
                    let lhs_mask = k_mask(builder, range_k.narrow, remaining, 0, lhs_shape);
                    let rhs_mask = k_mask(builder, range_k.narrow, remaining, 1, rhs_shape);
                    (Some(lhs_mask), Some(rhs_mask))
                } else {
                    (None, None)
                };

                let lhs = builder.load(lhs_ptrs, lhs_mask, lhs_fill);
                let rhs = builder.load(rhs_ptrs, rhs_mask, rhs_fill);
                let lhs = emit_cast(builder, lhs, acc_elem);
                let rhs = emit_cast(builder, rhs, acc_elem);
                let acc = builder.dot(lhs, rhs, acc, self.allow_tf32);

                let lhs_ptrs = builder.add_ptr(lhs_ptrs, lhs_advance);
                let rhs_ptrs = builder.add_ptr(rhs_ptrs, rhs_advance);

                vec![lhs_ptrs, rhs_ptrs, acc]
            },
        );

        results[2]
    }

    #[allow(clippy::too_many_arguments)]
    fn store_output(
        &self,
        builder: &mut KernelBuilder,
        out: Value,
        acc: Value,
        pid_k: Value,
        pid_batch: Value,
        range_m: TileRange,
        range_n: TileRange,
    ) {
        let strides = self.analysis.out;

        let pid_k = builder.cast(pid_k, I::elem());
        let split_stride = self.index_constant(builder, strides.split_k, Shape::Scalar);
        let split_offset = builder.mul(pid_k, split_stride);
        let out = builder.add_ptr(out, split_offset);

        let offsets =
            self.outer_offsets(builder, range_m.index, strides.m, range_n.index, strides.n);
        let ptrs = self.pointer_tile(builder, out, pid_batch, strides.batch, offsets);

        let shape = offsets.ty.shape;
        let rows_in_bounds =
            self.bound_mask(builder, range_m.index, self.analysis.m_minor, 1, shape);
        let cols_in_bounds = self.bound_mask(builder, range_n.index, self.analysis.n, 0, shape);
        let mask = builder.and(rows_in_bounds, cols_in_bounds);

        let value = emit_cast(builder, acc, ptrs.elem());
        builder.store(ptrs, value, Some(mask));
    }

    /// `range < extent`, expanded along `axis` and broadcast to `shape`.
    fn bound_mask(
        &self,
        builder: &mut KernelBuilder,
        range: Value,
        extent: usize,
        axis: u32,
        shape: Shape,
    ) -> Value {
        let range = builder.expand_dims(range, axis);
        let extent = self.index_constant(builder, extent, range.ty.shape);
        let mask = builder.lower(range, extent);
        builder.broadcast(mask, shape)
    }

    fn index_constant(&self, builder: &mut KernelBuilder, value: usize, shape: Shape) -> Value {
        builder.constant(I::constant(value), Type::tile(I::elem(), shape))
    }
}

/// Lanes of the reduction range still below `remaining`, laid out along `axis` of `shape`.
fn k_mask(
    builder: &mut KernelBuilder,
    range_k: Value,
    remaining: Value,
    axis: u32,
    shape: Shape,
) -> Value {
    let range_k = builder.expand_dims(range_k, axis);
    let remaining = builder.splat(remaining, range_k.ty.shape);
    let mask = builder.lower(range_k, remaining);
    builder.broadcast(mask, shape)
}

#[cfg(test)]
mod tests {
    use tilegen_ir::{Operation, verify};

    use super::*;
    use crate::components::{
        DeviceProperties, DimRole, OperandDesc, OutputDesc, TensorContractionOp,
    };

    const F16: Elem = Elem::Float(FloatKind::F16);

    fn emit<I: IndexType>(k: usize, config: TilingConfig) -> tilegen_ir::KernelProgram {
        let op = TensorContractionOp::new(
            OperandDesc::row_major(
                F16,
                vec![64, k],
                vec![DimRole::NonContracting, DimRole::Contracting],
            ),
            OperandDesc::row_major(
                F16,
                vec![k, 48],
                vec![DimRole::Contracting, DimRole::NonContracting],
            ),
            OutputDesc::row_major(F16, vec![64, 48]),
        );
        let analysis = MatmulAnalysis::new(&op);
        let geometry =
            LaunchGeometry::new(64, 48, 1, &config, &DeviceProperties::default()).unwrap();

        let mut builder = KernelBuilder::new("matmul");
        let args = MatmulArgs::new(
            builder.arg(Type::pointer(F16), Some(16)),
            builder.arg(Type::pointer(F16), Some(16)),
            builder.arg(Type::pointer(F16), Some(16)),
        );
        MatmulEmitter::<I>::new(&analysis, &config, &geometry, FloatKind::F32, 8, true)
            .emit(&mut builder, args);
        builder.build()
    }

    fn count_in_loop(program: &tilegen_ir::KernelProgram, pred: fn(&Operation) -> bool) -> usize {
        let mut count = 0;
        program.visit(|inst, depth| {
            if depth > 0 && pred(&inst.operation) {
                count += 1;
            }
        });
        count
    }

    #[test]
    fn emitted_program_is_well_formed() {
        let program = emit::<i32>(64, TilingConfig::new(32, 16, 16, 1, 1, 4));
        assert_eq!(verify(&program), Ok(()));

        let program = emit::<i64>(64, TilingConfig::new(32, 16, 16, 1, 1, 4));
        assert_eq!(verify(&program), Ok(()));
    }

    #[test]
    fn exact_reduction_loads_without_mask() {
        let program = emit::<i32>(64, TilingConfig::new(32, 16, 16, 2, 1, 4));
        let masked = count_in_loop(&program, |op| {
            matches!(op, Operation::Load(load) if load.mask.is_some())
        });
        assert_eq!(masked, 0);
    }

    #[test]
    fn ragged_reduction_masks_every_load() {
        let program = emit::<i32>(65, TilingConfig::new(32, 16, 16, 1, 1, 4));
        let masked = count_in_loop(&program, |op| {
            matches!(op, Operation::Load(load) if load.mask.is_some() && load.other.is_some())
        });
        assert_eq!(masked, 2);
    }

    #[test]
    fn operands_are_cast_before_the_dot() {
        let program = emit::<i32>(64, TilingConfig::new(32, 16, 16, 1, 1, 4));
        let mut dot_elems = Vec::new();
        program.visit(|inst, _| {
            if let Operation::Dot(dot) = &inst.operation {
                dot_elems.push((dot.lhs.elem(), dot.rhs.elem(), dot.acc.elem()));
            }
        });
        let f32 = Elem::Float(FloatKind::F32);
        assert_eq!(dot_elems, vec![(f32, f32, f32)]);
    }
}
