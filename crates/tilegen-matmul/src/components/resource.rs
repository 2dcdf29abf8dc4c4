use tilegen_ir::Elem;

use crate::components::{
    MatmulAnalysis, ResourceExhaustedError, TensorContractionOp, TilingConfig,
};

/// Proxy for the generated code size and register pressure of a tiling: the size of the two
/// input tiles and the output tile, per warp.
pub fn complexity_heuristic(config: &TilingConfig) -> u64 {
    let block_m = config.block_m as u64;
    let block_n = config.block_n as u64;
    let block_k = config.block_k as u64;

    (block_m * block_n + (block_m + block_n) * block_k) / config.num_warps as u64
}

/// Reject tilings whose [complexity heuristic](complexity_heuristic) exceeds `limit`.
pub fn validate_complexity(
    config: &TilingConfig,
    limit: u64,
) -> Result<u64, ResourceExhaustedError> {
    let value = complexity_heuristic(config);
    if value > limit {
        return Err(ResourceExhaustedError::ComplexityHeuristic { value, limit });
    }
    Ok(value)
}

/// Shared memory needed to pipeline `num_stages` pairs of operand tiles, in bytes.
pub fn shared_memory_estimate(config: &TilingConfig, lhs: Elem, rhs: Elem) -> usize {
    let lhs_bits = lhs.storage_elem().size_bits();
    let rhs_bits = rhs.storage_elem().size_bits();

    (config.block_m as usize * lhs_bits + config.block_n as usize * rhs_bits)
        * config.block_k as usize
        * config.num_stages as usize
        / 8
}

pub fn validate_shared_memory(
    required: usize,
    budget: usize,
) -> Result<(), ResourceExhaustedError> {
    if required > budget {
        return Err(ResourceExhaustedError::SharedMemory { required, budget });
    }
    Ok(())
}

/// Width of the integers used for address computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexWidth {
    /// 32-bit signed offsets.
    Narrow,
    /// 64-bit signed offsets.
    Wide,
}

impl IndexWidth {
    /// Wide addressing is used when some buffer, the output scaled by the split factor included,
    /// holds more elements than a signed 32-bit offset can reach, or when the pointer advance of
    /// one reduction step does.
    ///
    /// The advance is `block_k * split_k` rows of the reduction axis, which exceeds the operands
    /// whenever the step overshoots the reduction length.
    pub fn select(
        op: &TensorContractionOp,
        analysis: &MatmulAnalysis,
        config: &TilingConfig,
    ) -> Self {
        let limit = i32::MAX as u128;
        let exceeds = |elements: usize, factor: usize| elements as u128 * factor as u128 > limit;

        let stride_k = analysis.lhs_stride_k.max(analysis.rhs_stride_k);

        if exceeds(op.lhs.num_elements(), 1)
            || exceeds(op.rhs.num_elements(), 1)
            || exceeds(op.out.num_elements(), analysis.split_k)
            || exceeds(stride_k, config.step_k() as usize)
        {
            IndexWidth::Wide
        } else {
            IndexWidth::Narrow
        }
    }
}
