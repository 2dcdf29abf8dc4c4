use thiserror::Error;
use tilegen_ir::{CompilationError, ProgramAxis};

/// Errors that can occur while lowering a matmul.
///
/// Both variants are recoverable: an autotuner is expected to try another configuration.
#[derive(Error, Clone, PartialEq, Eq)]
pub enum MatmulLoweringError {
    /// The configuration implies a kernel the device can't run.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(#[from] ResourceExhaustedError),

    /// The kernel compiler rejected the emitted program.
    #[error("A compilation error happened during lowering\nCaused by:\n  {0}")]
    Compilation(#[from] CompilationError),
}

/// A device or code size budget exceeded by a tiling configuration.
#[derive(Error, Clone, PartialEq, Eq)]
pub enum ResourceExhaustedError {
    /// Proxy for code size and register pressure of the emitted kernel.
    #[error("tiling complexity heuristic exceeded: {value} > {limit}")]
    ComplexityHeuristic { value: u64, limit: u64 },

    /// Shared memory estimated from the tiling, before emission.
    #[error("requires too much shared memory: {required} > {budget}")]
    SharedMemory { required: usize, budget: usize },

    /// Shared memory reported by the kernel compiler.
    #[error("shared memory size limit exceeded: {measured} > {budget}")]
    MeasuredSharedMemory { measured: usize, budget: usize },

    /// A bounded grid axis would hold too many blocks.
    #[error("launch grid axis {axis} exceeds its ceiling: {requested} >= {limit}")]
    GridAxis {
        axis: ProgramAxis,
        requested: u64,
        limit: u64,
    },

    /// The grid can't be laid out under the per-axis ceiling.
    #[error("launch grid too large: {tiles} tiles x {batches} batches >= {limit}^2")]
    GridTotal { tiles: u64, batches: u64, limit: u64 },
}

impl core::fmt::Debug for MatmulLoweringError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{self}"))
    }
}

impl core::fmt::Debug for ResourceExhaustedError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{self}"))
    }
}
