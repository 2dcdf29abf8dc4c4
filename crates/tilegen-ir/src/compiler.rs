use thiserror::Error;

use crate::KernelProgram;

/// Options handed to the pipeline lowering a [kernel program](KernelProgram) to device code.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompilationOptions {
    pub num_warps: u32,
    pub num_stages: u32,
    /// `(major, minor)` compute capability of the target device.
    pub compute_capability: (u32, u32),
}

/// Output of a [kernel compiler](KernelCompiler).
#[derive(Debug, Clone)]
pub struct CompiledKernel<Repr> {
    /// Name of the entry point the kernel is launched through.
    pub entrypoint_name: String,
    /// The lower level representation produced by the compiler.
    pub repr: Repr,
    /// Shared memory used by the compiled kernel, in bytes.
    pub shared_mem_bytes: usize,
}

/// Lowers a verified kernel program further, down to something a device can run.
pub trait KernelCompiler {
    /// The representation for the compiled code.
    type Representation: core::fmt::Debug;

    fn compile(
        &mut self,
        program: &KernelProgram,
        options: &CompilationOptions,
    ) -> Result<CompiledKernel<Self::Representation>, CompilationError>;
}

/// Failure raised by a [kernel compiler](KernelCompiler).
#[derive(Error, Clone, PartialEq, Eq)]
pub enum CompilationError {
    /// The compiler can't express an operation of the program.
    #[error("Unsupported operation `{operation}`")]
    UnsupportedOperation { operation: String },

    /// Generic compilation failure.
    #[error("A compilation error happened\nCaused by:\n  {reason}")]
    Generic { reason: String },
}

impl core::fmt::Debug for CompilationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{self}"))
    }
}
