use tilegen_ir::{
    CompilationError, CompilationOptions, CompiledKernel, KernelCompiler, KernelProgram,
    Operation, verify,
};

use crate::{ExecutionError, ExecutionStats, HostBuffer, execute};

/// [Kernel compiler](KernelCompiler) targeting the host executor.
///
/// Compilation only verifies the program and measures the shared memory a pipelining device
/// compiler would allocate for it.
#[derive(new, Debug, Default, Clone)]
pub struct CpuCompiler {
    /// Number of kernels compiled so far.
    #[new(default)]
    pub num_compiled: usize,
}

/// A kernel ready to be launched on the host.
#[derive(new, Debug, Clone)]
pub struct CpuKernel {
    pub program: KernelProgram,
}

impl CpuKernel {
    /// Run every program instance of `grid` over `buffers`.
    pub fn launch(
        &self,
        grid: (u32, u32, u32),
        buffers: &mut [HostBuffer],
    ) -> Result<ExecutionStats, ExecutionError> {
        execute(&self.program, grid, buffers)
    }
}

impl KernelCompiler for CpuCompiler {
    type Representation = CpuKernel;

    fn compile(
        &mut self,
        program: &KernelProgram,
        options: &CompilationOptions,
    ) -> Result<CompiledKernel<Self::Representation>, CompilationError> {
        verify(program).map_err(|err| CompilationError::Generic {
            reason: err.to_string(),
        })?;

        let shared_mem_bytes = pipelined_shared_memory(program, options.num_stages);
        log::debug!(
            "Compiled {} for {} warps: {} instructions, {shared_mem_bytes} bytes of shared memory",
            program.name,
            options.num_warps,
            program.num_instructions()
        );
        self.num_compiled += 1;

        Ok(CompiledKernel {
            entrypoint_name: program.name.clone(),
            repr: CpuKernel::new(program.clone()),
            shared_mem_bytes,
        })
    }
}

/// Shared memory needed to buffer every load issued inside a loop `num_stages` times, in bytes.
pub fn pipelined_shared_memory(program: &KernelProgram, num_stages: u32) -> usize {
    let mut bytes = 0;
    program.visit(|instruction, depth| {
        if let Operation::Load(load) = &instruction.operation {
            if depth > 0 {
                bytes += load.ptr.ty.num_elements() * load.ptr.elem().storage_elem().size();
            }
        }
    });
    bytes * num_stages as usize
}

#[cfg(test)]
mod tests {
    use tilegen_ir::{Elem, FloatKind, IntKind, KernelBuilder, Shape, Type};

    use super::*;

    fn options(num_stages: u32) -> CompilationOptions {
        CompilationOptions {
            num_warps: 4,
            num_stages,
            compute_capability: (8, 0),
        }
    }

    #[test_log::test]
    fn only_loads_in_loops_use_shared_memory() {
        let f16 = Elem::Float(FloatKind::F16);
        let i32_ty = Type::scalar(IntKind::I32);
        let mut builder = KernelBuilder::new("pipelined");
        let ptr = builder.arg(Type::pointer(f16), Some(16));
        let tile = builder.splat(ptr, Shape::Matrix(32, 16));

        // Outside of any loop.
        builder.load(tile, None, None);

        let start = builder.constant(0, i32_ty);
        let end = builder.constant(4, i32_ty);
        let step = builder.constant(1, i32_ty);
        builder.for_loop(start, end, step, &[], |builder, _, _| {
            builder.load(tile, None, None);
            Vec::new()
        });
        let program = builder.build();

        let mut compiler = CpuCompiler::new();
        let compiled = compiler.compile(&program, &options(3)).unwrap();

        assert_eq!(compiled.shared_mem_bytes, 32 * 16 * 2 * 3);
        assert_eq!(compiled.entrypoint_name, "pipelined");
        assert_eq!(compiler.num_compiled, 1);
    }

    #[test]
    fn invalid_programs_are_rejected() {
        let program = KernelProgram {
            name: "invalid".into(),
            args: vec![tilegen_ir::KernelArg::new(
                tilegen_ir::Value::new(0, Type::scalar(IntKind::I32)),
                None,
            )],
            body: Vec::new(),
        };

        let err = CpuCompiler::new().compile(&program, &options(1)).unwrap_err();
        assert!(matches!(err, CompilationError::Generic { .. }));
    }
}
