use tilegen_ir::{
    CompilationOptions, CompiledKernel, FloatKind, KernelBuilder, KernelCompiler, KernelProgram,
    Type, verify,
};

use crate::{
    components::{
        DeviceProperties, IndexWidth, LaunchDimensions, LaunchGeometry, MatmulAnalysis,
        MatmulLoweringError, ResourceExhaustedError, TensorContractionOp, TilingConfig,
        accumulation_kind, shared_memory_estimate, validate_complexity, validate_shared_memory,
    },
    config::{CompilationLogLevel, GlobalConfig, LoggerConfig},
    kernels::{MatmulArgs, MatmulEmitter},
    logging::CompilationLogger,
};

/// Knobs of a lowering that aren't part of the tiling.
#[derive(Debug, Clone, PartialEq)]
pub struct LoweringOptions {
    /// Largest accepted value of the tiling complexity heuristic.
    pub complexity_limit: u64,
    /// Rows of tiles walked together by the tile swizzle.
    pub group_m: u32,
    /// Alignment in bytes promised for every kernel argument.
    pub argument_alignment: u32,
    /// Whether dots may use tensor float 32 arithmetic.
    pub allow_tf32: bool,
    pub logger: LoggerConfig<CompilationLogLevel>,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self::from(&GlobalConfig::default())
    }
}

impl From<&GlobalConfig> for LoweringOptions {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            complexity_limit: config.lowering.complexity_limit,
            group_m: config.lowering.group_m,
            argument_alignment: config.lowering.argument_alignment,
            allow_tf32: config.lowering.allow_tf32,
            logger: config.compilation.logger.clone(),
        }
    }
}

impl LoweringOptions {
    /// Options read from the [global configuration](GlobalConfig).
    pub fn from_global_config() -> Self {
        Self::from(GlobalConfig::get().as_ref())
    }
}

/// A verified matmul kernel and how to launch it.
#[derive(Debug, Clone)]
pub struct MatmulKernel {
    pub program: KernelProgram,
    pub geometry: LaunchGeometry,
    pub index_width: IndexWidth,
    pub accumulation: FloatKind,
}

impl MatmulKernel {
    pub fn launch(&self) -> LaunchDimensions {
        self.geometry.dimensions
    }
}

/// A matmul kernel along with the output of the kernel compiler.
#[derive(Debug, Clone)]
pub struct LoweredMatmul<Repr> {
    pub kernel: MatmulKernel,
    pub compiled: CompiledKernel<Repr>,
}

/// Emit and verify the kernel program computing `op` with the given tiling.
///
/// Resource budgets are checked before anything is emitted, so an autotuner can cheaply discard
/// configurations the device can't run.
///
/// # Panics
///
/// If the tiling, the options or the operation layouts are structurally invalid.
pub fn emit_matmul(
    name: &str,
    op: &TensorContractionOp,
    config: &TilingConfig,
    device: &DeviceProperties,
    options: &LoweringOptions,
) -> Result<MatmulKernel, MatmulLoweringError> {
    let mut logger = CompilationLogger::new(&options.logger);
    emit_logged(name, op, config, device, options, &mut logger)
}

fn emit_logged(
    name: &str,
    op: &TensorContractionOp,
    config: &TilingConfig,
    device: &DeviceProperties,
    options: &LoweringOptions,
    logger: &mut CompilationLogger,
) -> Result<MatmulKernel, MatmulLoweringError> {
    config.assert_valid();
    assert!(
        options.group_m > 0,
        "A swizzle group holds at least one row of tiles, got group_m = 0"
    );

    let complexity = validate_complexity(config, options.complexity_limit)?;
    log::debug!("Lowering {name} with {config}, complexity heuristic {complexity}");

    let analysis = MatmulAnalysis::new(op);
    assert_eq!(
        analysis.split_k, config.split_k as usize,
        "The operation is split {} times but the tiling expects {}",
        analysis.split_k, config.split_k
    );

    let shared_memory = shared_memory_estimate(config, op.lhs.elem, op.rhs.elem);
    validate_shared_memory(shared_memory, device.shared_memory_per_block)?;

    let geometry = LaunchGeometry::new(
        analysis.m_minor,
        analysis.n,
        analysis.batch.size(),
        config,
        device,
    )?;

    let mut builder = KernelBuilder::new(name);
    let alignment = Some(options.argument_alignment);
    let args = MatmulArgs::new(
        builder.arg(Type::pointer(op.lhs.elem.storage_elem()), alignment),
        builder.arg(Type::pointer(op.rhs.elem.storage_elem()), alignment),
        builder.arg(Type::pointer(op.out.elem.storage_elem()), alignment),
    );

    let index_width = IndexWidth::select(op, &analysis, config);
    let accumulation = accumulation_kind(op.lhs.elem, op.rhs.elem, op.out.elem);

    match index_width {
        IndexWidth::Narrow => MatmulEmitter::<i32>::new(
            &analysis,
            config,
            &geometry,
            accumulation,
            options.group_m,
            options.allow_tf32,
        )
        .emit(&mut builder, args),
        IndexWidth::Wide => MatmulEmitter::<i64>::new(
            &analysis,
            config,
            &geometry,
            accumulation,
            options.group_m,
            options.allow_tf32,
        )
        .emit(&mut builder, args),
    }

    let program = builder.build();
    if let Err(err) = verify(&program) {
        panic!("Emitted an invalid matmul program for {name}: {err}\n{program}");
    }

    let kernel = MatmulKernel {
        program,
        geometry,
        index_width,
        accumulation,
    };

    if logger.is_enabled(CompilationLogLevel::Basic) {
        logger.log(&format_args!(
            "[Matmul] {name} {config} launch {:?} index {:?} accumulation {} \
             shared memory estimate {shared_memory}",
            kernel.geometry.dimensions, kernel.index_width, kernel.accumulation
        ));
    }
    if logger.is_enabled(CompilationLogLevel::Full) {
        logger.log(&kernel.program);
    }
    log::trace!("{}", kernel.program);

    Ok(kernel)
}

/// Emit the kernel computing `op`, hand it to `compiler` and check the shared memory the
/// compiled kernel actually uses.
///
/// Nothing is returned unless every step succeeds.
pub fn lower_matmul<C: KernelCompiler>(
    name: &str,
    op: &TensorContractionOp,
    config: &TilingConfig,
    device: &DeviceProperties,
    options: &LoweringOptions,
    compiler: &mut C,
) -> Result<LoweredMatmul<C::Representation>, MatmulLoweringError> {
    let mut logger = CompilationLogger::new(&options.logger);
    let mut kernel = emit_logged(name, op, config, device, options, &mut logger)?;

    let compilation_options = CompilationOptions {
        num_warps: config.num_warps,
        num_stages: config.num_stages,
        compute_capability: device.compute_capability,
    };
    let compiled = compiler.compile(&kernel.program, &compilation_options)?;

    let measured = compiled.shared_mem_bytes;
    let budget = device.shared_memory_per_block;
    log::debug!("Kernel {} uses {measured} bytes of shared memory", compiled.entrypoint_name);
    if measured > budget {
        return Err(ResourceExhaustedError::MeasuredSharedMemory { measured, budget }.into());
    }
    kernel.geometry.dimensions.shared_mem_bytes = measured;

    if logger.is_enabled(CompilationLogLevel::Basic) {
        logger.log(&format_args!(
            "[Matmul] {name} compiled to {} using {measured} bytes of shared memory",
            compiled.entrypoint_name
        ));
    }

    Ok(LoweredMatmul { kernel, compiled })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tilegen_ir::{CompilationError, Elem};

    use super::*;
    use crate::components::{DimRole, OperandDesc, OutputDesc};

    const F16: Elem = Elem::Float(FloatKind::F16);
    const F32: Elem = Elem::Float(FloatKind::F32);

    fn op(elem: Elem, out: Elem, m: usize, n: usize, k: usize) -> TensorContractionOp {
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

    /// Compiler reporting a fixed shared memory usage.
    struct FixedCompiler {
        shared_mem_bytes: usize,
        options: Option<CompilationOptions>,
    }

    impl KernelCompiler for FixedCompiler {
        type Representation = String;

        fn compile(
            &mut self,
            program: &KernelProgram,
            options: &CompilationOptions,
        ) -> Result<CompiledKernel<String>, CompilationError> {
            self.options = Some(*options);
            Ok(CompiledKernel {
                entrypoint_name: program.name.clone(),
                repr: program.to_string(),
                shared_mem_bytes: self.shared_mem_bytes,
            })
        }
    }

    struct FailingCompiler;

    impl KernelCompiler for FailingCompiler {
        type Representation = ();

        fn compile(
            &mut self,
            _program: &KernelProgram,
            _options: &CompilationOptions,
        ) -> Result<CompiledKernel<()>, CompilationError> {
            Err(CompilationError::Generic {
                reason: "out of registers".into(),
            })
        }
    }

    #[test]
    fn emission_is_deterministic() {
        let op = op(F16, F16, 300, 200, 100);
        let config = TilingConfig::new(64, 32, 32, 1, 3, 4);
        let device = DeviceProperties::default();
        let options = LoweringOptions::default();

        let first = emit_matmul("matmul", &op, &config, &device, &options).unwrap();
        let second = emit_matmul("matmul", &op, &config, &device, &options).unwrap();

        assert_eq!(first.program, second.program);
        assert_eq!(first.launch(), second.launch());
        assert_eq!(first.launch().grid, (5 * 7, 1, 1));
        assert_eq!(first.accumulation, FloatKind::F16);
        assert_eq!(first.index_width, IndexWidth::Narrow);
    }

    #[test]
    fn arguments_carry_the_alignment_hint() {
        let options = LoweringOptions {
            argument_alignment: 32,
            ..Default::default()
        };
        let kernel = emit_matmul(
            "matmul",
            &op(F16, F32, 64, 64, 64),
            &TilingConfig::new(32, 32, 32, 1, 1, 4),
            &DeviceProperties::default(),
            &options,
        )
        .unwrap();

        let args = kernel
            .program
            .args
            .iter()
            .map(|arg| (arg.value.ty, arg.divisibility))
            .collect::<Vec<_>>();
        assert_eq!(
            args,
            vec![
                (Type::pointer(F16), Some(32)),
                (Type::pointer(F16), Some(32)),
                (Type::pointer(F32), Some(32)),
            ]
        );
        assert_eq!(kernel.accumulation, FloatKind::F32);
    }

    #[test]
    fn complexity_is_checked_before_emission() {
        let err = emit_matmul(
            "matmul",
            &op(F16, F16, 1024, 1024, 1024),
            &TilingConfig::new(256, 256, 64, 1, 1, 4),
            &DeviceProperties::default(),
            &LoweringOptions::default(),
        )
        .unwrap_err();

        assert_eq!(
            err,
            MatmulLoweringError::ResourceExhausted(ResourceExhaustedError::ComplexityHeuristic {
                value: 24576,
                limit: 9000
            })
        );
    }

    #[test]
    fn measured_shared_memory_is_checked() {
        let mut compiler = FixedCompiler {
            shared_mem_bytes: 200_000,
            options: None,
        };
        let err = lower_matmul(
            "matmul",
            &op(F16, F16, 64, 64, 64),
            &TilingConfig::new(32, 32, 32, 1, 2, 4),
            &DeviceProperties::default(),
            &LoweringOptions::default(),
            &mut compiler,
        )
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Resource exhausted: shared memory size limit exceeded: 200000 > 98304"
        );
    }

    #[test]
    fn compiled_shared_memory_is_reported_in_launch() {
        let mut compiler = FixedCompiler {
            shared_mem_bytes: 8192,
            options: None,
        };
        let device = DeviceProperties {
            compute_capability: (9, 0),
            ..Default::default()
        };
        let lowered = lower_matmul(
            "matmul",
            &op(F16, F16, 64, 64, 64),
            &TilingConfig::new(32, 32, 32, 1, 2, 8),
            &device,
            &LoweringOptions::default(),
            &mut compiler,
        )
        .unwrap();

        assert_eq!(lowered.kernel.launch().shared_mem_bytes, 8192);
        assert_eq!(lowered.kernel.launch().block, (256, 1, 1));
        assert_eq!(lowered.compiled.entrypoint_name, "matmul");
        assert_eq!(
            compiler.options,
            Some(CompilationOptions {
                num_warps: 8,
                num_stages: 2,
                compute_capability: (9, 0),
            })
        );
    }

    #[test]
    fn compiler_errors_pass_through() {
        let err = lower_matmul(
            "matmul",
            &op(F16, F16, 64, 64, 64),
            &TilingConfig::new(32, 32, 32, 1, 2, 4),
            &DeviceProperties::default(),
            &LoweringOptions::default(),
            &mut FailingCompiler,
        )
        .unwrap_err();

        assert_eq!(
            err,
            MatmulLoweringError::Compilation(CompilationError::Generic {
                reason: "out of registers".into()
            })
        );
    }

    #[test]
    #[should_panic(expected = "split 1 times but the tiling expects 2")]
    fn split_factor_must_match_the_tiling() {
        let _ = emit_matmul(
            "matmul",
            &op(F16, F16, 64, 64, 64),
            &TilingConfig::new(32, 32, 32, 2, 2, 4),
            &DeviceProperties::default(),
            &LoweringOptions::default(),
        );
    }

    #[test]
    #[should_panic(expected = "at least one row of tiles")]
    fn empty_swizzle_groups_are_rejected() {
        let options = LoweringOptions {
            group_m: 0,
            ..Default::default()
        };
        let _ = emit_matmul(
            "matmul",
            &op(F16, F16, 64, 64, 64),
            &TilingConfig::new(32, 32, 32, 1, 2, 4),
            &DeviceProperties::default(),
            &options,
        );
    }
}
