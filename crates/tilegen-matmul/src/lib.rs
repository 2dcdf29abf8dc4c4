//! Lowering of batched and strided matrix multiplications to tile-parallel kernel programs.
//!
//! The entry points are [emit_matmul](kernels::emit_matmul), which checks a
//! [tiling](components::TilingConfig) against the device budgets and emits a verified
//! [kernel program](tilegen_ir::KernelProgram), and [lower_matmul](kernels::lower_matmul), which
//! additionally runs a [kernel compiler](tilegen_ir::KernelCompiler).

#[macro_use]
extern crate derive_new;

/// Operation analysis, tiling validation and launch geometry.
pub mod components;
/// Global configuration.
pub mod config;
/// Kernel emission and the lowering entry points.
pub mod kernels;
/// Logging of lowered kernels.
pub mod logging;
