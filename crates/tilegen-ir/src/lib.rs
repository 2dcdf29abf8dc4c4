//! Tile-level intermediate representation.
//!
//! A [kernel program](KernelProgram) is a function over pointer arguments executed by every
//! program instance of a launch grid. Its values are whole tiles: scalars, vectors and matrices
//! of a single element type.

#[macro_use]
extern crate derive_new;

mod builder;
mod compiler;
mod elem;
mod item;
mod kernel;
mod operation;
mod validation;
mod variable;

pub use builder::*;
pub use compiler::*;
pub use elem::*;
pub use item::*;
pub use kernel::*;
pub use operation::*;
pub use validation::*;
pub use variable::*;
