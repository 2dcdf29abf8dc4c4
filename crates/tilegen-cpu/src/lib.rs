//! Host reference executor for tile kernel programs.
//!
//! Every program instance of a launch grid is interpreted serially over [host buffers](HostBuffer),
//! failing on any unmasked access outside of a buffer. Slow, but exact enough to check the
//! addressing and numerics of emitted kernels.

#[macro_use]
extern crate derive_new;

mod buffer;
mod compiler;
mod error;
mod interpreter;
mod value;

pub use buffer::*;
pub use compiler::*;
pub use error::*;
pub use interpreter::*;
pub use value::Scalar;
