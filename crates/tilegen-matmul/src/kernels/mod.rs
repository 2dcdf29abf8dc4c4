mod emitter;
mod index;
mod lowering;

pub use emitter::*;
pub use index::*;
pub use lowering::*;
