mod base;
mod compilation;
mod logger;
mod lowering;

pub use base::*;
pub use compilation::*;
pub use logger::*;
pub use lowering::*;
