mod analysis;
mod device;
mod error;
mod launch;
mod precision;
mod problem;
mod resource;
mod selection;

pub use analysis::*;
pub use device::*;
pub use error::*;
pub use launch::*;
pub use precision::*;
pub use problem::*;
pub use resource::*;
pub use selection::*;
