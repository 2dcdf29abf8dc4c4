use serde::{Deserialize, Serialize};

/// Hardware limits of the device a kernel is lowered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Shared memory a single block may use, in bytes.
    pub shared_memory_per_block: usize,
    /// Exclusive ceiling on the number of blocks along the Y and Z grid axes.
    pub grid_yz_limit: u32,
    /// Number of threads in a warp.
    pub warp_size: u32,
    /// `(major, minor)` compute capability.
    pub compute_capability: (u32, u32),
}

impl DeviceProperties {
    pub fn new(shared_memory_per_block: usize) -> Self {
        Self {
            shared_memory_per_block,
            ..Default::default()
        }
    }
}

impl Default for DeviceProperties {
    fn default() -> Self {
        Self {
            shared_memory_per_block: 98304,
            grid_yz_limit: 65536,
            warp_size: 32,
            compute_capability: (8, 0),
        }
    }
}
