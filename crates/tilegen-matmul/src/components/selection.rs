use core::fmt::Display;

use serde::{Deserialize, Serialize};

/// Tiling of one matmul kernel.
///
/// Configurations are supplied by the caller, typically an autotuner trying several of them and
/// keeping the fastest one that lowers successfully.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilingConfig {
    pub block_m: u32,
    pub block_n: u32,
    pub block_k: u32,
    pub split_k: u32,
    pub num_stages: u32,
    pub num_warps: u32,
}

impl TilingConfig {
    /// Smallest block extent the emitted dot supports.
    pub const MIN_BLOCK_SIZE: u32 = 16;

    /// Assert the structural requirements every configuration must meet.
    pub fn assert_valid(&self) {
        assert!(
            self.block_m >= Self::MIN_BLOCK_SIZE
                && self.block_n >= Self::MIN_BLOCK_SIZE
                && self.block_k >= Self::MIN_BLOCK_SIZE,
            "Block sizes must be at least {}, got {self}",
            Self::MIN_BLOCK_SIZE
        );
        assert!(self.num_warps > 0, "At least one warp is required, got {self}");
        assert!(self.num_stages >= 1, "At least one stage is required, got {self}");
        assert!(self.split_k >= 1, "Split-k must be at least 1, got {self}");
    }

    /// Distance along the reduction axis between two iterations of the reduction loop.
    pub fn step_k(&self) -> u32 {
        self.block_k * self.split_k
    }
}

impl Display for TilingConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "block_m: {} block_n: {} block_k: {} split_k: {} num_stages: {} num_warps: {}",
            self.block_m, self.block_n, self.block_k, self.split_k, self.num_stages, self.num_warps
        )
    }
}
