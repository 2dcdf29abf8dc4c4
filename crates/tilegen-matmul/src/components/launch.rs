use tilegen_ir::ProgramAxis;

use crate::components::{DeviceProperties, ResourceExhaustedError, TilingConfig};

/// Grid and block extents of one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchDimensions {
    pub grid: (u32, u32, u32),
    pub block: (u32, u32, u32),
    /// Shared memory reported by the kernel compiler, `0` until the kernel is compiled.
    pub shared_mem_bytes: usize,
}

impl LaunchDimensions {
    pub fn num_programs(&self) -> u64 {
        self.grid.0 as u64 * self.grid.1 as u64 * self.grid.2 as u64
    }
}

/// How tiles of the output are spread over the launch grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchGeometry {
    /// Tiles along m.
    pub grid_m: u32,
    /// Tiles along n.
    pub grid_n: u32,
    /// Axis enumerating the fused `grid_m * grid_n` tiles.
    pub tile_axis: ProgramAxis,
    /// Axis enumerating batches.
    pub batch_axis: ProgramAxis,
    pub dimensions: LaunchDimensions,
}

impl LaunchGeometry {
    /// Lay out `grid_m * grid_n` tiles, `batch_size` batches and `split_k` partial reductions
    /// over the three grid axes.
    ///
    /// Only the X axis is unbounded, so it receives the larger of the tile and batch counts.
    /// Split-k always uses the Z axis.
    pub fn new(
        m: usize,
        n: usize,
        batch_size: usize,
        config: &TilingConfig,
        device: &DeviceProperties,
    ) -> Result<Self, ResourceExhaustedError> {
        let limit = device.grid_yz_limit as u64;
        let grid_m = m.div_ceil(config.block_m as usize) as u64;
        let grid_n = n.div_ceil(config.block_n as usize) as u64;
        let tiles = grid_m * grid_n;
        let batches = batch_size as u64;

        if (tiles >= limit && batches >= limit) || tiles * batches >= limit * limit {
            return Err(ResourceExhaustedError::GridTotal {
                tiles,
                batches,
                limit,
            });
        }

        let (tile_axis, batch_axis, x, y) = if batches > tiles {
            (ProgramAxis::Y, ProgramAxis::X, batches, tiles)
        } else {
            (ProgramAxis::X, ProgramAxis::Y, tiles, batches)
        };
        // Program ids are signed 32-bit integers.
        if x > i32::MAX as u64 {
            return Err(ResourceExhaustedError::GridAxis {
                axis: ProgramAxis::X,
                requested: x,
                limit: i32::MAX as u64 + 1,
            });
        }
        if y >= limit {
            return Err(ResourceExhaustedError::GridAxis {
                axis: ProgramAxis::Y,
                requested: y,
                limit,
            });
        }
        if config.split_k as u64 >= limit {
            return Err(ResourceExhaustedError::GridAxis {
                axis: ProgramAxis::Z,
                requested: config.split_k as u64,
                limit,
            });
        }

        Ok(Self {
            grid_m: grid_m as u32,
            grid_n: grid_n as u32,
            tile_axis,
            batch_axis,
            dimensions: LaunchDimensions {
                grid: (x as u32, y as u32, config.split_k),
                block: (config.num_warps * device.warp_size, 1, 1),
                shared_mem_bytes: 0,
            },
        })
    }
}

/// Map a linear tile id to `(pid_m, pid_n)` so that consecutive ids walk groups of `group_m`
/// rows of tiles column by column.
///
/// This is the same mapping the emitted kernels compute from their program id.
///
/// # Panics
///
/// If `group_m` is zero.
pub fn swizzle(pid: u32, grid_m: u32, grid_n: u32, group_m: u32) -> (u32, u32) {
    assert!(group_m > 0, "A swizzle group holds at least one row of tiles");
    let width = group_m * grid_n;
    let group_id = pid / width;
    let first_pid_m = group_id * group_m;
    let group_size = (grid_m - first_pid_m).min(group_m);
    let pid_m = first_pid_m + pid % group_size;
    let pid_n = (pid % width) / group_size;

    (pid_m, pid_n)
}

#[cfg(test)]
mod tests {
    use hashbrown::HashSet;
    use pretty_assertions::assert_eq;

    use super::*;

    fn config() -> TilingConfig {
        TilingConfig::new(16, 16, 16, 1, 1, 4)
    }

    #[test]
    fn large_batch_goes_to_unbounded_axis() {
        let geometry =
            LaunchGeometry::new(5 * 16, 3 * 16, 70000, &config(), &DeviceProperties::default())
                .unwrap();

        assert_eq!(geometry.batch_axis, ProgramAxis::X);
        assert_eq!(geometry.tile_axis, ProgramAxis::Y);
        assert_eq!(geometry.dimensions.grid, (70000, 15, 1));
        assert_eq!(geometry.dimensions.block, (128, 1, 1));
    }

    #[test]
    fn tiles_go_to_unbounded_axis_by_default() {
        let geometry =
            LaunchGeometry::new(100, 200, 7, &config(), &DeviceProperties::default()).unwrap();

        assert_eq!(geometry.tile_axis, ProgramAxis::X);
        assert_eq!(geometry.dimensions.grid, (7 * 13, 7, 1));
    }

    #[test]
    fn both_axes_over_ceiling_fail() {
        let err = LaunchGeometry::new(
            70000 * 16,
            16,
            70000,
            &config(),
            &DeviceProperties::default(),
        )
        .unwrap_err();

        assert!(matches!(err, ResourceExhaustedError::GridTotal { .. }));
    }

    #[test]
    fn swizzle_is_a_bijection() {
        for (grid_m, grid_n) in [(1, 1), (5, 3), (8, 8), (17, 4), (3, 11)] {
            let mut seen = HashSet::new();
            for pid in 0..grid_m * grid_n {
                let (pid_m, pid_n) = swizzle(pid, grid_m, grid_n, 8);
                assert!(pid_m < grid_m && pid_n < grid_n);
                assert!(seen.insert((pid_m, pid_n)));
            }
            assert_eq!(seen.len() as u32, grid_m * grid_n);
        }
    }

    #[test]
    fn swizzle_walks_groups_column_by_column() {
        let order = (0..6).map(|pid| swizzle(pid, 2, 3, 8)).collect::<Vec<_>>();
        assert_eq!(order, vec![(0, 0), (1, 0), (0, 1), (1, 1), (0, 2), (1, 2)]);
    }

    #[test]
    #[should_panic(expected = "at least one row of tiles")]
    fn swizzle_requires_a_group() {
        swizzle(0, 2, 3, 0);
    }
}
