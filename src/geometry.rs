//! Launch geometry: rounding work sizes up to whole work-groups.

use crate::error::{DispatchError, Result};

/// Rounds `n` up to the next multiple of `block`.
///
/// `round_up(0, b) == Some(0)`. `None` when the multiple does not fit in a
/// `usize`. `block` must be non-zero.
pub fn round_up(n: usize, block: usize) -> Option<usize> {
    n.div_ceil(block).checked_mul(block)
}

fn global_size(n: usize, block: usize) -> Result<usize> {
    round_up(n, block).ok_or_else(oversized)
}

fn oversized() -> DispatchError {
    DispatchError::native("clEnqueueNDRangeKernel", "CL_INVALID_GLOBAL_WORK_SIZE")
}

/// Global and local work sizes of an ND-range launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    dims: u32,
    global: [usize; 2],
    local: [usize; 2],
}

impl LaunchGeometry {
    /// 1-D launch over `total` work-items, tiled by `block`.
    ///
    /// Fails with `CL_INVALID_GLOBAL_WORK_SIZE` when the rounded size
    /// overflows.
    pub fn linear(total: usize, block: usize) -> Result<Self> {
        Ok(Self {
            dims: 1,
            global: [global_size(total, block)?, 1],
            local: [block, 1],
        })
    }

    /// 2-D launch over `[width, height]`, tiled by `block × block`.
    ///
    /// Either rounded axis, or their product, overflowing is rejected like
    /// [`LaunchGeometry::linear`].
    pub fn planar(range: [usize; 2], block: usize) -> Result<Self> {
        let global = [global_size(range[0], block)?, global_size(range[1], block)?];
        global[0].checked_mul(global[1]).ok_or_else(oversized)?;
        Ok(Self {
            dims: 2,
            global,
            local: [block, block],
        })
    }

    /// Work dimension (1 or 2)
    pub fn dims(&self) -> u32 {
        self.dims
    }

    /// Global work size per used axis
    pub fn global(&self) -> &[usize] {
        &self.global[..self.dims as usize]
    }

    /// Local work size per used axis
    pub fn local(&self) -> &[usize] {
        &self.local[..self.dims as usize]
    }

    /// Total number of launched work-items
    pub fn work_items(&self) -> usize {
        self.global().iter().product()
    }

    /// Whether the launch covers no work-item at all
    pub fn is_empty(&self) -> bool {
        self.global().contains(&0)
    }
}
