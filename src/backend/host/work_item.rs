//! Per-work-item view handed to host kernel implementations.

use std::collections::HashMap;

use bytemuck::Pod;

use super::memory::{HostArg, HostMem};
use crate::error::{DispatchError, Result};
use crate::geometry::LaunchGeometry;

fn fault(message: String) -> DispatchError {
    DispatchError::native("host kernel", message)
}

/// One work-item of a host kernel launch.
///
/// Mirrors the OpenCL C built-ins a kernel body needs: global ids and sizes,
/// scalar arguments, buffer loads/stores and image reads/writes.
pub struct WorkItem<'a> {
    pub(super) global_id: [usize; 2],
    pub(super) geometry: &'a LaunchGeometry,
    pub(super) args: &'a [HostArg],
    pub(super) defines: &'a HashMap<String, String>,
}

impl<'a> WorkItem<'a> {
    /// `get_global_id(dim)`
    pub fn global_id(&self, dim: usize) -> usize {
        if dim < self.geometry.dims() as usize {
            self.global_id[dim]
        } else {
            0
        }
    }

    /// `get_global_size(dim)`
    pub fn global_size(&self, dim: usize) -> usize {
        self.geometry.global().get(dim).copied().unwrap_or(1)
    }

    /// `get_local_size(dim)`
    pub fn local_size(&self, dim: usize) -> usize {
        self.geometry.local().get(dim).copied().unwrap_or(1)
    }

    /// Value of a `-D` macro passed at build time
    pub fn define(&self, name: &str) -> Option<&str> {
        self.defines.get(name).map(String::as_str)
    }

    /// Scalar argument at `slot`.
    pub fn arg<T: Pod>(&self, slot: usize) -> Result<T> {
        match self.args.get(slot) {
            Some(HostArg::Scalar(bytes)) if bytes.len() == std::mem::size_of::<T>() => {
                Ok(bytemuck::pod_read_unaligned(bytes))
            }
            Some(HostArg::Scalar(bytes)) => Err(fault(format!(
                "argument {} is {} bytes, read as {} bytes",
                slot,
                bytes.len(),
                std::mem::size_of::<T>()
            ))),
            Some(HostArg::Mem(_)) => Err(fault(format!("argument {} is a memory object", slot))),
            None => Err(fault(format!("argument {} does not exist", slot))),
        }
    }

    fn mem(&self, slot: usize) -> Result<&HostMem> {
        match self.args.get(slot) {
            Some(HostArg::Mem(mem)) => Ok(mem),
            Some(HostArg::Scalar(_)) => Err(fault(format!("argument {} is not a memory object", slot))),
            None => Err(fault(format!("argument {} does not exist", slot))),
        }
    }

    /// Number of `T` elements in the buffer at `slot`.
    pub fn len<T: Pod>(&self, slot: usize) -> Result<usize> {
        Ok(self.mem(slot)?.size() / std::mem::size_of::<T>())
    }

    /// `buffer[index]`
    pub fn load<T: Pod>(&self, slot: usize, index: usize) -> Result<T> {
        let mem = self.mem(slot)?;
        if !mem.access().kernel_readable() {
            return Err(fault(format!("argument {} is write-only", slot)));
        }
        let size = std::mem::size_of::<T>();
        let start = index * size;
        let bytes = mem.bytes();
        bytes
            .get(start..start + size)
            .map(bytemuck::pod_read_unaligned)
            .ok_or_else(|| {
                fault(format!(
                    "out-of-bounds read: argument {}, index {} (len {})",
                    slot,
                    index,
                    bytes.len() / size
                ))
            })
    }

    /// `buffer[index] = value`
    pub fn store<T: Pod>(&self, slot: usize, index: usize, value: T) -> Result<()> {
        let mem = self.mem(slot)?;
        if !mem.access().kernel_writable() {
            return Err(fault(format!("argument {} is read-only", slot)));
        }
        let size = std::mem::size_of::<T>();
        let start = index * size;
        let mut bytes = mem.bytes_mut();
        let len = bytes.len() / size;
        match bytes.get_mut(start..start + size) {
            Some(dst) => {
                dst.copy_from_slice(bytemuck::bytes_of(&value));
                Ok(())
            }
            None => Err(fault(format!(
                "out-of-bounds write: argument {}, index {} (len {})",
                slot, index, len
            ))),
        }
    }

    /// `read_imagef` with a clamp-to-edge, unnormalised, nearest sampler.
    pub fn read_imagef(&self, slot: usize, x: i64, y: i64) -> Result<f32> {
        let mem = self.mem(slot)?;
        let [width, height] = mem
            .image_extent()
            .ok_or_else(|| fault(format!("argument {} is not an image", slot)))?;
        if !mem.access().kernel_readable() {
            return Err(fault(format!("image argument {} is write-only", slot)));
        }
        let x = x.clamp(0, width as i64 - 1) as usize;
        let y = y.clamp(0, height as i64 - 1) as usize;
        let start = (y * width + x) * 4;
        let bytes = mem.bytes();
        Ok(bytemuck::pod_read_unaligned(&bytes[start..start + 4]))
    }

    /// `write_imagef`; writes outside the image are dropped.
    pub fn write_imagef(&self, slot: usize, x: usize, y: usize, value: f32) -> Result<()> {
        let mem = self.mem(slot)?;
        let [width, height] = mem
            .image_extent()
            .ok_or_else(|| fault(format!("argument {} is not an image", slot)))?;
        if !mem.access().kernel_writable() {
            return Err(fault(format!("image argument {} is read-only", slot)));
        }
        if x < width && y < height {
            let start = (y * width + x) * 4;
            mem.bytes_mut()[start..start + 4].copy_from_slice(&value.to_ne_bytes());
        }
        Ok(())
    }
}
