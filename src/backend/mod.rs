//! Compute API abstraction.
//!
//! The engine talks to devices only through [`ComputeApi`]. Two
//! implementations are provided:
//! - **host**: in-process reference runtime, kernels are Rust closures
//! - **opencl**: native OpenCL through `opencl3` (feature: `opencl`)

pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;

pub use host::{HostApi, HostDevice, HostPlatform, HostStats, WorkItem};
#[cfg(feature = "opencl")]
pub use opencl::OpenClApi;

use crate::arg::ArgValue;
use crate::device::{DeviceInfo, DeviceKind, PlatformInfo};
use crate::error::Result;
use crate::geometry::LaunchGeometry;

/// Kernel-side access of a device allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemAccess {
    #[default]
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

impl MemAccess {
    /// Whether kernels may read the allocation
    pub fn kernel_readable(&self) -> bool {
        !matches!(self, MemAccess::WriteOnly)
    }

    /// Whether kernels may write the allocation
    pub fn kernel_writable(&self) -> bool {
        !matches!(self, MemAccess::ReadOnly)
    }
}

/// Native compute API.
///
/// Mirrors the subset of the OpenCL host API the engine relies on. Transfers
/// are blocking; `enqueue_kernel` may return before the kernel completes.
pub trait ComputeApi {
    type Platform;
    type Device: Clone;
    type Context;
    type Program;
    type Kernel;
    type Queue;
    type Mem;

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// All platforms, in runtime enumeration order.
    fn platforms(&self) -> Result<Vec<Self::Platform>>;

    fn platform_info(&self, platform: &Self::Platform) -> Result<PlatformInfo>;

    /// Devices of `kind` on `platform`; empty when none match.
    fn devices(&self, platform: &Self::Platform, kind: DeviceKind) -> Result<Vec<Self::Device>>;

    fn device_info(&self, device: &Self::Device) -> Result<DeviceInfo>;

    // ------------------------------------------------------------------
    // Programs and kernels
    // ------------------------------------------------------------------

    fn create_context(&self, device: &Self::Device) -> Result<Self::Context>;

    /// Compiles `source` for the context's device.
    ///
    /// Compile errors are reported as `BuildFailure` carrying the build log.
    fn build_program(
        &self,
        context: &Self::Context,
        source: &str,
        options: &str,
    ) -> Result<Self::Program>;

    fn kernel_names(&self, program: &Self::Program) -> Result<Vec<String>>;

    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel>;

    /// Number of parameters the kernel declares.
    fn kernel_arg_count(&self, kernel: &Self::Kernel) -> Result<u32>;

    fn set_arg(&self, kernel: &mut Self::Kernel, index: u32, value: &ArgValue) -> Result<()>;

    fn set_arg_mem(&self, kernel: &mut Self::Kernel, index: u32, mem: &Self::Mem) -> Result<()>;

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    fn create_buffer(&self, context: &Self::Context, access: MemAccess, size: usize)
    -> Result<Self::Mem>;

    /// Single-channel `f32` image. `init`, when given, is copied in at creation.
    fn create_image(
        &self,
        context: &Self::Context,
        access: MemAccess,
        width: usize,
        height: usize,
        init: Option<&[f32]>,
    ) -> Result<Self::Mem>;

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    fn create_queue(&self, context: &Self::Context, device: &Self::Device) -> Result<Self::Queue>;

    fn write_buffer(&self, queue: &Self::Queue, mem: &mut Self::Mem, data: &[u8]) -> Result<()>;

    fn read_buffer(&self, queue: &Self::Queue, mem: &Self::Mem, data: &mut [u8]) -> Result<()>;

    fn write_image(
        &self,
        queue: &Self::Queue,
        mem: &mut Self::Mem,
        width: usize,
        height: usize,
        data: &[f32],
    ) -> Result<()>;

    fn read_image(
        &self,
        queue: &Self::Queue,
        mem: &Self::Mem,
        width: usize,
        height: usize,
        data: &mut [f32],
    ) -> Result<()>;

    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        geometry: &LaunchGeometry,
    ) -> Result<()>;

    fn flush(&self, queue: &Self::Queue) -> Result<()>;

    /// Blocks until every command enqueued on `queue` has completed.
    fn finish(&self, queue: &Self::Queue) -> Result<()>;
}
