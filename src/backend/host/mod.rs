//! In-process reference runtime.
//!
//! `HostApi` simulates a set of platforms and devices and runs kernels on the
//! calling thread. Kernel *source* is still scanned for `__kernel`
//! declarations so names, parameter counts and build errors behave like a
//! real compiler; kernel *bodies* are Rust closures registered by name and
//! invoked once per work-item.
//!
//! It enforces the runtime rules the engine relies on: every argument slot set
//! before launch, global size divisible by local size, non-empty allocations,
//! in-bounds transfers and memory accesses.
//!
//! # Example
//!
//! ```
//! use harp_dispatch::backend::{HostApi, HostDevice, HostPlatform};
//!
//! let api = HostApi::new()
//!     .with_platform(
//!         HostPlatform::new("Host Runtime", "harp").with_device(HostDevice::cpu("cpu0", 2400, 8)),
//!     )
//!     .with_kernel("scale", |item| {
//!         let i = item.global_id(0);
//!         let n: i32 = item.arg(1)?;
//!         if (i as i32) < n {
//!             let v: f32 = item.load(0, i)?;
//!             item.store(0, i, v * 2.0)?;
//!         }
//!         Ok(())
//!     });
//! assert_eq!(api.stats().launches(), 0);
//! ```

mod memory;
mod source;
mod work_item;

pub use memory::HostMem;
pub use source::{KernelDecl, parse_defines, scan_kernels};
pub use work_item::WorkItem;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace};

use self::memory::HostArg;
use super::{ComputeApi, MemAccess};
use crate::arg::ArgValue;
use crate::device::{DeviceInfo, DeviceKind, PlatformInfo};
use crate::error::{DispatchError, Result};
use crate::geometry::LaunchGeometry;

/// Body of a host kernel, called once per work-item.
pub type HostKernelFn = Rc<dyn Fn(&WorkItem<'_>) -> Result<()>>;

/// A simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDevice {
    pub name: String,
    pub vendor: String,
    pub kind: DeviceKind,
    /// Clock frequency in MHz
    pub clock_mhz: u32,
    pub compute_units: u32,
}

impl HostDevice {
    pub fn new(
        name: impl Into<String>,
        vendor: impl Into<String>,
        kind: DeviceKind,
        clock_mhz: u32,
        compute_units: u32,
    ) -> Self {
        Self {
            name: name.into(),
            vendor: vendor.into(),
            kind,
            clock_mhz,
            compute_units,
        }
    }

    /// GPU device with the given vendor string
    pub fn gpu(name: impl Into<String>, vendor: impl Into<String>, clock_mhz: u32, compute_units: u32) -> Self {
        Self::new(name, vendor, DeviceKind::Gpu, clock_mhz, compute_units)
    }

    /// CPU device with a generic vendor
    pub fn cpu(name: impl Into<String>, clock_mhz: u32, compute_units: u32) -> Self {
        Self::new(name, "Host", DeviceKind::Cpu, clock_mhz, compute_units)
    }
}

/// A simulated platform exposing zero or more devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    pub name: String,
    pub vendor: String,
    pub devices: Vec<HostDevice>,
}

impl HostPlatform {
    pub fn new(name: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vendor: vendor.into(),
            devices: Vec::new(),
        }
    }

    pub fn with_device(mut self, device: HostDevice) -> Self {
        self.devices.push(device);
        self
    }
}

#[derive(Default)]
struct StatsInner {
    builds: Cell<usize>,
    launches: Cell<usize>,
    work_items: Cell<usize>,
    flushes: Cell<usize>,
    finishes: Cell<usize>,
    transfers: Cell<usize>,
    last_options: RefCell<String>,
}

/// Counters observed by the host runtime, shared between clones.
#[derive(Clone, Default)]
pub struct HostStats(Rc<StatsInner>);

impl HostStats {
    fn bump(cell: &Cell<usize>, by: usize) {
        cell.set(cell.get() + by);
    }

    /// Successful program builds
    pub fn builds(&self) -> usize {
        self.0.builds.get()
    }

    /// Kernel launches
    pub fn launches(&self) -> usize {
        self.0.launches.get()
    }

    /// Work-items executed over all launches
    pub fn work_items(&self) -> usize {
        self.0.work_items.get()
    }

    pub fn flushes(&self) -> usize {
        self.0.flushes.get()
    }

    /// Queue drains (`finish` calls)
    pub fn finishes(&self) -> usize {
        self.0.finishes.get()
    }

    /// Host/device transfers, including copy-on-create images
    pub fn transfers(&self) -> usize {
        self.0.transfers.get()
    }

    /// Build options of the most recent build
    pub fn last_options(&self) -> String {
        self.0.last_options.borrow().clone()
    }
}

/// Platform handle: index into the configured platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPlatformId(usize);

/// Device handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostDeviceId {
    platform: usize,
    device: usize,
}

/// Context bound to a single device
#[derive(Debug)]
pub struct HostContext {
    device: HostDeviceId,
}

/// Compiled host program
pub struct HostProgram {
    kernels: Vec<KernelDecl>,
    bodies: HashMap<String, HostKernelFn>,
    defines: Rc<HashMap<String, String>>,
}

/// Kernel object with its argument slot table
pub struct HostKernel {
    name: String,
    body: HostKernelFn,
    defines: Rc<HashMap<String, String>>,
    args: Vec<Option<HostArg>>,
}

/// Command queue; commands run synchronously at enqueue time
#[derive(Debug)]
pub struct HostQueue {
    device: HostDeviceId,
}

/// In-process compute runtime.
#[derive(Clone, Default)]
pub struct HostApi {
    platforms: Vec<HostPlatform>,
    kernels: HashMap<String, HostKernelFn>,
    stats: HostStats,
}

impl HostApi {
    /// Runtime without any platform
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platforms.push(platform);
        self
    }

    /// Registers the body of kernel `name`.
    pub fn with_kernel<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(&WorkItem<'_>) -> Result<()> + 'static,
    {
        self.register_kernel(name, body);
        self
    }

    /// Registers the body of kernel `name`, replacing any previous one.
    pub fn register_kernel<F>(&mut self, name: &str, body: F)
    where
        F: Fn(&WorkItem<'_>) -> Result<()> + 'static,
    {
        self.kernels.insert(name.to_string(), Rc::new(body));
    }

    /// Shared counters handle
    pub fn stats(&self) -> HostStats {
        self.stats.clone()
    }

    fn device(&self, id: HostDeviceId) -> Result<&HostDevice> {
        self.platforms
            .get(id.platform)
            .and_then(|p| p.devices.get(id.device))
            .ok_or_else(|| DispatchError::native("clGetDeviceInfo", "CL_INVALID_DEVICE"))
    }
}

impl ComputeApi for HostApi {
    type Platform = HostPlatformId;
    type Device = HostDeviceId;
    type Context = HostContext;
    type Program = HostProgram;
    type Kernel = HostKernel;
    type Queue = HostQueue;
    type Mem = HostMem;

    fn platforms(&self) -> Result<Vec<HostPlatformId>> {
        Ok((0..self.platforms.len()).map(HostPlatformId).collect())
    }

    fn platform_info(&self, platform: &HostPlatformId) -> Result<PlatformInfo> {
        let p = self
            .platforms
            .get(platform.0)
            .ok_or_else(|| DispatchError::native("clGetPlatformInfo", "CL_INVALID_PLATFORM"))?;
        Ok(PlatformInfo {
            name: p.name.clone(),
            vendor: p.vendor.clone(),
        })
    }

    fn devices(&self, platform: &HostPlatformId, kind: DeviceKind) -> Result<Vec<HostDeviceId>> {
        let p = self
            .platforms
            .get(platform.0)
            .ok_or_else(|| DispatchError::native("clGetDeviceIDs", "CL_INVALID_PLATFORM"))?;
        Ok(p.devices
            .iter()
            .enumerate()
            .filter(|(_, d)| kind.accepts(d.kind))
            .map(|(device, _)| HostDeviceId {
                platform: platform.0,
                device,
            })
            .collect())
    }

    fn device_info(&self, device: &HostDeviceId) -> Result<DeviceInfo> {
        let d = self.device(*device)?;
        Ok(DeviceInfo {
            name: d.name.clone(),
            vendor: d.vendor.clone(),
            kind: d.kind,
            max_clock_frequency: d.clock_mhz,
            max_compute_units: d.compute_units,
        })
    }

    fn create_context(&self, device: &HostDeviceId) -> Result<HostContext> {
        self.device(*device)?;
        Ok(HostContext { device: *device })
    }

    fn build_program(&self, context: &HostContext, source: &str, options: &str) -> Result<HostProgram> {
        debug!(
            "host build for {:?}: {} bytes, options '{}'",
            context.device,
            source.len(),
            options
        );

        let kernels = scan_kernels(source).map_err(|log| DispatchError::BuildFailure { log })?;

        let mut bodies = HashMap::new();
        let mut missing = Vec::new();
        for decl in &kernels {
            match self.kernels.get(&decl.name) {
                Some(body) => {
                    bodies.insert(decl.name.clone(), Rc::clone(body));
                }
                None => missing.push(format!(
                    "<source>: error: kernel '{}' has no host implementation",
                    decl.name
                )),
            }
        }
        if !missing.is_empty() {
            return Err(DispatchError::BuildFailure {
                log: missing.join("\n"),
            });
        }

        HostStats::bump(&self.stats.0.builds, 1);
        *self.stats.0.last_options.borrow_mut() = options.to_string();

        Ok(HostProgram {
            kernels,
            bodies,
            defines: Rc::new(parse_defines(options)),
        })
    }

    fn kernel_names(&self, program: &HostProgram) -> Result<Vec<String>> {
        Ok(program.kernels.iter().map(|k| k.name.clone()).collect())
    }

    fn create_kernel(&self, program: &HostProgram, name: &str) -> Result<HostKernel> {
        let decl = program
            .kernels
            .iter()
            .find(|k| k.name == name)
            .ok_or_else(|| DispatchError::native("clCreateKernel", "CL_INVALID_KERNEL_NAME"))?;
        let body = program
            .bodies
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::native("clCreateKernel", "CL_INVALID_KERNEL_DEFINITION"))?;

        Ok(HostKernel {
            name: decl.name.clone(),
            body,
            defines: Rc::clone(&program.defines),
            args: vec![None; decl.arg_count as usize],
        })
    }

    fn kernel_arg_count(&self, kernel: &HostKernel) -> Result<u32> {
        Ok(kernel.args.len() as u32)
    }

    fn set_arg(&self, kernel: &mut HostKernel, index: u32, value: &ArgValue) -> Result<()> {
        let slot = kernel
            .args
            .get_mut(index as usize)
            .ok_or_else(|| DispatchError::native("clSetKernelArg", "CL_INVALID_ARG_INDEX"))?;
        *slot = Some(HostArg::Scalar(value.as_bytes().into_owned()));
        Ok(())
    }

    fn set_arg_mem(&self, kernel: &mut HostKernel, index: u32, mem: &HostMem) -> Result<()> {
        let slot = kernel
            .args
            .get_mut(index as usize)
            .ok_or_else(|| DispatchError::native("clSetKernelArg", "CL_INVALID_ARG_INDEX"))?;
        *slot = Some(HostArg::Mem(mem.clone()));
        Ok(())
    }

    fn create_buffer(&self, _context: &HostContext, access: MemAccess, size: usize) -> Result<HostMem> {
        if size == 0 {
            return Err(DispatchError::native("clCreateBuffer", "CL_INVALID_BUFFER_SIZE"));
        }
        Ok(HostMem::buffer(access, size))
    }

    fn create_image(
        &self,
        _context: &HostContext,
        access: MemAccess,
        width: usize,
        height: usize,
        init: Option<&[f32]>,
    ) -> Result<HostMem> {
        if width == 0 || height == 0 {
            return Err(DispatchError::native("clCreateImage", "CL_INVALID_IMAGE_SIZE"));
        }
        if let Some(texels) = init {
            if texels.len() < width * height {
                return Err(DispatchError::native("clCreateImage", "CL_INVALID_HOST_PTR"));
            }
            HostStats::bump(&self.stats.0.transfers, 1);
        }
        Ok(HostMem::image(access, width, height, init))
    }

    fn create_queue(&self, context: &HostContext, device: &HostDeviceId) -> Result<HostQueue> {
        if context.device != *device {
            return Err(DispatchError::native("clCreateCommandQueue", "CL_INVALID_DEVICE"));
        }
        Ok(HostQueue { device: *device })
    }

    fn write_buffer(&self, _queue: &HostQueue, mem: &mut HostMem, data: &[u8]) -> Result<()> {
        let mut bytes = mem.bytes_mut();
        if data.len() > bytes.len() {
            return Err(DispatchError::native("clEnqueueWriteBuffer", "CL_INVALID_VALUE"));
        }
        bytes[..data.len()].copy_from_slice(data);
        HostStats::bump(&self.stats.0.transfers, 1);
        Ok(())
    }

    fn read_buffer(&self, _queue: &HostQueue, mem: &HostMem, data: &mut [u8]) -> Result<()> {
        let bytes = mem.bytes();
        if data.len() > bytes.len() {
            return Err(DispatchError::native("clEnqueueReadBuffer", "CL_INVALID_VALUE"));
        }
        data.copy_from_slice(&bytes[..data.len()]);
        HostStats::bump(&self.stats.0.transfers, 1);
        Ok(())
    }

    fn write_image(
        &self,
        _queue: &HostQueue,
        mem: &mut HostMem,
        width: usize,
        height: usize,
        data: &[f32],
    ) -> Result<()> {
        if mem.image_extent() != Some([width, height]) || data.len() < width * height {
            return Err(DispatchError::native("clEnqueueWriteImage", "CL_INVALID_VALUE"));
        }
        mem.bytes_mut()
            .copy_from_slice(bytemuck::cast_slice(&data[..width * height]));
        HostStats::bump(&self.stats.0.transfers, 1);
        Ok(())
    }

    fn read_image(
        &self,
        _queue: &HostQueue,
        mem: &HostMem,
        width: usize,
        height: usize,
        data: &mut [f32],
    ) -> Result<()> {
        if mem.image_extent() != Some([width, height]) || data.len() < width * height {
            return Err(DispatchError::native("clEnqueueReadImage", "CL_INVALID_VALUE"));
        }
        let bytes = mem.bytes();
        for (dst, src) in data[..width * height].iter_mut().zip(bytes.chunks_exact(4)) {
            *dst = bytemuck::pod_read_unaligned(src);
        }
        HostStats::bump(&self.stats.0.transfers, 1);
        Ok(())
    }

    fn enqueue_kernel(&self, queue: &HostQueue, kernel: &HostKernel, geometry: &LaunchGeometry) -> Result<()> {
        let global = geometry.global();
        let local = geometry.local();

        if global.iter().any(|&g| g == 0) {
            return Err(DispatchError::native("clEnqueueNDRangeKernel", "CL_INVALID_GLOBAL_WORK_SIZE"));
        }
        if global.iter().zip(local).any(|(&g, &l)| l == 0 || g % l != 0) {
            return Err(DispatchError::native("clEnqueueNDRangeKernel", "CL_INVALID_WORK_GROUP_SIZE"));
        }

        let args: Vec<HostArg> = kernel
            .args
            .iter()
            .cloned()
            .collect::<Option<_>>()
            .ok_or_else(|| DispatchError::native("clEnqueueNDRangeKernel", "CL_INVALID_KERNEL_ARGS"))?;

        trace!(
            "host launch '{}' on {:?}: global {:?}, local {:?}",
            kernel.name, queue.device, global, local
        );

        let height = if geometry.dims() == 2 { global[1] } else { 1 };
        for y in 0..height {
            for x in 0..global[0] {
                let item = WorkItem {
                    global_id: [x, y],
                    geometry,
                    args: &args,
                    defines: &kernel.defines,
                };
                (kernel.body)(&item)?;
            }
        }

        HostStats::bump(&self.stats.0.launches, 1);
        HostStats::bump(&self.stats.0.work_items, geometry.work_items());
        Ok(())
    }

    fn flush(&self, _queue: &HostQueue) -> Result<()> {
        HostStats::bump(&self.stats.0.flushes, 1);
        Ok(())
    }

    fn finish(&self, _queue: &HostQueue) -> Result<()> {
        HostStats::bump(&self.stats.0.finishes, 1);
        Ok(())
    }
}
