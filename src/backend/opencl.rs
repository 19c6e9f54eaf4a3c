//! Native OpenCL backend.
//!
//! Thin mapping of [`ComputeApi`] onto `opencl3`, with the `cl3` release it
//! is built on for the calls the safe wrappers do not cover (raw argument
//! bytes). Every native failure is
//! reported as `NativeApi` naming the OpenCL entry point; compile failures
//! become `BuildFailure` with the program build log.

#![cfg(feature = "opencl")]

use std::ffi::c_void;
use std::ptr;

use cl3::memory::{CL_FLOAT, CL_MEM_OBJECT_IMAGE2D, CL_R};
use log::{debug, trace};
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU, Device,
};
use opencl3::error_codes::{CL_DEVICE_NOT_FOUND, ClError};
use opencl3::kernel::{Kernel, create_program_kernels};
use opencl3::memory::{
    Buffer, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY, ClMem,
    Image,
};
use opencl3::platform::{Platform, get_platforms};
use opencl3::program::Program;
use opencl3::types::{
    CL_BLOCKING, cl_device_id, cl_device_type, cl_image_desc, cl_image_format, cl_mem_flags,
};

use super::{ComputeApi, MemAccess};
use crate::arg::ArgValue;
use crate::device::{DeviceInfo, DeviceKind, PlatformInfo};
use crate::error::{DispatchError, Result};
use crate::geometry::LaunchGeometry;

/// Device allocation: plain buffer or single-channel 2-D image
pub enum ClMemory {
    Buffer(Buffer<u8>),
    Image(Image),
}

impl ClMemory {
    fn raw(&self) -> opencl3::types::cl_mem {
        match self {
            ClMemory::Buffer(b) => b.get(),
            ClMemory::Image(i) => i.get(),
        }
    }
}

fn device_type(kind: DeviceKind) -> cl_device_type {
    match kind {
        DeviceKind::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceKind::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceKind::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceKind::All => CL_DEVICE_TYPE_ALL,
    }
}

fn device_kind(bits: cl_device_type) -> DeviceKind {
    if bits & CL_DEVICE_TYPE_GPU != 0 {
        DeviceKind::Gpu
    } else if bits & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceKind::Accelerator
    } else if bits & CL_DEVICE_TYPE_CPU != 0 {
        DeviceKind::Cpu
    } else {
        DeviceKind::All
    }
}

fn mem_flags(access: MemAccess) -> cl_mem_flags {
    match access {
        MemAccess::ReadWrite => CL_MEM_READ_WRITE,
        MemAccess::ReadOnly => CL_MEM_READ_ONLY,
        MemAccess::WriteOnly => CL_MEM_WRITE_ONLY,
    }
}

fn image_region(width: usize, height: usize) -> ([usize; 3], [usize; 3]) {
    ([0, 0, 0], [width, height, 1])
}

/// OpenCL through the system ICD loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenClApi;

impl OpenClApi {
    pub fn new() -> Self {
        Self
    }
}

impl ComputeApi for OpenClApi {
    type Platform = Platform;
    type Device = Device;
    type Context = Context;
    type Program = Program;
    type Kernel = Kernel;
    type Queue = CommandQueue;
    type Mem = ClMemory;

    fn platforms(&self) -> Result<Vec<Platform>> {
        get_platforms().map_err(|e| DispatchError::native("clGetPlatformIDs", e))
    }

    fn platform_info(&self, platform: &Platform) -> Result<PlatformInfo> {
        Ok(PlatformInfo {
            name: platform
                .name()
                .map_err(|e| DispatchError::native("clGetPlatformInfo", e))?,
            vendor: platform
                .vendor()
                .map_err(|e| DispatchError::native("clGetPlatformInfo", e))?,
        })
    }

    fn devices(&self, platform: &Platform, kind: DeviceKind) -> Result<Vec<Device>> {
        device_list(platform.get_devices(device_type(kind)))
    }

    fn device_info(&self, device: &Device) -> Result<DeviceInfo> {
        let query = |e: ClError| DispatchError::native("clGetDeviceInfo", e);
        Ok(DeviceInfo {
            name: device.name().map_err(query)?,
            vendor: device.vendor().map_err(query)?,
            kind: device_kind(device.dev_type().map_err(query)?),
            max_clock_frequency: device.max_clock_frequency().map_err(query)?,
            max_compute_units: device.max_compute_units().map_err(query)?,
        })
    }

    fn create_context(&self, device: &Device) -> Result<Context> {
        Context::from_device(device).map_err(|e| DispatchError::native("clCreateContext", e))
    }

    fn build_program(&self, context: &Context, source: &str, options: &str) -> Result<Program> {
        debug!("clBuildProgram: {} bytes, options '{}'", source.len(), options);
        Program::create_and_build_from_source(context, source, options)
            .map_err(|log| DispatchError::BuildFailure { log })
    }

    fn kernel_names(&self, program: &Program) -> Result<Vec<String>> {
        let kernels =
            create_program_kernels(program).map_err(|e| DispatchError::native("clCreateKernelsInProgram", e))?;
        kernels
            .iter()
            .map(|k| {
                k.function_name()
                    .map_err(|e| DispatchError::native("clGetKernelInfo", e))
            })
            .collect()
    }

    fn create_kernel(&self, program: &Program, name: &str) -> Result<Kernel> {
        Kernel::create(program, name).map_err(|e| DispatchError::native("clCreateKernel", e))
    }

    fn kernel_arg_count(&self, kernel: &Kernel) -> Result<u32> {
        kernel
            .num_args()
            .map_err(|e| DispatchError::native("clGetKernelInfo", e))
    }

    fn set_arg(&self, kernel: &mut Kernel, index: u32, value: &ArgValue) -> Result<()> {
        let bytes = value.as_bytes();
        // SAFETY: `bytes` outlives the call and its length is passed as the size.
        unsafe {
            cl3::kernel::set_kernel_arg(
                kernel.get(),
                index,
                bytes.len(),
                bytes.as_ptr() as *const c_void,
            )
        }
        .map_err(|code| DispatchError::native("clSetKernelArg", ClError(code)))
    }

    fn set_arg_mem(&self, kernel: &mut Kernel, index: u32, mem: &ClMemory) -> Result<()> {
        let raw = mem.raw();
        // SAFETY: a cl_mem handle is the documented argument type for memory objects.
        unsafe { kernel.set_arg(index, &raw) }.map_err(|e| DispatchError::native("clSetKernelArg", e))
    }

    fn create_buffer(&self, context: &Context, access: MemAccess, size: usize) -> Result<ClMemory> {
        // SAFETY: no host pointer is passed.
        let buffer = unsafe { Buffer::<u8>::create(context, mem_flags(access), size, ptr::null_mut()) }
            .map_err(|e| DispatchError::native("clCreateBuffer", e))?;
        Ok(ClMemory::Buffer(buffer))
    }

    fn create_image(
        &self,
        context: &Context,
        access: MemAccess,
        width: usize,
        height: usize,
        init: Option<&[f32]>,
    ) -> Result<ClMemory> {
        let format = cl_image_format {
            image_channel_order: CL_R,
            image_channel_data_type: CL_FLOAT,
        };
        let desc = cl_image_desc {
            image_type: CL_MEM_OBJECT_IMAGE2D,
            image_width: width,
            image_height: height,
            image_depth: 1,
            image_array_size: 1,
            image_row_pitch: 0,
            image_slice_pitch: 0,
            num_mip_levels: 0,
            num_samples: 0,
            buffer: ptr::null_mut(),
        };

        let (flags, host_ptr) = match init {
            Some(texels) => {
                if texels.len() < width * height {
                    return Err(DispatchError::native("clCreateImage", "CL_INVALID_HOST_PTR"));
                }
                (
                    mem_flags(access) | CL_MEM_COPY_HOST_PTR,
                    texels.as_ptr() as *mut c_void,
                )
            }
            None => (mem_flags(access), ptr::null_mut()),
        };

        // SAFETY: with COPY_HOST_PTR the runtime copies width*height texels
        // before returning; the slice was checked to hold that many.
        let image = unsafe { Image::create(context, flags, &format, &desc, host_ptr) }
            .map_err(|e| DispatchError::native("clCreateImage", e))?;
        Ok(ClMemory::Image(image))
    }

    fn create_queue(&self, context: &Context, _device: &Device) -> Result<CommandQueue> {
        CommandQueue::create_default(context, 0).map_err(|e| DispatchError::native("clCreateCommandQueue", e))
    }

    fn write_buffer(&self, queue: &CommandQueue, mem: &mut ClMemory, data: &[u8]) -> Result<()> {
        let ClMemory::Buffer(buffer) = mem else {
            return Err(DispatchError::native("clEnqueueWriteBuffer", "CL_INVALID_MEM_OBJECT"));
        };
        // SAFETY: blocking write, `data` is borrowed for the whole call.
        unsafe { queue.enqueue_write_buffer(buffer, CL_BLOCKING, 0, data, &[]) }
            .map_err(|e| DispatchError::native("clEnqueueWriteBuffer", e))?;
        Ok(())
    }

    fn read_buffer(&self, queue: &CommandQueue, mem: &ClMemory, data: &mut [u8]) -> Result<()> {
        let ClMemory::Buffer(buffer) = mem else {
            return Err(DispatchError::native("clEnqueueReadBuffer", "CL_INVALID_MEM_OBJECT"));
        };
        // SAFETY: blocking read into a live mutable slice.
        unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, 0, data, &[]) }
            .map_err(|e| DispatchError::native("clEnqueueReadBuffer", e))?;
        Ok(())
    }

    fn write_image(
        &self,
        queue: &CommandQueue,
        mem: &mut ClMemory,
        width: usize,
        height: usize,
        data: &[f32],
    ) -> Result<()> {
        let ClMemory::Image(image) = mem else {
            return Err(DispatchError::native("clEnqueueWriteImage", "CL_INVALID_MEM_OBJECT"));
        };
        if data.len() < width * height {
            return Err(DispatchError::native("clEnqueueWriteImage", "CL_INVALID_VALUE"));
        }
        let (origin, region) = image_region(width, height);
        // SAFETY: blocking write of width*height texels from a slice holding at least that many.
        unsafe {
            queue.enqueue_write_image(
                image,
                CL_BLOCKING,
                origin.as_ptr(),
                region.as_ptr(),
                0,
                0,
                data.as_ptr() as *mut c_void,
                &[],
            )
        }
        .map_err(|e| DispatchError::native("clEnqueueWriteImage", e))?;
        Ok(())
    }

    fn read_image(
        &self,
        queue: &CommandQueue,
        mem: &ClMemory,
        width: usize,
        height: usize,
        data: &mut [f32],
    ) -> Result<()> {
        let ClMemory::Image(image) = mem else {
            return Err(DispatchError::native("clEnqueueReadImage", "CL_INVALID_MEM_OBJECT"));
        };
        if data.len() < width * height {
            return Err(DispatchError::native("clEnqueueReadImage", "CL_INVALID_VALUE"));
        }
        let (origin, region) = image_region(width, height);
        // SAFETY: blocking read of width*height texels into a slice holding at least that many.
        unsafe {
            queue.enqueue_read_image(
                image,
                CL_BLOCKING,
                origin.as_ptr(),
                region.as_ptr(),
                0,
                0,
                data.as_mut_ptr() as *mut c_void,
                &[],
            )
        }
        .map_err(|e| DispatchError::native("clEnqueueReadImage", e))?;
        Ok(())
    }

    fn enqueue_kernel(&self, queue: &CommandQueue, kernel: &Kernel, geometry: &LaunchGeometry) -> Result<()> {
        trace!(
            "clEnqueueNDRangeKernel: global {:?}, local {:?}",
            geometry.global(),
            geometry.local()
        );
        // SAFETY: size arrays hold `dims` entries and outlive the call.
        unsafe {
            queue.enqueue_nd_range_kernel(
                kernel.get(),
                geometry.dims(),
                ptr::null(),
                geometry.global().as_ptr(),
                geometry.local().as_ptr(),
                &[],
            )
        }
        .map_err(|e| DispatchError::native("clEnqueueNDRangeKernel", e))?;
        Ok(())
    }

    fn flush(&self, queue: &CommandQueue) -> Result<()> {
        queue.flush().map_err(|e| DispatchError::native("clFlush", e))
    }

    fn finish(&self, queue: &CommandQueue) -> Result<()> {
        queue.finish().map_err(|e| DispatchError::native("clFinish", e))
    }
}

/// A platform without devices of the requested type reports
/// `CL_DEVICE_NOT_FOUND`; that is an empty list, not a failure.
fn device_list(ids: std::result::Result<Vec<cl_device_id>, ClError>) -> Result<Vec<Device>> {
    match ids {
        Ok(ids) => Ok(ids.into_iter().map(Device::new).collect()),
        Err(ClError(CL_DEVICE_NOT_FOUND)) => Ok(Vec::new()),
        Err(e) => Err(DispatchError::native("clGetDeviceIDs", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_bits() {
        assert_eq!(device_kind(CL_DEVICE_TYPE_GPU), DeviceKind::Gpu);
        assert_eq!(device_kind(CL_DEVICE_TYPE_CPU), DeviceKind::Cpu);
        assert_eq!(device_kind(CL_DEVICE_TYPE_ACCELERATOR), DeviceKind::Accelerator);
        assert_eq!(device_type(DeviceKind::All), CL_DEVICE_TYPE_ALL);
    }

    #[test]
    fn test_missing_devices_are_an_empty_list() {
        use opencl3::error_codes::CL_INVALID_PLATFORM;

        assert!(device_list(Err(ClError(CL_DEVICE_NOT_FOUND))).unwrap().is_empty());
        assert!(device_list(Ok(Vec::new())).unwrap().is_empty());
        match device_list(Err(ClError(CL_INVALID_PLATFORM))) {
            Err(DispatchError::NativeApi { operation, .. }) => assert_eq!(operation, "clGetDeviceIDs"),
            other => panic!("unexpected result: {:?}", other.map(|d| d.len())),
        }
    }

    #[test]
    fn test_platform_query() {
        let api = OpenClApi::new();
        match api.platforms() {
            Ok(platforms) => {
                for p in &platforms {
                    let info = api.platform_info(p).unwrap();
                    println!("OpenCL platform: {} ({})", info.name, info.vendor);
                }
            }
            Err(e) => println!("No OpenCL runtime available, skipping test: {}", e),
        }
    }
}
