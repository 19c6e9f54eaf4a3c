//! Per-kernel execution session.
//!
//! A session owns a command queue and one kernel object. Arguments are bound
//! in slot order; buffers and images are registered under caller-chosen ids
//! so transfers can refer to them later. Host memory stays mutably borrowed
//! for the lifetime of the session.
//!
//! Dropping a session waits for its queue to drain.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytemuck::Pod;
use log::{debug, error, trace, warn};

use crate::arg::ArgValue;
use crate::backend::{ComputeApi, MemAccess};
use crate::error::{DispatchError, Result};
use crate::geometry::LaunchGeometry;
use crate::program::CompiledProgram;

/// Transfer direction of a bound image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDirection {
    /// Read-only for kernels, filled from host memory when bound
    In,
    /// Write-only for kernels, uninitialised until a kernel writes it
    Out,
}

/// A device allocation together with the host memory it mirrors.
enum ResourceBinding<'h, A: ComputeApi> {
    Buffer {
        mem: A::Mem,
        host: &'h mut [u8],
    },
    Image2D {
        mem: A::Mem,
        host: &'h mut [f32],
        width: usize,
        height: usize,
    },
}

impl<A: ComputeApi> ResourceBinding<'_, A> {
    fn kind(&self) -> &'static str {
        match self {
            ResourceBinding::Buffer { .. } => "buffer",
            ResourceBinding::Image2D { .. } => "image",
        }
    }
}

/// One kernel invocation context.
///
/// Created by [`Engine::session`](crate::Engine::session).
pub struct ExecutionSession<'e, 'h, A: ComputeApi> {
    api: &'e A,
    program: &'e CompiledProgram<A>,
    name: String,
    kernel: A::Kernel,
    queue: A::Queue,
    arg_count: u32,
    cursor: u32,
    resources: HashMap<String, ResourceBinding<'h, A>>,
}

impl<'e, 'h, A: ComputeApi> ExecutionSession<'e, 'h, A> {
    pub(crate) fn new(
        api: &'e A,
        device: &A::Device,
        program: &'e CompiledProgram<A>,
        name: &str,
    ) -> Result<Self> {
        if !program.has_kernel(name) {
            return Err(DispatchError::KernelNotFound {
                name: name.to_string(),
                available: program.kernel_names().to_vec(),
            });
        }

        let kernel = api.create_kernel(program.native(), name)?;
        let arg_count = api.kernel_arg_count(&kernel)?;
        let queue = api.create_queue(program.context(), device)?;
        debug!("session for '{}' ({} arguments)", name, arg_count);

        Ok(Self {
            api,
            program,
            name: name.to_string(),
            kernel,
            queue,
            arg_count,
            cursor: 0,
            resources: HashMap::new(),
        })
    }

    pub fn kernel_name(&self) -> &str {
        &self.name
    }

    /// Parameter count declared by the kernel
    pub fn arg_count(&self) -> u32 {
        self.arg_count
    }

    /// Next slot `bind_*` will fill
    pub fn argument_cursor(&self) -> u32 {
        self.cursor
    }

    /// Restarts slot assignment at 0; already set arguments keep their values.
    pub fn reset_argument_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Work-group edge length used for launches
    pub fn block_size(&self) -> usize {
        self.program.block_size()
    }

    /// Whether `id` is bound to a buffer or image
    pub fn is_bound(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    fn check_slot(&self, slot: u32) -> Result<()> {
        if slot >= self.arg_count {
            return Err(DispatchError::ArgumentSlotOutOfRange {
                slot,
                count: self.arg_count,
            });
        }
        Ok(())
    }

    /// Sets a value at an explicit slot. The cursor is not moved.
    pub fn set_argument(&mut self, slot: u32, value: impl Into<ArgValue>) -> Result<()> {
        self.check_slot(slot)?;
        let value = value.into();
        trace!("'{}' arg {} = {:?}", self.name, slot, value);
        self.api.set_arg(&mut self.kernel, slot, &value)
    }

    /// Sets a value at the cursor and advances it.
    pub fn bind_argument(&mut self, value: impl Into<ArgValue>) -> Result<()> {
        let slot = self.cursor;
        self.set_argument(slot, value)?;
        self.cursor += 1;
        Ok(())
    }

    /// Binds each value to successive slots, see [`args!`](crate::args).
    pub fn bind_arguments<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<ArgValue>,
    {
        for value in values {
            self.bind_argument(value)?;
        }
        Ok(())
    }

    /// Creates a device buffer mirroring `host` and binds it to the next slot.
    ///
    /// No data is copied; call [`write_buffer`](Self::write_buffer) to upload.
    pub fn bind_buffer<T: Pod>(&mut self, id: &str, host: &'h mut [T], access: MemAccess) -> Result<()> {
        let slot = self.cursor;
        self.check_slot(slot)?;

        let host: &'h mut [u8] = bytemuck::cast_slice_mut(host);
        let mem = self.api.create_buffer(self.program.context(), access, host.len())?;
        self.api.set_arg_mem(&mut self.kernel, slot, &mem)?;
        self.cursor += 1;

        debug!("'{}' arg {}: buffer [{}] ({} bytes, {:?})", self.name, slot, id, host.len(), access);
        self.insert(id, ResourceBinding::Buffer { mem, host });
        Ok(())
    }

    /// [`bind_buffer`](Self::bind_buffer) with read-write access.
    pub fn bind_buffer_rw<T: Pod>(&mut self, id: &str, host: &'h mut [T]) -> Result<()> {
        self.bind_buffer(id, host, MemAccess::ReadWrite)
    }

    /// Creates a single-channel `f32` image and binds it to the next slot.
    ///
    /// `In` images are read-only and filled from `host` immediately. `Out`
    /// images are write-only and start uninitialised.
    pub fn bind_image(
        &mut self,
        id: &str,
        host: &'h mut [f32],
        width: usize,
        height: usize,
        direction: ImageDirection,
    ) -> Result<()> {
        let slot = self.cursor;
        self.check_slot(slot)?;

        let expected = width * height;
        if host.len() < expected {
            return Err(DispatchError::ImageSizeMismatch {
                id: id.to_string(),
                expected,
                actual: host.len(),
            });
        }

        let context = self.program.context();
        let mem = match direction {
            ImageDirection::In => {
                self.api
                    .create_image(context, MemAccess::ReadOnly, width, height, Some(&host[..expected]))?
            }
            ImageDirection::Out => self.api.create_image(context, MemAccess::WriteOnly, width, height, None)?,
        };
        self.api.set_arg_mem(&mut self.kernel, slot, &mem)?;
        self.cursor += 1;

        debug!(
            "'{}' arg {}: image [{}] ({}x{}, {:?})",
            self.name, slot, id, width, height, direction
        );
        self.insert(
            id,
            ResourceBinding::Image2D {
                mem,
                host,
                width,
                height,
            },
        );
        Ok(())
    }

    fn insert(&mut self, id: &str, binding: ResourceBinding<'h, A>) {
        if let Some(old) = self.resources.insert(id.to_string(), binding) {
            debug!("[{}] rebound, previous {} released", id, old.kind());
        }
    }

    fn unknown(&self, id: &str, expected: &str) {
        let err = DispatchError::UnknownResourceId(id.to_string());
        match self.resources.get(id) {
            Some(binding) => warn!("{}: bound as {}, not {}; skipped", err, binding.kind(), expected),
            None => warn!("{}: skipped", err),
        }
    }

    /// Uploads the host buffer bound as `id`. Unknown ids are logged and skipped.
    pub fn write_buffer(&mut self, id: &str) -> Result<()> {
        match self.resources.get_mut(id) {
            Some(ResourceBinding::Buffer { mem, host }) => self.api.write_buffer(&self.queue, mem, host),
            _ => {
                self.unknown(id, "buffer");
                Ok(())
            }
        }
    }

    /// Downloads buffer `id` into its host memory. Unknown ids are logged and skipped.
    pub fn read_buffer(&mut self, id: &str) -> Result<()> {
        match self.resources.get_mut(id) {
            Some(ResourceBinding::Buffer { mem, host }) => self.api.read_buffer(&self.queue, mem, host),
            _ => {
                self.unknown(id, "buffer");
                Ok(())
            }
        }
    }

    /// Uploads the host texels bound as image `id`. Unknown ids are logged and skipped.
    pub fn write_image(&mut self, id: &str) -> Result<()> {
        match self.resources.get_mut(id) {
            Some(ResourceBinding::Image2D {
                mem,
                host,
                width,
                height,
            }) => self.api.write_image(&self.queue, mem, *width, *height, host),
            _ => {
                self.unknown(id, "image");
                Ok(())
            }
        }
    }

    /// Downloads image `id` into its host memory. Unknown ids are logged and skipped.
    pub fn read_image(&mut self, id: &str) -> Result<()> {
        match self.resources.get_mut(id) {
            Some(ResourceBinding::Image2D {
                mem,
                host,
                width,
                height,
            }) => self.api.read_image(&self.queue, mem, *width, *height, host),
            _ => {
                self.unknown(id, "image");
                Ok(())
            }
        }
    }

    /// Launches over `n` work-items rounded up to whole blocks.
    pub fn execute(&mut self, n: usize) -> Result<()> {
        self.launch(LaunchGeometry::linear(n, self.block_size())?)
    }

    /// Launches over a `[width, height]` range rounded up to whole blocks per axis.
    pub fn execute_2d(&mut self, range: [usize; 2]) -> Result<()> {
        self.launch(LaunchGeometry::planar(range, self.block_size())?)
    }

    /// [`execute`](Self::execute), then waits for the queue; returns the time
    /// from enqueue until the queue drained.
    pub fn execute_timed(&mut self, n: usize) -> Result<Duration> {
        self.launch_timed(LaunchGeometry::linear(n, self.block_size())?)
    }

    /// [`execute_2d`](Self::execute_2d), then waits for the queue.
    pub fn execute_2d_timed(&mut self, range: [usize; 2]) -> Result<Duration> {
        self.launch_timed(LaunchGeometry::planar(range, self.block_size())?)
    }

    /// Blocks until every enqueued command has completed.
    pub fn finish(&mut self) -> Result<()> {
        self.api.finish(&self.queue)
    }

    fn launch(&mut self, geometry: LaunchGeometry) -> Result<()> {
        if geometry.is_empty() {
            debug!("'{}': empty range, nothing to launch", self.name);
            return Ok(());
        }
        trace!(
            "'{}': launch global {:?}, local {:?}",
            self.name,
            geometry.global(),
            geometry.local()
        );
        self.api.flush(&self.queue)?;
        self.api.enqueue_kernel(&self.queue, &self.kernel, &geometry)?;
        self.api.flush(&self.queue)
    }

    fn launch_timed(&mut self, geometry: LaunchGeometry) -> Result<Duration> {
        let start = Instant::now();
        self.launch(geometry)?;
        self.finish()?;
        let elapsed = start.elapsed();
        debug!("'{}': {:?}", self.name, elapsed);
        Ok(elapsed)
    }
}

impl<A: ComputeApi> Drop for ExecutionSession<'_, '_, A> {
    fn drop(&mut self) {
        if let Err(e) = self.api.finish(&self.queue) {
            error!("'{}': queue did not drain: {}", self.name, e);
        }
    }
}
