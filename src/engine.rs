//! The dispatch engine.
//!
//! Owns the compute backend, the device registry and the program builder.
//! Sessions borrow the engine immutably, so the device and program cannot
//! change underneath a running session.

use std::collections::BTreeMap;

use log::info;

use crate::backend::ComputeApi;
use crate::config::EngineConfig;
use crate::device::{DeviceDescriptor, DeviceKind, DeviceRegistry};
use crate::error::Result;
use crate::program::{CompiledProgram, ProgramBuilder};
use crate::session::ExecutionSession;

/// Device selection and program state shared by all sessions.
///
/// # Example
///
/// ```
/// use harp_dispatch::backend::{HostApi, HostDevice, HostPlatform};
/// use harp_dispatch::{DeviceKind, Engine, EngineConfig, args};
///
/// let api = HostApi::new()
///     .with_platform(HostPlatform::new("Sim", "harp").with_device(HostDevice::cpu("cpu0", 2000, 4)))
///     .with_kernel("fill", |item| {
///         let n: i32 = item.arg(1)?;
///         let v: f32 = item.arg(2)?;
///         let i = item.global_id(0);
///         if (i as i32) < n {
///             item.store(0, i, v)?;
///         }
///         Ok(())
///     });
///
/// let config = EngineConfig::builder().device_kind(DeviceKind::Cpu).block_size(4).build();
/// let mut engine = Engine::new(api, config).unwrap();
/// engine.add_source("__kernel void fill(__global float *x, int n, float v) { }").unwrap();
///
/// let mut data = vec![0.0f32; 10];
/// {
///     let mut session = engine.session("fill").unwrap();
///     session.bind_buffer_rw("x", &mut data).unwrap();
///     session.bind_arguments(args![10i32, 7.0f32]).unwrap();
///     session.execute(10).unwrap();
///     session.read_buffer("x").unwrap();
/// }
/// assert!(data.iter().all(|&v| v == 7.0));
/// ```
pub struct Engine<A: ComputeApi> {
    api: A,
    config: EngineConfig,
    registry: DeviceRegistry<A>,
    builder: ProgramBuilder<A>,
}

impl<A: ComputeApi> Engine<A> {
    /// Validates `config` and selects the best device of the configured kind.
    pub fn new(api: A, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let registry = DeviceRegistry::new(&api, config.device_kind)?;
        registry.log_device_info();
        let builder = ProgramBuilder::new(config.block_size, config.build_options.clone())?;

        Ok(Self {
            api,
            config,
            registry,
            builder,
        })
    }

    /// [`Engine::new`] with [`EngineConfig::from_env`].
    pub fn from_env(api: A) -> Result<Self> {
        Self::new(api, EngineConfig::from_env()?)
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Current settings; block size and device kind follow later changes.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Descriptor of the active device
    pub fn device(&self) -> &DeviceDescriptor {
        self.registry.descriptor()
    }

    pub fn device_kind(&self) -> DeviceKind {
        self.registry.device_kind()
    }

    /// Platform ordinal → `"vendor/platform/device"` under the kind filter.
    pub fn enumerate(&self) -> Result<BTreeMap<usize, String>> {
        self.registry.enumerate(&self.api)
    }

    /// Rescans and activates the best device. The program becomes stale.
    pub fn select_best(&mut self) -> Result<&DeviceDescriptor> {
        self.registry.select_best(&self.api)
    }

    /// Activates the first matching device of platform `ordinal`.
    ///
    /// On `DeviceSelectionFailed` the active device is unchanged; on success
    /// the program becomes stale.
    pub fn select(&mut self, ordinal: usize) -> Result<&DeviceDescriptor> {
        self.registry.select(&self.api, ordinal)
    }

    /// Changes the filter used by later `enumerate`/`select*` calls.
    pub fn set_device_kind(&mut self, kind: DeviceKind) {
        self.registry.set_device_kind(kind);
        self.config.device_kind = kind;
    }

    /// Logs name, vendor and type of the active device.
    pub fn log_device_info(&self) {
        self.registry.log_device_info();
    }

    /// Appends kernel source and rebuilds the program.
    ///
    /// On `BuildFailure` the source stays appended and the program is stale.
    pub fn add_source(&mut self, text: &str) -> Result<()> {
        self.builder.add_source(text);
        self.build()
    }

    /// Compiles the accumulated source for the active device.
    ///
    /// Needed after a device change; skipped when the program is current.
    pub fn build(&mut self) -> Result<()> {
        self.builder.build(&self.api, &self.registry)
    }

    /// Changes the block size and rebuilds; rejected when zero.
    pub fn set_block_size(&mut self, block_size: usize) -> Result<()> {
        self.builder.set_block_size(block_size)?;
        self.config.block_size = block_size;
        self.build()
    }

    pub fn block_size(&self) -> usize {
        self.builder.block_size()
    }

    /// Replaces the compiler flags appended after `-DBLOCK_SIZE` and rebuilds.
    pub fn set_build_options(&mut self, options: Vec<String>) -> Result<()> {
        self.builder.set_build_options(options.clone());
        self.config.build_options = options;
        self.build()
    }

    /// Last successfully built program, possibly stale.
    pub fn program(&self) -> Option<&CompiledProgram<A>> {
        self.builder.program()
    }

    /// Whether a session could be created right now.
    pub fn is_program_current(&self) -> bool {
        self.builder.is_current(self.registry.generation())
    }

    /// Opens a session for kernel `name` of the current program.
    ///
    /// Fails with `ProgramNotBuilt`, `StaleProgram` or `KernelNotFound`.
    pub fn session<'h>(&self, name: &str) -> Result<ExecutionSession<'_, 'h, A>> {
        let program = self.builder.current(self.registry.generation())?;
        info!("session '{}' on {}", name, self.registry.descriptor());
        ExecutionSession::new(&self.api, &self.registry.active().device, program, name)
    }
}
