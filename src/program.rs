//! Program building.
//!
//! Kernel source accumulates across [`ProgramBuilder::add_source`] calls and is
//! compiled as one program for the active device. Anything that would change
//! the compiled binary (more source, another block size, another device)
//! makes the current program stale until the next successful build.

use log::{debug, info, trace, warn};

use crate::backend::ComputeApi;
use crate::config::compile_options;
use crate::device::DeviceRegistry;
use crate::error::{DispatchError, Result};

/// A program compiled for one device.
pub struct CompiledProgram<A: ComputeApi> {
    context: A::Context,
    program: A::Program,
    kernel_names: Vec<String>,
    block_size: usize,
    options: String,
    generation: u64,
}

impl<A: ComputeApi> CompiledProgram<A> {
    /// Context the program was built in
    pub fn context(&self) -> &A::Context {
        &self.context
    }

    /// Native program handle
    pub fn native(&self) -> &A::Program {
        &self.program
    }

    /// Kernels defined by the program, in runtime order
    pub fn kernel_names(&self) -> &[String] {
        &self.kernel_names
    }

    pub fn has_kernel(&self, name: &str) -> bool {
        self.kernel_names.iter().any(|k| k == name)
    }

    /// Block size baked in as `BLOCK_SIZE`
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Option string passed to the compiler
    pub fn options(&self) -> &str {
        &self.options
    }

    /// Device selection generation the program targets
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Accumulates kernel source and compiles it against the active device.
pub struct ProgramBuilder<A: ComputeApi> {
    source: String,
    block_size: usize,
    build_options: Vec<String>,
    compiled: Option<CompiledProgram<A>>,
    dirty: bool,
}

impl<A: ComputeApi> ProgramBuilder<A> {
    pub fn new(block_size: usize, build_options: Vec<String>) -> Result<Self> {
        if block_size == 0 {
            return Err(DispatchError::InvalidBlockSize(block_size));
        }
        Ok(Self {
            source: String::new(),
            block_size,
            build_options,
            compiled: None,
            dirty: false,
        })
    }

    /// Accumulated kernel source
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Appends kernel source; the program must be rebuilt afterwards.
    pub fn add_source(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.source.push_str(text);
        self.dirty = true;
    }

    /// Changes the block size; the program must be rebuilt afterwards.
    pub fn set_block_size(&mut self, block_size: usize) -> Result<()> {
        if block_size == 0 {
            return Err(DispatchError::InvalidBlockSize(block_size));
        }
        if block_size != self.block_size {
            self.block_size = block_size;
            self.dirty = true;
        }
        Ok(())
    }

    /// Replaces the extra compiler flags; the program must be rebuilt afterwards.
    pub fn set_build_options(&mut self, options: Vec<String>) {
        if options != self.build_options {
            self.build_options = options;
            self.dirty = true;
        }
    }

    /// Compiler option string for the current settings
    pub fn options(&self) -> String {
        compile_options(self.block_size, &self.build_options)
    }

    /// Last successfully built program, possibly stale.
    pub fn program(&self) -> Option<&CompiledProgram<A>> {
        self.compiled.as_ref()
    }

    /// Whether the last build matches the current source, options and device.
    pub fn is_current(&self, generation: u64) -> bool {
        match &self.compiled {
            Some(p) => !self.dirty && p.generation == generation,
            None => false,
        }
    }

    /// The program, provided it is up to date for `generation`.
    pub fn current(&self, generation: u64) -> Result<&CompiledProgram<A>> {
        let program = self.compiled.as_ref().ok_or(DispatchError::ProgramNotBuilt)?;
        if self.dirty || program.generation != generation {
            return Err(DispatchError::StaleProgram);
        }
        Ok(program)
    }

    /// Compiles the accumulated source for the registry's active device.
    ///
    /// An empty source is a no-op. An up-to-date program is not rebuilt. On
    /// failure the previous program (if any) stays in place but remains stale.
    pub fn build(&mut self, api: &A, registry: &DeviceRegistry<A>) -> Result<()> {
        if self.source.trim().is_empty() {
            warn!("kernel source is empty, nothing to build");
            return Ok(());
        }

        let generation = registry.generation();
        if self.is_current(generation) {
            debug!("program is up to date, skipping build");
            return Ok(());
        }

        let device = registry.active();
        let options = self.options();
        info!("building program for {} with '{}'", device.descriptor, options);

        let context = api.create_context(&device.device)?;
        let program = api.build_program(&context, &self.source, &options)?;
        let kernel_names = api.kernel_names(&program)?;
        for name in &kernel_names {
            trace!("kernel: {}", name);
        }
        debug!("program built, {} kernel(s)", kernel_names.len());

        self.compiled = Some(CompiledProgram {
            context,
            program,
            kernel_names,
            block_size: self.block_size,
            options,
            generation,
        });
        self.dirty = false;
        Ok(())
    }
}
