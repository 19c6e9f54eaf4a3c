//! Harp Dispatch: kernel dispatch for OpenCL-class compute devices
//!
//! Picks a device, compiles kernel source into a program, binds host memory
//! to device buffers and images, launches kernels over block-rounded ranges
//! and moves results back.
//!
//! # Architecture
//!
//! - **backend**: the [`ComputeApi`](backend::ComputeApi) seam and its
//!   implementations (host reference runtime, native OpenCL)
//! - **device**: platform scan, device scoring and selection
//! - **program**: source accumulation and program builds
//! - **session**: argument binding, transfers and launches for one kernel
//! - **engine**: owns the above; sessions borrow it
//!
//! # Feature Flags
//!
//! - `opencl`: native OpenCL backend (links against the ICD loader)

// ============================================================================
// Core Modules
// ============================================================================

pub mod arg;
pub mod backend;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod program;
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use arg::ArgValue;
pub use backend::{ComputeApi, MemAccess};
pub use config::EngineConfig;
pub use device::{DeviceDescriptor, DeviceKind};
pub use engine::Engine;
pub use error::{DispatchError, Result};
pub use geometry::LaunchGeometry;
pub use program::CompiledProgram;
pub use session::{ExecutionSession, ImageDirection};

// ============================================================================
// Prelude
// ============================================================================

/// Prelude module with commonly used types and traits
pub mod prelude {
    pub use crate::args;
    pub use crate::backend::{ComputeApi, HostApi, HostDevice, HostPlatform, MemAccess, WorkItem};
    #[cfg(feature = "opencl")]
    pub use crate::backend::OpenClApi;
    pub use crate::{
        ArgValue, DeviceKind, DispatchError, Engine, EngineConfig, ExecutionSession, ImageDirection,
    };
}
