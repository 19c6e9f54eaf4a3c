//! Error types for device selection, program building and kernel dispatch

use thiserror::Error;

use crate::device::DeviceKind;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Main error type for dispatch operations
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The compute runtime reported no platform at all
    #[error("No compute platforms found")]
    NoPlatformsFound,

    /// No platform exposes a device of the requested kind
    #[error("No {kind} devices found on any platform")]
    NoDevicesFound { kind: DeviceKind },

    /// An explicitly requested platform ordinal has no matching device
    #[error("Device selection failed: platform {ordinal} has no {kind} device")]
    DeviceSelectionFailed { ordinal: usize, kind: DeviceKind },

    /// The program failed to compile; `log` holds the compiler output
    #[error("Program build failed, compiler says:\n{log}")]
    BuildFailure { log: String },

    /// The requested kernel is not part of the compiled program
    #[error("Kernel not found: {name} (available: {})", .available.join(", "))]
    KernelNotFound { name: String, available: Vec<String> },

    /// A transfer referenced an identifier never bound in the session
    #[error("Unknown resource id: [{0}]")]
    UnknownResourceId(String),

    /// A call into the native compute API returned a failure status
    #[error("{operation} failed: {message}")]
    NativeApi {
        operation: &'static str,
        message: String,
    },

    /// No program has been built yet
    #[error("No program has been built")]
    ProgramNotBuilt,

    /// Source, block size or device changed since the last successful build
    #[error("Program is stale, rebuild before creating a session")]
    StaleProgram,

    /// Block size must be a positive integer
    #[error("Invalid block size: {0}")]
    InvalidBlockSize(usize),

    /// Argument slot beyond the kernel's declared parameter count
    #[error("Argument slot {slot} out of range (kernel takes {count} arguments)")]
    ArgumentSlotOutOfRange { slot: u32, count: u32 },

    /// Host image data is smaller than `width * height`
    #[error("Image [{id}] needs {expected} texels, host data has {actual}")]
    ImageSizeMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    /// Malformed configuration value
    #[error("Config error: {0}")]
    InvalidConfig(String),
}

impl DispatchError {
    /// Wraps a native API failure
    pub fn native(operation: &'static str, message: impl ToString) -> Self {
        DispatchError::NativeApi {
            operation,
            message: message.to_string(),
        }
    }

    /// Whether the error is recoverable without aborting a device scan
    pub fn is_selection_failure(&self) -> bool {
        matches!(self, DispatchError::DeviceSelectionFailed { .. })
    }
}
