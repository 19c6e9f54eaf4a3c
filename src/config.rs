//! Engine configuration.
//!
//! Built with a typed builder, or read from the environment:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `HARP_DISPATCH_DEVICE_TYPE` | `gpu`, `cpu`, `accelerator` or `all` |
//! | `HARP_DISPATCH_BLOCK_SIZE` | work-group edge length, positive integer |
//! | `HARP_DISPATCH_BUILD_OPTIONS` | extra compiler flags, whitespace separated |

use typed_builder::TypedBuilder;

use crate::device::DeviceKind;
use crate::error::{DispatchError, Result};

pub const ENV_DEVICE_TYPE: &str = "HARP_DISPATCH_DEVICE_TYPE";
pub const ENV_BLOCK_SIZE: &str = "HARP_DISPATCH_BLOCK_SIZE";
pub const ENV_BUILD_OPTIONS: &str = "HARP_DISPATCH_BUILD_OPTIONS";

/// Default work-group edge length
pub const DEFAULT_BLOCK_SIZE: usize = 32;

/// Settings the engine is created with.
///
/// # Example
///
/// ```
/// use harp_dispatch::{DeviceKind, EngineConfig};
///
/// let config = EngineConfig::builder()
///     .device_kind(DeviceKind::Cpu)
///     .block_size(8)
///     .build();
/// assert!(config.build_options.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct EngineConfig {
    /// Device type filter for selection
    #[builder(default)]
    pub device_kind: DeviceKind,
    /// Work-group edge length, also passed as `-DBLOCK_SIZE`
    #[builder(default = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,
    /// Compiler flags appended after `-DBLOCK_SIZE`
    #[builder(default, setter(into))]
    pub build_options: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EngineConfig {
    /// Defaults overridden by `HARP_DISPATCH_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(kind) = lookup(ENV_DEVICE_TYPE) {
            config.device_kind = kind.parse()?;
        }
        if let Some(size) = lookup(ENV_BLOCK_SIZE) {
            config.block_size = size.trim().parse().map_err(|_| {
                DispatchError::InvalidConfig(format!("{}: '{}' is not a positive integer", ENV_BLOCK_SIZE, size))
            })?;
        }
        if let Some(options) = lookup(ENV_BUILD_OPTIONS) {
            config.build_options = options.split_whitespace().map(str::to_string).collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no engine could run with.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(DispatchError::InvalidBlockSize(0));
        }
        Ok(())
    }

    /// Full option string: `-DBLOCK_SIZE=<n>` followed by the extra options.
    pub fn compile_options(&self) -> String {
        compile_options(self.block_size, &self.build_options)
    }
}

pub(crate) fn compile_options(block_size: usize, extra: &[String]) -> String {
    let mut options = format!("-DBLOCK_SIZE={}", block_size);
    for opt in extra {
        options.push(' ');
        options.push_str(opt);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.device_kind, DeviceKind::Gpu);
        assert_eq!(config.block_size, 32);
        assert_eq!(config.compile_options(), "-DBLOCK_SIZE=32");
    }

    #[test]
    fn test_from_lookup() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_DEVICE_TYPE, "CPU"),
            (ENV_BLOCK_SIZE, "16"),
            (ENV_BUILD_OPTIONS, "-cl-fast-relaxed-math  -DTILE=4"),
        ]))
        .unwrap();
        assert_eq!(config.device_kind, DeviceKind::Cpu);
        assert_eq!(config.block_size, 16);
        assert_eq!(
            config.compile_options(),
            "-DBLOCK_SIZE=16 -cl-fast-relaxed-math -DTILE=4"
        );
    }

    #[test]
    fn test_from_lookup_rejects_malformed() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_BLOCK_SIZE, "wide")])).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(_)));

        let err = EngineConfig::from_lookup(lookup(&[(ENV_BLOCK_SIZE, "0")])).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidBlockSize(0)));

        let err = EngineConfig::from_lookup(lookup(&[(ENV_DEVICE_TYPE, "fpga")])).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
    }
}
