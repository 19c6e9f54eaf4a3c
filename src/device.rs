//! Device discovery, scoring and selection.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::{debug, info, trace, warn};

use crate::backend::ComputeApi;
use crate::error::{DispatchError, Result};

/// Device category used to filter device queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceKind {
    #[default]
    Gpu,
    Cpu,
    Accelerator,
    /// Any device type
    All,
}

impl DeviceKind {
    /// Whether a device of kind `other` passes this filter.
    pub fn accepts(&self, other: DeviceKind) -> bool {
        *self == DeviceKind::All || *self == other
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Gpu => write!(f, "GPU"),
            DeviceKind::Cpu => write!(f, "CPU"),
            DeviceKind::Accelerator => write!(f, "ACCELERATOR"),
            DeviceKind::All => write!(f, "ALL"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" => Ok(DeviceKind::Gpu),
            "cpu" => Ok(DeviceKind::Cpu),
            "accelerator" | "acc" => Ok(DeviceKind::Accelerator),
            "all" | "any" => Ok(DeviceKind::All),
            other => Err(DispatchError::InvalidConfig(format!(
                "unknown device type '{}' (expected gpu, cpu, accelerator or all)",
                other
            ))),
        }
    }
}

/// Platform properties reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
}

/// Device properties reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub kind: DeviceKind,
    /// Maximum clock frequency in MHz
    pub max_clock_frequency: u32,
    pub max_compute_units: u32,
}

/// Coarse cores-per-compute-unit factor derived from the vendor string.
pub fn vendor_core_factor(vendor: &str) -> u64 {
    let vendor = vendor.to_ascii_lowercase();
    if vendor.contains("nvidia") || vendor.contains("amd") || vendor.contains("advanced micro devices") {
        128
    } else if vendor.contains("intel") {
        16
    } else {
        1
    }
}

/// Performance score: clock × compute units × vendor core factor.
pub fn performance_score(info: &DeviceInfo) -> u64 {
    u64::from(info.max_clock_frequency)
        * u64::from(info.max_compute_units)
        * vendor_core_factor(&info.vendor)
}

/// A scored device candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Platform ordinal in enumeration order
    pub platform: usize,
    /// Device ordinal inside the platform's filtered device list
    pub ordinal: usize,
    pub platform_name: String,
    pub platform_vendor: String,
    pub info: DeviceInfo,
    pub score: u64,
}

impl DeviceDescriptor {
    fn new(platform: usize, ordinal: usize, platform_info: PlatformInfo, info: DeviceInfo) -> Self {
        let score = performance_score(&info);
        Self {
            platform,
            ordinal,
            platform_name: platform_info.name,
            platform_vendor: platform_info.vendor,
            info,
            score,
        }
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Device vendor
    pub fn vendor(&self) -> &str {
        &self.info.vendor
    }

    /// Device category
    pub fn kind(&self) -> DeviceKind {
        self.info.kind
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.platform_vendor, self.platform_name, self.info.name
        )
    }
}

/// Picks the index of the highest scoring candidate; ties keep the first seen.
pub fn best_candidate(candidates: &[DeviceDescriptor]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        match best {
            Some(b) if candidates[b].score >= candidate.score => {}
            _ => best = Some(i),
        }
    }
    best
}

/// The selected device together with its native handle.
pub struct ActiveDevice<A: ComputeApi> {
    pub descriptor: DeviceDescriptor,
    pub device: A::Device,
}

impl<A: ComputeApi> Clone for ActiveDevice<A> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            device: self.device.clone(),
        }
    }
}

/// Holds the active device and the type filter used to find it.
///
/// Every successful selection bumps `generation`, which the program builder
/// compares against to detect that its program targets another device.
pub struct DeviceRegistry<A: ComputeApi> {
    kind: DeviceKind,
    active: ActiveDevice<A>,
    generation: u64,
}

impl<A: ComputeApi> DeviceRegistry<A> {
    /// Scans all platforms and selects the best device of `kind`.
    pub fn new(api: &A, kind: DeviceKind) -> Result<Self> {
        let active = Self::scan_best(api, kind)?;
        Ok(Self {
            kind,
            active,
            generation: 0,
        })
    }

    /// Device type filter
    pub fn device_kind(&self) -> DeviceKind {
        self.kind
    }

    /// Changes the filter used by subsequent scans and selections.
    pub fn set_device_kind(&mut self, kind: DeviceKind) {
        self.kind = kind;
    }

    /// The active device.
    pub fn active(&self) -> &ActiveDevice<A> {
        &self.active
    }

    /// Descriptor of the active device.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.active.descriptor
    }

    /// Selection generation, bumped on every successful selection.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Maps platform ordinals to `"vendor/platform/device"` for every platform
    /// exposing a device of the configured kind.
    pub fn enumerate(&self, api: &A) -> Result<BTreeMap<usize, String>> {
        let platforms = api.platforms()?;
        if platforms.is_empty() {
            return Err(DispatchError::NoPlatformsFound);
        }

        let mut devices = BTreeMap::new();
        for (index, platform) in platforms.iter().enumerate() {
            match Self::probe(api, index, platform, self.kind) {
                Ok(Some((descriptor, _))) => {
                    devices.insert(index, descriptor.to_string());
                }
                Ok(None) => debug!("platform {}: no {} device", index, self.kind),
                Err(e) => warn!("platform {}: device query failed: {}", index, e),
            }
        }
        Ok(devices)
    }

    /// Rescans all platforms and activates the highest scoring device.
    pub fn select_best(&mut self, api: &A) -> Result<&DeviceDescriptor> {
        self.active = Self::scan_best(api, self.kind)?;
        self.generation += 1;
        Ok(&self.active.descriptor)
    }

    /// Activates the first device of platform `ordinal`.
    ///
    /// Returns `DeviceSelectionFailed` when the platform does not exist or has
    /// no device of the configured kind; the active device is then unchanged,
    /// so callers can keep probing other ordinals.
    pub fn select(&mut self, api: &A, ordinal: usize) -> Result<&DeviceDescriptor> {
        let platforms = api.platforms()?;
        let failed = DispatchError::DeviceSelectionFailed {
            ordinal,
            kind: self.kind,
        };

        let Some(platform) = platforms.get(ordinal) else {
            warn!("platform {} does not exist", ordinal);
            return Err(failed);
        };

        match Self::probe(api, ordinal, platform, self.kind) {
            Ok(Some((descriptor, device))) => {
                info!("selected device: {}", descriptor);
                self.active = ActiveDevice { descriptor, device };
                self.generation += 1;
                Ok(&self.active.descriptor)
            }
            Ok(None) => {
                warn!("platform {}: no {} device", ordinal, self.kind);
                Err(failed)
            }
            Err(e) => {
                warn!("platform {}: device query failed: {}", ordinal, e);
                Err(failed)
            }
        }
    }

    /// Logs name, vendor and type of the active device.
    pub fn log_device_info(&self) {
        let d = &self.active.descriptor;
        info!("- device Name: {}", d.name());
        info!(" - device Vendor: {}", d.vendor());
        info!(" - device Type: {}", d.kind());
        info!(
            " - device Score: {} ({} MHz x {} CU)",
            d.score, d.info.max_clock_frequency, d.info.max_compute_units
        );
    }

    fn scan_best(api: &A, kind: DeviceKind) -> Result<ActiveDevice<A>> {
        debug!("scanning compute platforms for {} devices", kind);

        let platforms = api.platforms()?;
        if platforms.is_empty() {
            return Err(DispatchError::NoPlatformsFound);
        }

        let mut candidates = Vec::new();
        let mut handles = Vec::new();
        for (index, platform) in platforms.iter().enumerate() {
            match Self::probe(api, index, platform, kind) {
                Ok(Some((descriptor, device))) => {
                    trace!("candidate {}: {} (score {})", index, descriptor, descriptor.score);
                    candidates.push(descriptor);
                    handles.push(device);
                }
                Ok(None) => debug!("platform {}: no {} device, skipped", index, kind),
                Err(e) => warn!("platform {}: device query failed, skipped: {}", index, e),
            }
        }

        let best = best_candidate(&candidates).ok_or(DispatchError::NoDevicesFound { kind })?;
        let descriptor = candidates.swap_remove(best);
        let device = handles.swap_remove(best);

        info!("selected device: {} (score {})", descriptor, descriptor.score);
        Ok(ActiveDevice { descriptor, device })
    }

    /// First device of `kind` on `platform`, with its descriptor.
    fn probe(
        api: &A,
        index: usize,
        platform: &A::Platform,
        kind: DeviceKind,
    ) -> Result<Option<(DeviceDescriptor, A::Device)>> {
        let Some(device) = api.devices(platform, kind)?.into_iter().next() else {
            return Ok(None);
        };
        let platform_info = api.platform_info(platform)?;
        let info = api.device_info(&device)?;
        Ok(Some((
            DeviceDescriptor::new(index, 0, platform_info, info),
            device,
        )))
    }
}
