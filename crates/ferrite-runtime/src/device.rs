//! Host CPU devices.

use crate::capability::{Capability, HOST_CPU_CAPABILITIES};
use crate::error::Result;
use crate::semaphore::AdmissionSemaphore;
use ferrite_core::DeviceId;
use std::fmt;

/// Kind string reported by every host CPU device.
pub const CPU_DEVICE_KIND: &str = "cpu";

/// A physical device executing compiled programs on the host.
///
/// The device's id and process index are fixed at construction. Each device
/// carries the admission semaphore that bounds how many programs may be in
/// flight on it.
#[derive(Debug)]
pub struct CpuDevice {
    id: DeviceId,
    process_index: usize,
    max_inflight_computations: AdmissionSemaphore,
}

impl CpuDevice {
    /// Create a device owned by process `process_index` admitting at most
    /// `max_inflight` concurrent computations.
    pub fn new(id: DeviceId, process_index: usize, max_inflight: usize) -> Self {
        Self {
            id,
            process_index,
            max_inflight_computations: AdmissionSemaphore::new(max_inflight),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Index of the process that owns this device.
    pub fn process_index(&self) -> usize {
        self.process_index
    }

    /// Ordinal of the device among its owner's devices.
    pub fn local_hardware_id(&self) -> u32 {
        self.id.0
    }

    pub fn device_kind(&self) -> &'static str {
        CPU_DEVICE_KIND
    }

    /// Whether a client running as `process_index` may execute on this device.
    pub fn is_addressable_from(&self, process_index: usize) -> bool {
        self.process_index == process_index
    }

    pub fn debug_string(&self) -> String {
        format!("HOST_CPU_{}", self.id)
    }

    /// Semaphore for admission control on in-flight computations.
    pub fn max_inflight_computations_semaphore(&self) -> &AdmissionSemaphore {
        &self.max_inflight_computations
    }

    pub fn transfer_to_infeed(&self, _data: &[u8]) -> Result<()> {
        Err(HOST_CPU_CAPABILITIES.unsupported(Capability::InfeedTransfer))
    }

    pub fn transfer_from_outfeed(&self, _destination: &mut [u8]) -> Result<()> {
        Err(HOST_CPU_CAPABILITIES.unsupported(Capability::OutfeedTransfer))
    }
}

impl fmt::Display for CpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_identity() {
        let device = CpuDevice::new(DeviceId(3), 0, 8);
        assert_eq!(device.id(), DeviceId(3));
        assert_eq!(device.local_hardware_id(), 3);
        assert_eq!(device.device_kind(), "cpu");
        assert_eq!(device.to_string(), "HOST_CPU_3");
        assert_eq!(device.max_inflight_computations_semaphore().capacity(), 8);
    }

    #[test]
    fn test_addressability() {
        let device = CpuDevice::new(DeviceId(0), 1, 1);
        assert!(device.is_addressable_from(1));
        assert!(!device.is_addressable_from(0));
    }

    #[test]
    fn test_feeds_unsupported() {
        let device = CpuDevice::new(DeviceId(0), 0, 1);
        assert!(device.transfer_to_infeed(&[0u8; 4]).unwrap_err().is_permanent());
        let mut out = [0u8; 4];
        assert!(device.transfer_from_outfeed(&mut out).unwrap_err().is_permanent());
    }
}
