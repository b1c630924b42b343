//! Device registry: the fixed set of devices a client knows about.

use crate::device::CpuDevice;
use crate::error::{Result, RuntimeError};
use ferrite_core::DeviceId;
use std::collections::HashMap;
use std::sync::Arc;

/// Owns every device known to a client.
///
/// Devices are enumerated once at construction and never added or removed.
/// Two views are kept in discovery order: all devices, and the addressable
/// subset owned by the local process.
#[derive(Debug)]
pub struct DeviceRegistry {
    process_index: usize,

    /// All devices, including non-addressable ones.
    devices: Vec<Arc<CpuDevice>>,

    /// Devices owned by `process_index`, in the same relative order.
    addressable_devices: Vec<Arc<CpuDevice>>,

    /// Maps `CpuDevice::id()` to the device. Includes all devices.
    id_to_device: HashMap<DeviceId, Arc<CpuDevice>>,
}

impl DeviceRegistry {
    /// Build a registry for a client running as `process_index`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if two devices share an id.
    pub fn new(process_index: usize, devices: Vec<CpuDevice>) -> Result<Self> {
        let devices: Vec<Arc<CpuDevice>> = devices.into_iter().map(Arc::new).collect();

        let mut id_to_device = HashMap::with_capacity(devices.len());
        for device in &devices {
            if id_to_device.insert(device.id(), Arc::clone(device)).is_some() {
                return Err(RuntimeError::InvalidArgument(format!(
                    "duplicate device id {}",
                    device.id()
                )));
            }
        }

        let addressable_devices = devices
            .iter()
            .filter(|d| d.is_addressable_from(process_index))
            .cloned()
            .collect();

        Ok(Self {
            process_index,
            devices,
            addressable_devices,
            id_to_device,
        })
    }

    /// Index of the local process.
    pub fn process_index(&self) -> usize {
        self.process_index
    }

    pub fn devices(&self) -> &[Arc<CpuDevice>] {
        &self.devices
    }

    pub fn addressable_devices(&self) -> &[Arc<CpuDevice>] {
        &self.addressable_devices
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn addressable_device_count(&self) -> usize {
        self.addressable_devices.len()
    }

    /// Look up any known device by id.
    pub fn lookup_device(&self, id: DeviceId) -> Result<&Arc<CpuDevice>> {
        self.id_to_device
            .get(&id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no device with id {id}")))
    }

    /// Look up a device owned by this process by its local hardware id.
    ///
    /// Devices that exist but belong to another process are not returned.
    pub fn lookup_addressable_device(&self, local_hardware_id: u32) -> Result<&Arc<CpuDevice>> {
        self.addressable_devices
            .iter()
            .find(|d| d.local_hardware_id() == local_hardware_id)
            .ok_or_else(|| {
                RuntimeError::NotFound(format!(
                    "no addressable device with local_hardware_id {local_hardware_id}"
                ))
            })
    }

    /// Whether `device` belongs to the local process.
    pub fn is_addressable(&self, device: &CpuDevice) -> bool {
        device.is_addressable_from(self.process_index)
    }
}
