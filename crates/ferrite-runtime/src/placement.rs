//! Default placement of replicas and partitions onto devices.
//!
//! The policy is fixed and never oversubscribes: every (replica, partition)
//! pair gets its own device, and a request needing more devices than the
//! registry holds is rejected. Slot `(r, p)` takes the device at position
//! `p * num_replicas + r` in discovery order, so replicas of one partition
//! sit on consecutive devices. The result depends only on the arguments and
//! the registry, which lets callers cache and compare assignments.

use crate::error::{Result, RuntimeError};
use crate::registry::DeviceRegistry;
use ferrite_core::DeviceAssignment;

/// Computes default device assignments over a registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputationPlacer;

impl ComputationPlacer {
    pub fn new() -> Self {
        Self
    }

    /// Position in discovery order of the device for one slot.
    pub fn device_index(replica: usize, partition: usize, num_replicas: usize) -> usize {
        partition * num_replicas + replica
    }

    /// Assign each of `num_replicas * num_partitions` slots a distinct device.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if either count is zero or the registry has
    /// fewer devices than slots.
    pub fn assign_devices(
        &self,
        registry: &DeviceRegistry,
        num_replicas: usize,
        num_partitions: usize,
    ) -> Result<DeviceAssignment> {
        if num_replicas == 0 || num_partitions == 0 {
            return Err(RuntimeError::InvalidArgument(format!(
                "device assignment needs at least one replica and one partition, \
                 got {num_replicas} replicas and {num_partitions} partitions"
            )));
        }

        let devices = registry.devices();
        let required = num_replicas.checked_mul(num_partitions);
        if required.map_or(true, |required| required > devices.len()) {
            return Err(RuntimeError::InvalidArgument(format!(
                "requested {num_replicas} replicas x {num_partitions} partitions \
                 but only {} devices are available",
                devices.len()
            )));
        }

        let assignment =
            DeviceAssignment::from_fn(num_replicas, num_partitions, |replica, partition| {
                devices[Self::device_index(replica, partition, num_replicas)].id()
            });
        tracing::debug!(num_replicas, num_partitions, "computed default device assignment");
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;
    use ferrite_core::DeviceId;

    fn registry(ids: &[u32]) -> DeviceRegistry {
        let devices = ids.iter().map(|&i| CpuDevice::new(DeviceId(i), 0, 1)).collect();
        DeviceRegistry::new(0, devices).unwrap()
    }

    #[test]
    fn test_replicas_on_distinct_devices() {
        let registry = registry(&[0, 1, 2, 3]);
        let assignment = ComputationPlacer::new().assign_devices(&registry, 4, 1).unwrap();
        for replica in 0..4 {
            assert_eq!(assignment[(replica, 0)], DeviceId(replica as u32));
        }
    }

    #[test]
    fn test_partition_major_layout() {
        let registry = registry(&[0, 1, 2, 3]);
        let assignment = ComputationPlacer::new().assign_devices(&registry, 2, 2).unwrap();
        assert_eq!(assignment[(0, 0)], DeviceId(0));
        assert_eq!(assignment[(1, 0)], DeviceId(1));
        assert_eq!(assignment[(0, 1)], DeviceId(2));
        assert_eq!(assignment[(1, 1)], DeviceId(3));
    }

    #[test]
    fn test_follows_discovery_order() {
        let registry = registry(&[7, 3, 5]);
        let assignment = ComputationPlacer::new().assign_devices(&registry, 3, 1).unwrap();
        assert_eq!(assignment[(0, 0)], DeviceId(7));
        assert_eq!(assignment[(1, 0)], DeviceId(3));
        assert_eq!(assignment[(2, 0)], DeviceId(5));
    }

    #[test]
    fn test_oversubscription_rejected() {
        let registry = registry(&[0, 1, 2, 3]);
        let placer = ComputationPlacer::new();
        assert!(matches!(
            placer.assign_devices(&registry, 9, 1),
            Err(RuntimeError::InvalidArgument(_))
        ));
        assert!(matches!(
            placer.assign_devices(&registry, 3, 2),
            Err(RuntimeError::InvalidArgument(_))
        ));
        assert!(matches!(
            placer.assign_devices(&registry, usize::MAX, 2),
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_counts_rejected() {
        let registry = registry(&[0]);
        let placer = ComputationPlacer::new();
        assert!(placer.assign_devices(&registry, 0, 1).is_err());
        assert!(placer.assign_devices(&registry, 1, 0).is_err());
    }
}
