//! Client configuration.

use crate::device::CpuDevice;
use crate::error::{Result, RuntimeError};
use crate::semaphore::{DEFAULT_ASYNC_INFLIGHT_CAPACITY, SYNC_INFLIGHT_CAPACITY};
use ferrite_core::DeviceId;
use std::num::NonZeroUsize;

/// Overrides the number of host devices.
pub const DEVICE_COUNT_ENV: &str = "FERRITE_CPU_DEVICE_COUNT";

/// Overrides the per-device in-flight limit.
pub const MAX_INFLIGHT_ENV: &str = "FERRITE_MAX_INFLIGHT";

/// Overrides the intra-op thread count.
pub const INTRA_OP_THREADS_ENV: &str = "FERRITE_INTRA_OP_THREADS";

/// Options for creating a [`CpuClient`](crate::CpuClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Index of the local process; devices are owned by it.
    pub process_index: usize,

    /// Number of host devices to create.
    pub device_count: usize,

    /// Whether executions may be dispatched ahead of completion. Only
    /// affects the default in-flight limit.
    pub asynchronous: bool,

    /// Per-device admission limit. Defaults to 32 when asynchronous, 1
    /// otherwise.
    pub max_inflight_computations_per_device: Option<usize>,

    /// Threads in the shared intra-op pool. Defaults to the available
    /// parallelism.
    pub intra_op_threads: Option<usize>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            process_index: 0,
            device_count: 1,
            asynchronous: true,
            max_inflight_computations_per_device: None,
            intra_op_threads: None,
        }
    }
}

impl ClientOptions {
    pub fn with_process_index(mut self, process_index: usize) -> Self {
        self.process_index = process_index;
        self
    }

    pub fn with_device_count(mut self, device_count: usize) -> Self {
        self.device_count = device_count;
        self
    }

    pub fn with_asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight_computations_per_device = Some(max_inflight);
        self
    }

    pub fn with_intra_op_threads(mut self, threads: usize) -> Self {
        self.intra_op_threads = Some(threads);
        self
    }

    /// Defaults overlaid with any `FERRITE_*` environment variables.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if a variable is set but not a positive
    /// integer.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay values looked up by `lookup`, keyed by environment variable.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(count) = parse_positive(DEVICE_COUNT_ENV, lookup(DEVICE_COUNT_ENV))? {
            self.device_count = count;
        }
        if let Some(limit) = parse_positive(MAX_INFLIGHT_ENV, lookup(MAX_INFLIGHT_ENV))? {
            self.max_inflight_computations_per_device = Some(limit);
        }
        if let Some(threads) = parse_positive(INTRA_OP_THREADS_ENV, lookup(INTRA_OP_THREADS_ENV))? {
            self.intra_op_threads = Some(threads);
        }
        Ok(self)
    }

    /// The admission limit each device is created with.
    pub fn max_inflight(&self) -> usize {
        match self.max_inflight_computations_per_device {
            Some(limit) => limit,
            None if self.asynchronous => DEFAULT_ASYNC_INFLIGHT_CAPACITY,
            None => SYNC_INFLIGHT_CAPACITY,
        }
    }

    /// Threads in the intra-op pool.
    pub fn intra_op_threads(&self) -> usize {
        self.intra_op_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.device_count == 0 {
            return Err(RuntimeError::InvalidArgument(
                "a client needs at least one device".to_string(),
            ));
        }
        if self.max_inflight() == 0 {
            return Err(RuntimeError::InvalidArgument(
                "max in-flight computations per device must be positive".to_string(),
            ));
        }
        if self.intra_op_threads == Some(0) {
            return Err(RuntimeError::InvalidArgument(
                "intra-op thread count must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Create the host devices, ids `0..device_count`, owned by the local
    /// process.
    pub(crate) fn enumerate_devices(&self) -> Vec<CpuDevice> {
        (0..self.device_count)
            .map(|i| CpuDevice::new(DeviceId(i as u32), self.process_index, self.max_inflight()))
            .collect()
    }
}

fn parse_positive(key: &str, value: Option<String>) -> Result<Option<usize>> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(RuntimeError::InvalidArgument(format!(
            "{key} must be a positive integer, got '{value}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.device_count, 1);
        assert_eq!(options.max_inflight(), 32);
        assert_eq!(options.with_asynchronous(false).max_inflight(), 1);
    }

    #[test]
    fn test_explicit_limit_wins() {
        let options = ClientOptions::default()
            .with_asynchronous(false)
            .with_max_inflight(4);
        assert_eq!(options.max_inflight(), 4);
    }

    #[test]
    fn test_overlay() {
        let env = HashMap::from([
            (DEVICE_COUNT_ENV, "4"),
            (INTRA_OP_THREADS_ENV, " 2 "),
        ]);
        let options = ClientOptions::default()
            .overlay(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(options.device_count, 4);
        assert_eq!(options.intra_op_threads(), 2);
        assert_eq!(options.max_inflight_computations_per_device, None);
    }

    #[test]
    fn test_overlay_rejects_garbage() {
        for bad in ["zero", "0", "-3", ""] {
            let err = ClientOptions::default()
                .overlay(|key| (key == MAX_INFLIGHT_ENV).then(|| bad.to_string()))
                .unwrap_err();
            assert!(matches!(err, RuntimeError::InvalidArgument(_)), "{bad}");
        }
    }

    #[test]
    fn test_enumerate_devices() {
        let devices = ClientOptions::default()
            .with_device_count(3)
            .with_process_index(1)
            .enumerate_devices();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[2].id(), DeviceId(2));
        assert_eq!(devices[2].process_index(), 1);
        assert_eq!(devices[0].max_inflight_computations_semaphore().capacity(), 32);
    }

    #[test]
    fn test_validate() {
        assert!(ClientOptions::default().validate().is_ok());
        assert!(ClientOptions::default().with_device_count(0).validate().is_err());
        assert!(ClientOptions::default().with_intra_op_threads(0).validate().is_err());
    }
}
