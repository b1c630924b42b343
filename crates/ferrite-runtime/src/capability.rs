//! Fixed per-platform capability tables.
//!
//! Some operations a full client would offer are deliberately absent on a
//! given platform. Rather than stubbing them ad hoc, every platform declares
//! a static [`CapabilityTable`] and unsupported calls report
//! [`RuntimeError::Unsupported`] from it. The answer never changes for the
//! lifetime of the process.

use crate::error::RuntimeError;
use std::fmt;

/// An operation a client or device may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Compile,
    Execute,
    CreateUninitializedBuffer,
    BufferFromHostBuffer,
    BufferFromHostLiteral,
    CrossHostReceiveBuffers,
    ViewOfDeviceBuffer,
    ChannelHandle,
    DeviceToHostChannelHandle,
    HostToDeviceChannelHandle,
    Defragment,
    InfeedTransfer,
    OutfeedTransfer,
}

impl Capability {
    pub const ALL: [Capability; 13] = [
        Capability::Compile,
        Capability::Execute,
        Capability::CreateUninitializedBuffer,
        Capability::BufferFromHostBuffer,
        Capability::BufferFromHostLiteral,
        Capability::CrossHostReceiveBuffers,
        Capability::ViewOfDeviceBuffer,
        Capability::ChannelHandle,
        Capability::DeviceToHostChannelHandle,
        Capability::HostToDeviceChannelHandle,
        Capability::Defragment,
        Capability::InfeedTransfer,
        Capability::OutfeedTransfer,
    ];

    /// Name of the operation as exposed on the client or device.
    pub fn operation(self) -> &'static str {
        match self {
            Capability::Compile => "compile",
            Capability::Execute => "execute",
            Capability::CreateUninitializedBuffer => "create_uninitialized_buffer",
            Capability::BufferFromHostBuffer => "buffer_from_host_buffer",
            Capability::BufferFromHostLiteral => "buffer_from_host_literal",
            Capability::CrossHostReceiveBuffers => "make_cross_host_receive_buffers",
            Capability::ViewOfDeviceBuffer => "create_view_of_device_buffer",
            Capability::ChannelHandle => "create_channel_handle",
            Capability::DeviceToHostChannelHandle => "create_device_to_host_channel_handle",
            Capability::HostToDeviceChannelHandle => "create_host_to_device_channel_handle",
            Capability::Defragment => "defragment",
            Capability::InfeedTransfer => "transfer_to_infeed",
            Capability::OutfeedTransfer => "transfer_from_outfeed",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

/// The operations one platform supports.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityTable {
    platform: &'static str,
    supported: &'static [Capability],
}

/// Capabilities of the host CPU platform.
pub const HOST_CPU_CAPABILITIES: CapabilityTable = CapabilityTable {
    platform: "cpu",
    supported: &[Capability::Compile, Capability::Execute],
};

impl CapabilityTable {
    pub const fn new(platform: &'static str, supported: &'static [Capability]) -> Self {
        Self {
            platform,
            supported,
        }
    }

    pub fn platform(&self) -> &'static str {
        self.platform
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.supported.contains(&capability)
    }

    /// The error reported for an unsupported capability.
    pub fn unsupported(&self, capability: Capability) -> RuntimeError {
        RuntimeError::Unsupported {
            operation: capability.operation(),
            platform: self.platform,
        }
    }

    /// `Ok` if supported, the unsupported error otherwise.
    pub fn check(&self, capability: Capability) -> Result<(), RuntimeError> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(self.unsupported(capability))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_cpu_table() {
        assert!(HOST_CPU_CAPABILITIES.supports(Capability::Compile));
        assert!(HOST_CPU_CAPABILITIES.supports(Capability::Execute));
        assert!(!HOST_CPU_CAPABILITIES.supports(Capability::ChannelHandle));
        assert!(!HOST_CPU_CAPABILITIES.supports(Capability::Defragment));
    }

    #[test]
    fn test_check_reports_permanent_error() {
        let err = HOST_CPU_CAPABILITIES
            .check(Capability::BufferFromHostBuffer)
            .unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(
            err.to_string(),
            "buffer_from_host_buffer is not supported by the cpu client"
        );
        assert!(HOST_CPU_CAPABILITIES.check(Capability::Execute).is_ok());
    }

    #[test]
    fn test_operation_names_unique() {
        let names: std::collections::HashSet<_> =
            Capability::ALL.iter().map(|c| c.operation()).collect();
        assert_eq!(names.len(), Capability::ALL.len());
    }
}
