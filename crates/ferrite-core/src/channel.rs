//! Channel handles for cross-device and host transfers.

/// Direction of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    DeviceToDevice,
    DeviceToHost,
    HostToDevice,
}

/// Handle naming a channel between two communicating endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    pub handle: i64,
    pub kind: ChannelKind,
}
