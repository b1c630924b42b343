//! Device buffers and their donation state.

use crate::error::{Result, RuntimeError};
use ferrite_core::{DeviceId, Shape};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How a host buffer may be used after a transfer call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostBufferSemantics {
    /// The host data is only valid for the duration of the call.
    ImmutableOnlyDuringCall,

    /// The host data stays valid until the transfer completes.
    ImmutableUntilTransferCompletes,

    /// The device may alias the host data for the buffer's lifetime.
    ZeroCopy,
}

#[derive(Debug)]
enum BufferState {
    /// Storage is available. Executions that read the buffer hold clones of
    /// the `Arc` while they run.
    Live(Arc<Vec<u8>>),

    /// Storage was handed to an execution that reuses it as an output.
    Donated,

    /// Storage was released by the owner.
    Deleted,
}

/// A value resident on one device.
///
/// Reading executions share the storage; a donating execution takes it over,
/// which is only possible while nobody else holds it. Once donated or deleted
/// the buffer can no longer be passed to an execution.
#[derive(Debug)]
pub struct DeviceBuffer {
    device: DeviceId,
    shape: Shape,
    state: Mutex<BufferState>,
}

impl DeviceBuffer {
    /// Wrap bytes already resident on `device`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `data` does not match the shape's size.
    pub fn from_bytes(device: DeviceId, shape: Shape, data: Vec<u8>) -> Result<Self> {
        if data.len() != shape.byte_size() {
            return Err(RuntimeError::InvalidArgument(format!(
                "buffer of shape {shape} needs {} bytes, got {}",
                shape.byte_size(),
                data.len()
            )));
        }
        Ok(Self {
            device,
            shape,
            state: Mutex::new(BufferState::Live(Arc::new(data))),
        })
    }

    /// Allocate a zero-filled buffer on `device`.
    pub fn zeroed(device: DeviceId, shape: Shape) -> Self {
        let data = vec![0u8; shape.byte_size()];
        Self {
            device,
            shape,
            state: Mutex::new(BufferState::Live(Arc::new(data))),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn on_device_size_in_bytes(&self) -> usize {
        self.shape.byte_size()
    }

    /// Whether the storage is gone, by deletion or donation.
    pub fn is_deleted(&self) -> bool {
        !matches!(*self.lock(), BufferState::Live(_))
    }

    pub fn is_donated(&self) -> bool {
        matches!(*self.lock(), BufferState::Donated)
    }

    /// Release the storage. In-flight readers keep their own reference.
    pub fn delete(&self) {
        *self.lock() = BufferState::Deleted;
    }

    /// Copy the contents out.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(self.share()?.as_ref().clone())
    }

    /// A shared reference to the storage for a reading execution.
    pub(crate) fn share(&self) -> Result<Arc<Vec<u8>>> {
        match &*self.lock() {
            BufferState::Live(data) => Ok(Arc::clone(data)),
            BufferState::Donated => Err(RuntimeError::InvalidArgument(
                "buffer has been donated to a previous execution".to_string(),
            )),
            BufferState::Deleted => Err(RuntimeError::InvalidArgument(
                "buffer has been deleted".to_string(),
            )),
        }
    }

    /// Take exclusive ownership of the storage for a donating execution.
    ///
    /// Fails, leaving the buffer untouched, if any other holder still
    /// references the storage.
    pub(crate) fn take_for_donation(&self) -> Result<Vec<u8>> {
        let mut state = self.lock();
        let data = match std::mem::replace(&mut *state, BufferState::Donated) {
            BufferState::Live(data) => data,
            other => {
                *state = other;
                return Err(RuntimeError::InvalidArgument(
                    "donated buffer is no longer live".to_string(),
                ));
            }
        };

        match Arc::try_unwrap(data) {
            Ok(data) => Ok(data),
            Err(shared) => {
                *state = BufferState::Live(shared);
                Err(RuntimeError::InvalidArgument(
                    "donated buffer is still referenced by another execution".to_string(),
                ))
            }
        }
    }

    /// Undo a donation whose execution never started.
    pub(crate) fn restore(&self, data: Vec<u8>) {
        let mut state = self.lock();
        if matches!(*state, BufferState::Donated) {
            *state = BufferState::Live(Arc::new(data));
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
