//! Boundary to the engines that compile and run programs.
//!
//! The runtime never generates or runs code itself. It hands a [`Program`]
//! to a [`Compiler`] and a compiled program plus resolved inputs to an
//! [`ExecutionEngine`], and passes their errors through unchanged.

use crate::buffer::DeviceBuffer;
use crate::device::CpuDevice;
use crate::error::{CompileError, ExecutionError};
use ferrite_core::{AllocationIndex, CompileOptions, CompiledProgram, LogicalDeviceIds, Program};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lowers programs into compiled artifacts.
pub trait Compiler: Send + Sync {
    /// Compile `program` for the given options.
    fn compile(
        &self,
        program: &Program,
        options: &CompileOptions,
    ) -> std::result::Result<CompiledProgram, CompileError>;
}

/// Runs compiled programs on a resolved device.
pub trait ExecutionEngine: Send + Sync {
    /// Run `program` with positional `inputs`, returning one buffer per
    /// top-level result element (a single buffer for non-tuple results).
    ///
    /// Donated inputs are owned by the engine and may back outputs.
    fn run(
        &self,
        program: &CompiledProgram,
        ctx: &ExecutionContext<'_>,
        inputs: Vec<ExecutionInput>,
    ) -> std::result::Result<Vec<DeviceBuffer>, ExecutionError>;
}

/// One argument as seen by the engine.
#[derive(Debug)]
pub enum ExecutionInput {
    /// Read-only view of a buffer that stays owned by the caller.
    Borrowed(Arc<Vec<u8>>),

    /// Storage taken over from a donated buffer.
    Donated(Vec<u8>),
}

impl ExecutionInput {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ExecutionInput::Borrowed(data) => data,
            ExecutionInput::Donated(data) => data,
        }
    }

    pub fn is_donated(&self) -> bool {
        matches!(self, ExecutionInput::Donated(_))
    }
}

/// Identifier of a single execution, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl RunId {
    /// Allocate a fresh id.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything an engine needs to know about where and how it runs.
#[derive(Debug)]
pub struct ExecutionContext<'a> {
    /// Device the execution was admitted to.
    pub device: &'a CpuDevice,

    /// Slot of the execution plan being run.
    pub logical_ids: LogicalDeviceIds,

    pub run_id: RunId,

    /// Shared by all launches of one multi-device execution.
    pub launch_id: i32,

    /// Whether arguments are the elements of a single tuple parameter.
    pub parameter_is_tupled_arguments: bool,

    /// Allocation backing each returned buffer.
    pub result_buffer_indices: &'a [AllocationIndex],

    /// Intra-op thread pool shared by every execution of the client.
    pub intra_op_pool: &'a rayon::ThreadPool,
}
