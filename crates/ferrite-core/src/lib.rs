//! Core data model shared by the Ferrite runtime crates.
//!
//! This crate provides the foundational types that the runtime and the
//! out-of-process collaborators (compiler, execution engine) agree on:
//! - Element types and nested value shapes (`DataType`, `Shape`, `ShapeIndex`)
//! - Source programs and their input/output aliasing (`Program`, `AliasConfig`)
//! - Compiler output with its buffer assignment (`CompiledProgram`, `BufferAssignment`)
//! - Replica/partition placement tables (`DeviceAssignment`, `LogicalDeviceIds`)
//! - Compile and execute option structs

pub mod assignment;
pub mod channel;
pub mod compiled;
pub mod options;
pub mod program;
pub mod types;

// Re-export commonly used types
pub use assignment::{DeviceAssignment, DeviceId, LogicalDeviceIds};
pub use channel::{ChannelHandle, ChannelKind};
pub use compiled::{
    AllocationIndex, AllocationKind, BufferAllocation, BufferAssignment, CompiledProgram,
};
pub use options::{CompileOptions, ExecutableBuildOptions, ExecuteOptions};
pub use program::{AliasConfig, InputOutputAlias, Program};
pub use types::{DataType, Shape, ShapeIndex};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ferrite-core operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
