//! Device dispatch for compiled Ferrite programs.
//!
//! This crate sits between callers that hold compiled programs and the
//! engines that run them on host CPU devices.
//!
//! # Architecture
//!
//! The runtime manages four main responsibilities:
//! 1. **Devices** - Enumerate devices once and bound in-flight work per device
//! 2. **Placement** - Map (replica, partition) slots onto distinct devices
//! 3. **Executables** - Derive result buffers and the donation set at compile time
//! 4. **Dispatch** - Validate arguments, take over donated buffers, run the engine
//!
//! Compilation and execution themselves are delegated to the [`Compiler`]
//! and [`ExecutionEngine`] traits. [`HostCompiler`] and [`HostEngine`] are
//! reference implementations that plan and materialize buffers only.
//!
//! # Example
//!
//! ```
//! use ferrite_core::{
//!     CompileOptions, DataType, ExecutableBuildOptions, ExecuteOptions, Program, Shape,
//!     ShapeIndex,
//! };
//! use ferrite_runtime::{ClientOptions, CpuClient, DeviceBuffer};
//!
//! let client = CpuClient::new(ClientOptions::default().with_device_count(2))?;
//!
//! // Result aliases parameter 1, so argument 1 is donated on every run.
//! let vector = Shape::array(DataType::F32, &[4]);
//! let program = Program::new("update", vec![vector.clone(), vector.clone()], vector.clone())
//!     .with_alias(ShapeIndex::root(), 1, ShapeIndex::root())?;
//! let options = CompileOptions::default()
//!     .with_build_options(ExecutableBuildOptions::default().with_num_replicas(2));
//! let executable = client.compile(&program, &options)?;
//! assert!(executable.must_donate_parameter(1));
//!
//! let device = executable.device_assignment()[(1, 0)];
//! let (x, state) = (
//!     DeviceBuffer::zeroed(device, vector.clone()),
//!     DeviceBuffer::zeroed(device, vector),
//! );
//! let outputs = executable.execute_on(&[&x, &state], 1, 0, &ExecuteOptions::default())?;
//! assert_eq!(outputs.len(), 1);
//! assert!(state.is_donated());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod buffer;
mod capability;
mod client;
mod config;
mod device;
mod donation;
mod engine;
mod error;
mod executable;
mod host;
mod placement;
mod registry;
mod semaphore;

// Public exports
pub use buffer::{DeviceBuffer, HostBufferSemantics};
pub use capability::{Capability, CapabilityTable, HOST_CPU_CAPABILITIES};
pub use client::{get_cpu_client, CpuClient, CPU_PLATFORM_ID, CPU_PLATFORM_NAME};
pub use config::{ClientOptions, DEVICE_COUNT_ENV, INTRA_OP_THREADS_ENV, MAX_INFLIGHT_ENV};
pub use device::{CpuDevice, CPU_DEVICE_KIND};
pub use donation::{entry_argument_count, parameters_that_must_be_donated};
pub use engine::{Compiler, ExecutionContext, ExecutionEngine, ExecutionInput, RunId};
pub use error::{CompileError, ExecutionError, Result, RuntimeError};
pub use executable::{Executable, ExecutableMetadata};
pub use host::{HostCompiler, HostEngine};
pub use placement::ComputationPlacer;
pub use registry::DeviceRegistry;
pub use semaphore::{
    AdmissionPermit, AdmissionSemaphore, DEFAULT_ASYNC_INFLIGHT_CAPACITY, SYNC_INFLIGHT_CAPACITY,
};
