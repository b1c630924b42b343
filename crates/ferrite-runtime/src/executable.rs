//! Executables: compiled programs bound to a device assignment.
//!
//! Everything the runtime derives from a compiled program is computed once
//! at construction and stored in an immutable [`ExecutableMetadata`] shared
//! through an `Arc`. Every execution clones that `Arc` and the compiled
//! program's `Arc` before it starts. Deleting an executable therefore only
//! clears the handle's own reference, and executions already under way keep
//! the state they captured.

use crate::buffer::DeviceBuffer;
use crate::client::ClientShared;
use crate::device::CpuDevice;
use crate::donation::{self, ArgumentTarget};
use crate::engine::{ExecutionContext, RunId};
use crate::error::{Result, RuntimeError};
use ferrite_core::{
    AllocationIndex, CompiledProgram, DeviceAssignment, DeviceId, ExecuteOptions, LogicalDeviceIds,
    ShapeIndex,
};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Immutable facts about an executable, shared with in-flight executions.
#[derive(Debug)]
pub struct ExecutableMetadata {
    name: String,
    num_replicas: usize,
    num_partitions: usize,
    device_assignment: Arc<DeviceAssignment>,
    parameter_is_tupled_arguments: bool,
    num_arguments: usize,
    generated_code_size: u64,

    // Cached so the execution path never walks the buffer assignment.
    /// Allocation holding the whole result.
    result_buffer_index: AllocationIndex,

    /// Allocation holding each top-level result element.
    result_buffer_indices: Vec<AllocationIndex>,

    /// Argument positions aliased with some result.
    parameters_that_must_be_donated: HashSet<usize>,

    /// Slots of the assignment run by this process. On a single host without
    /// partitioning this is every replica, `(i, 0)` for each `i`.
    addressable_device_logical_ids: Vec<LogicalDeviceIds>,

    /// `addressable_devices[i]` runs `addressable_device_logical_ids[i]`.
    addressable_devices: Vec<Arc<CpuDevice>>,
}

impl ExecutableMetadata {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_replicas(&self) -> usize {
        self.num_replicas
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn device_assignment(&self) -> &DeviceAssignment {
        &self.device_assignment
    }

    pub fn parameter_is_tupled_arguments(&self) -> bool {
        self.parameter_is_tupled_arguments
    }

    /// Number of positional arguments each execution takes.
    pub fn num_arguments(&self) -> usize {
        self.num_arguments
    }

    pub fn size_of_generated_code_in_bytes(&self) -> u64 {
        self.generated_code_size
    }

    pub fn result_buffer_index(&self) -> AllocationIndex {
        self.result_buffer_index
    }

    pub fn result_buffer_indices(&self) -> &[AllocationIndex] {
        &self.result_buffer_indices
    }

    pub fn parameters_that_must_be_donated(&self) -> &HashSet<usize> {
        &self.parameters_that_must_be_donated
    }

    /// Whether the argument at `parameter` is destroyed by every execution.
    pub fn must_donate_parameter(&self, parameter: usize) -> bool {
        self.parameters_that_must_be_donated.contains(&parameter)
    }

    pub fn addressable_device_logical_ids(&self) -> &[LogicalDeviceIds] {
        &self.addressable_device_logical_ids
    }

    pub fn addressable_devices(&self) -> &[Arc<CpuDevice>] {
        &self.addressable_devices
    }
}

/// A compiled program ready to execute on its assigned devices.
pub struct Executable {
    metadata: Arc<ExecutableMetadata>,

    /// `None` once deleted.
    program: RwLock<Option<Arc<CompiledProgram>>>,

    client: Arc<ClientShared>,
}

impl Executable {
    /// Wrap a compiled program, deriving result locations, the donation set
    /// and the addressable slots.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the alias config is inconsistent with
    /// the argument convention, if an assigned device is unknown, or if no
    /// slot of the assignment is addressable from this process. Returns
    /// `Internal` if the buffer assignment does not pin down the results.
    pub(crate) fn new(
        program: CompiledProgram,
        device_assignment: Arc<DeviceAssignment>,
        parameter_is_tupled_arguments: bool,
        client: Arc<ClientShared>,
    ) -> Result<Self> {
        let buffers = &program.buffer_assignment;
        let result_buffer_index = buffers.unique_top_level_output_slice()?;
        let result_buffer_indices = match program.result_shape.tuple_shapes() {
            Some(elements) => (0..elements.len())
                .map(|i| buffers.unique_slice(&ShapeIndex::new(vec![i])))
                .collect::<ferrite_core::Result<Vec<_>>>()?,
            None => vec![result_buffer_index],
        };

        let num_arguments =
            donation::entry_argument_count(&program, parameter_is_tupled_arguments)?;
        let parameters_that_must_be_donated =
            donation::parameters_that_must_be_donated(&program, parameter_is_tupled_arguments)?;

        let registry = &client.registry;
        let mut addressable_device_logical_ids = Vec::new();
        let mut addressable_devices = Vec::new();
        for (logical_ids, device_id) in device_assignment.iter() {
            let device = registry.lookup_device(device_id)?;
            if !registry.is_addressable(device) {
                continue;
            }
            addressable_device_logical_ids.push(logical_ids);
            addressable_devices.push(Arc::clone(device));
        }
        if addressable_devices.is_empty() {
            return Err(RuntimeError::InvalidArgument(format!(
                "device assignment has no devices addressable by process {}:\n{device_assignment}",
                registry.process_index()
            )));
        }

        let metadata = ExecutableMetadata {
            name: program.name.clone(),
            num_replicas: device_assignment.replica_count(),
            num_partitions: device_assignment.computation_count(),
            device_assignment,
            parameter_is_tupled_arguments,
            num_arguments,
            generated_code_size: program.generated_code_size,
            result_buffer_index,
            result_buffer_indices,
            parameters_that_must_be_donated,
            addressable_device_logical_ids,
            addressable_devices,
        };
        tracing::debug!(
            name = %metadata.name,
            donated = ?metadata.parameters_that_must_be_donated,
            addressable = metadata.addressable_devices.len(),
            "created executable"
        );

        Ok(Self {
            metadata: Arc::new(metadata),
            program: RwLock::new(Some(Arc::new(program))),
            client,
        })
    }

    /// Shared handle to the derived metadata; stays valid after deletion.
    pub fn metadata(&self) -> Arc<ExecutableMetadata> {
        Arc::clone(&self.metadata)
    }

    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    pub fn num_replicas(&self) -> usize {
        self.metadata.num_replicas()
    }

    pub fn num_partitions(&self) -> usize {
        self.metadata.num_partitions()
    }

    pub fn device_assignment(&self) -> &DeviceAssignment {
        self.metadata.device_assignment()
    }

    pub fn addressable_device_logical_ids(&self) -> &[LogicalDeviceIds] {
        self.metadata.addressable_device_logical_ids()
    }

    pub fn addressable_devices(&self) -> &[Arc<CpuDevice>] {
        self.metadata.addressable_devices()
    }

    pub fn result_buffer_index(&self) -> AllocationIndex {
        self.metadata.result_buffer_index()
    }

    pub fn result_buffer_indices(&self) -> &[AllocationIndex] {
        self.metadata.result_buffer_indices()
    }

    pub fn parameters_that_must_be_donated(&self) -> &HashSet<usize> {
        self.metadata.parameters_that_must_be_donated()
    }

    pub fn must_donate_parameter(&self, parameter: usize) -> bool {
        self.metadata.must_donate_parameter(parameter)
    }

    pub fn size_of_generated_code_in_bytes(&self) -> u64 {
        self.metadata.size_of_generated_code_in_bytes()
    }

    /// Stable fingerprint of the compiled code; this platform has none.
    pub fn fingerprint(&self) -> Option<String> {
        None
    }

    /// The compiled program, unless deleted.
    pub fn compiled_program(&self) -> Option<Arc<CompiledProgram>> {
        self.program
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Release the compiled program. Executions already running keep their
    /// own references; later executions fail.
    pub fn delete(&self) {
        let released = self
            .program
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if released.is_some() {
            tracing::debug!(name = %self.name(), "deleted executable");
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.compiled_program().is_none()
    }

    fn live_program(&self) -> Result<Arc<CompiledProgram>> {
        self.compiled_program().ok_or_else(|| {
            RuntimeError::InvalidArgument(format!("executable '{}' has been deleted", self.name()))
        })
    }

    /// Run the slot `(replica, partition)` of the device assignment.
    #[tracing::instrument(
        skip_all,
        fields(executable = %self.name(), replica = replica, partition = partition)
    )]
    pub fn execute_on(
        &self,
        arguments: &[&DeviceBuffer],
        replica: usize,
        partition: usize,
        options: &ExecuteOptions,
    ) -> Result<Vec<DeviceBuffer>> {
        let program = self.live_program()?;
        let metadata = Arc::clone(&self.metadata);

        let device_id = metadata
            .device_assignment
            .get(replica, partition)
            .ok_or_else(|| {
                RuntimeError::InvalidArgument(format!(
                    "replica {replica}, partition {partition} is outside the \
                     {}x{} device assignment",
                    metadata.num_replicas, metadata.num_partitions
                ))
            })?;
        let device = Arc::clone(self.client.registry.lookup_device(device_id)?);
        if !self.client.registry.is_addressable(&device) {
            return Err(RuntimeError::InvalidArgument(format!(
                "device {device} assigned to replica {replica}, partition {partition} \
                 is not addressable by this process"
            )));
        }

        self.execute_helper(
            &program,
            &metadata,
            arguments,
            LogicalDeviceIds::new(replica, partition),
            &device,
            options,
        )
    }

    /// Run every addressable slot, one argument list per addressable device.
    ///
    /// Every argument list is validated before any slot starts, so a bad
    /// list leaves every buffer untouched. Slots run concurrently when there
    /// is more than one. Results are returned in `addressable_devices()`
    /// order.
    #[tracing::instrument(skip_all, fields(executable = %self.name()))]
    pub fn execute(
        &self,
        argument_handles: &[Vec<&DeviceBuffer>],
        options: &ExecuteOptions,
    ) -> Result<Vec<Vec<DeviceBuffer>>> {
        let program = self.live_program()?;
        let metadata = Arc::clone(&self.metadata);

        let num_addressable = metadata.addressable_devices.len();
        if argument_handles.len() != num_addressable {
            return Err(RuntimeError::InvalidArgument(format!(
                "attempted to execute with {} argument lists when the local device count is \
                 {num_addressable} (total replica count: {}, partition count: {})",
                argument_handles.len(),
                metadata.num_replicas,
                metadata.num_partitions
            )));
        }

        // Reject the whole launch before any device takes over a buffer.
        for ((device, &logical_ids), arguments) in metadata
            .addressable_devices
            .iter()
            .zip(&metadata.addressable_device_logical_ids)
            .zip(argument_handles)
        {
            validate_launch(&metadata, arguments, logical_ids, device, options)?;
        }

        if num_addressable == 1 {
            let outputs = self.execute_helper(
                &program,
                &metadata,
                &argument_handles[0],
                metadata.addressable_device_logical_ids[0],
                &metadata.addressable_devices[0],
                options,
            )?;
            return Ok(vec![outputs]);
        }

        let results: Vec<Result<Vec<DeviceBuffer>>> = std::thread::scope(|scope| {
            let launches: Vec<_> = metadata
                .addressable_devices
                .iter()
                .zip(&metadata.addressable_device_logical_ids)
                .zip(argument_handles)
                .map(|((device, &logical_ids), arguments)| {
                    let (program, metadata) = (&program, &metadata);
                    scope.spawn(move || {
                        self.execute_helper(
                            program,
                            metadata,
                            arguments,
                            logical_ids,
                            device,
                            options,
                        )
                    })
                })
                .collect();

            launches
                .into_iter()
                .map(|launch| {
                    launch.join().unwrap_or_else(|_| {
                        Err(RuntimeError::Internal("execution thread panicked".to_string()))
                    })
                })
                .collect()
        });

        results.into_iter().collect()
    }

    /// Run the slot assigned to `device`.
    pub fn execute_sharded(
        &self,
        arguments: &[&DeviceBuffer],
        device: DeviceId,
        options: &ExecuteOptions,
    ) -> Result<Vec<DeviceBuffer>> {
        let program = self.live_program()?;
        let metadata = Arc::clone(&self.metadata);

        let position = metadata
            .addressable_devices
            .iter()
            .position(|d| d.id() == device)
            .ok_or_else(|| {
                RuntimeError::InvalidArgument(format!(
                    "execute_sharded attempted to execute on device id {device} \
                     which is not addressable by this executable"
                ))
            })?;

        let target = Arc::clone(&metadata.addressable_devices[position]);
        self.execute_helper(
            &program,
            &metadata,
            arguments,
            metadata.addressable_device_logical_ids[position],
            &target,
            options,
        )
    }

    /// Run a portable executable on an arbitrary device.
    ///
    /// Executables on this platform are always compiled against a device
    /// assignment, so this always fails.
    pub fn execute_portable(
        &self,
        _arguments: &[&DeviceBuffer],
        device: DeviceId,
        _options: &ExecuteOptions,
    ) -> Result<Vec<DeviceBuffer>> {
        Err(RuntimeError::InvalidArgument(format!(
            "execute_portable on device {device} requires a portable executable, \
             but '{}' was compiled with a device assignment",
            self.name()
        )))
    }

    fn execute_helper(
        &self,
        program: &CompiledProgram,
        metadata: &ExecutableMetadata,
        arguments: &[&DeviceBuffer],
        logical_ids: LogicalDeviceIds,
        device: &CpuDevice,
        options: &ExecuteOptions,
    ) -> Result<Vec<DeviceBuffer>> {
        validate_launch(metadata, arguments, logical_ids, device, options)?;

        // Held until the engine returns, on success and on failure.
        let _permit = device.max_inflight_computations_semaphore().acquire_blocking();
        let inputs =
            donation::prepare_inputs(arguments, &metadata.parameters_that_must_be_donated)?;

        let ctx = ExecutionContext {
            device,
            logical_ids,
            run_id: RunId::new(),
            launch_id: options.launch_id,
            parameter_is_tupled_arguments: metadata.parameter_is_tupled_arguments,
            result_buffer_indices: &metadata.result_buffer_indices,
            intra_op_pool: &self.client.intra_op_pool,
        };
        tracing::debug!(run_id = ctx.run_id.value(), device = %device, %logical_ids, "launching");

        let outputs = self.client.engine.run(program, &ctx, inputs)?;
        if outputs.len() != metadata.result_buffer_indices.len() {
            return Err(RuntimeError::Internal(format!(
                "engine returned {} results for '{}', expected {}",
                outputs.len(),
                metadata.name,
                metadata.result_buffer_indices.len()
            )));
        }
        Ok(outputs)
    }
}

fn validate_launch(
    metadata: &ExecutableMetadata,
    arguments: &[&DeviceBuffer],
    logical_ids: LogicalDeviceIds,
    device: &CpuDevice,
    options: &ExecuteOptions,
) -> Result<()> {
    let target = ArgumentTarget {
        device: device.id(),
        replica: logical_ids.replica,
    };
    donation::validate_arguments(
        arguments,
        &metadata.parameters_that_must_be_donated,
        metadata.num_arguments,
        &target,
        options,
    )
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executable")
            .field("name", &self.name())
            .field("num_replicas", &self.num_replicas())
            .field("num_partitions", &self.num_partitions())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
