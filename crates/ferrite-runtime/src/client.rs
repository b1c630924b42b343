//! The host CPU client: main entry point of the runtime.

use crate::buffer::{DeviceBuffer, HostBufferSemantics};
use crate::capability::{Capability, CapabilityTable, HOST_CPU_CAPABILITIES};
use crate::config::ClientOptions;
use crate::device::CpuDevice;
use crate::engine::{Compiler, ExecutionEngine};
use crate::error::{Result, RuntimeError};
use crate::executable::Executable;
use crate::host::{HostCompiler, HostEngine};
use crate::placement::ComputationPlacer;
use crate::registry::DeviceRegistry;
use ferrite_core::{ChannelHandle, CompileOptions, DeviceAssignment, DeviceId, Program, Shape};
use std::sync::Arc;

/// Platform name reported by [`CpuClient::platform_name`].
pub const CPU_PLATFORM_NAME: &str = "cpu";

/// Stable 64-bit fingerprint of [`CPU_PLATFORM_NAME`].
pub const CPU_PLATFORM_ID: u64 = fingerprint64(CPU_PLATFORM_NAME.as_bytes());

/// FNV-1a over `bytes`.
const fn fingerprint64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

/// State shared between a client and every executable it compiled.
pub(crate) struct ClientShared {
    pub(crate) registry: DeviceRegistry,
    pub(crate) engine: Arc<dyn ExecutionEngine>,
    pub(crate) intra_op_pool: rayon::ThreadPool,
}

/// A client for the host CPU platform.
///
/// Owns the devices, compiles programs into [`Executable`]s and hands them
/// the engine and intra-op pool they execute with.
///
/// # Example
/// ```
/// use ferrite_core::{CompileOptions, DataType, Program, Shape};
/// use ferrite_runtime::{ClientOptions, CpuClient};
///
/// let client = CpuClient::new(ClientOptions::default().with_device_count(2))?;
/// let vector = Shape::array(DataType::F32, &[8]);
/// let program = Program::new("identity", vec![vector.clone()], vector);
/// let executable = client.compile(&program, &CompileOptions::default())?;
/// assert_eq!(executable.addressable_devices().len(), 1);
/// # Ok::<(), ferrite_runtime::RuntimeError>(())
/// ```
pub struct CpuClient {
    shared: Arc<ClientShared>,
    placer: ComputationPlacer,
    compiler: Arc<dyn Compiler>,
    options: ClientOptions,
}

impl CpuClient {
    /// Create a client backed by the host reference compiler and engine.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for unusable options.
    pub fn new(options: ClientOptions) -> Result<Self> {
        Self::with_backends(options, Arc::new(HostCompiler::new()), Arc::new(HostEngine::new()))
    }

    /// Create a client whose devices are enumerated from `options`, using the
    /// given compiler and engine.
    pub fn with_backends(
        options: ClientOptions,
        compiler: Arc<dyn Compiler>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Result<Self> {
        options.validate()?;
        let devices = options.enumerate_devices();
        Self::from_devices(options, devices, compiler, engine)
    }

    /// Create a client over an explicit device list, which may include
    /// devices owned by other processes. `options.device_count` is ignored.
    pub fn from_devices(
        options: ClientOptions,
        devices: Vec<CpuDevice>,
        compiler: Arc<dyn Compiler>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Result<Self> {
        if options.intra_op_threads == Some(0) {
            return Err(RuntimeError::InvalidArgument(
                "intra-op thread count must be positive".to_string(),
            ));
        }
        let registry = DeviceRegistry::new(options.process_index, devices)?;

        let threads = options.intra_op_threads();
        let intra_op_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ferrite-intra-op-{i}"))
            .build()
            .map_err(|e| {
                RuntimeError::Internal(format!("failed to build intra-op thread pool: {e}"))
            })?;

        tracing::debug!(
            process_index = registry.process_index(),
            devices = registry.device_count(),
            addressable = registry.addressable_device_count(),
            intra_op_threads = threads,
            "created cpu client"
        );

        Ok(Self {
            shared: Arc::new(ClientShared {
                registry,
                engine,
                intra_op_pool,
            }),
            placer: ComputationPlacer::new(),
            compiler,
            options,
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.shared.registry
    }

    pub fn process_index(&self) -> usize {
        self.shared.registry.process_index()
    }

    pub fn device_count(&self) -> usize {
        self.shared.registry.device_count()
    }

    pub fn addressable_device_count(&self) -> usize {
        self.shared.registry.addressable_device_count()
    }

    pub fn devices(&self) -> &[Arc<CpuDevice>] {
        self.shared.registry.devices()
    }

    pub fn addressable_devices(&self) -> &[Arc<CpuDevice>] {
        self.shared.registry.addressable_devices()
    }

    pub fn lookup_device(&self, id: DeviceId) -> Result<&Arc<CpuDevice>> {
        self.shared.registry.lookup_device(id)
    }

    pub fn lookup_addressable_device(&self, local_hardware_id: u32) -> Result<&Arc<CpuDevice>> {
        self.shared.registry.lookup_addressable_device(local_hardware_id)
    }

    pub fn platform_name(&self) -> &'static str {
        CPU_PLATFORM_NAME
    }

    pub fn platform_id(&self) -> u64 {
        CPU_PLATFORM_ID
    }

    pub fn platform_version(&self) -> &'static str {
        "<unknown>"
    }

    pub fn capabilities(&self) -> CapabilityTable {
        HOST_CPU_CAPABILITIES
    }

    pub fn supports(&self, capability: Capability) -> bool {
        HOST_CPU_CAPABILITIES.supports(capability)
    }

    /// Thread pool shared by every execution on this client.
    pub fn intra_op_pool(&self) -> &rayon::ThreadPool {
        &self.shared.intra_op_pool
    }

    /// Placement used when a compile request names no assignment.
    pub fn default_device_assignment(
        &self,
        num_replicas: usize,
        num_partitions: usize,
    ) -> Result<DeviceAssignment> {
        self.placer
            .assign_devices(&self.shared.registry, num_replicas, num_partitions)
    }

    /// Compile `program` and bind it to a device assignment.
    ///
    /// The assignment comes from the build options when present, otherwise
    /// from [`default_device_assignment`](Self::default_device_assignment).
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an unusable assignment or alias config,
    /// and passes compiler failures through as `Compile`.
    #[tracing::instrument(skip_all, fields(program = program.name()))]
    pub fn compile(&self, program: &Program, options: &CompileOptions) -> Result<Executable> {
        HOST_CPU_CAPABILITIES.check(Capability::Compile)?;

        let build = &options.build_options;
        let assignment = match &build.device_assignment {
            Some(assignment) => {
                self.validate_assignment(assignment, build.num_replicas, build.num_partitions)?;
                assignment.clone()
            }
            None => self.default_device_assignment(build.num_replicas, build.num_partitions)?,
        };

        let compiled = self.compiler.compile(program, options)?;
        let executable = Executable::new(
            compiled,
            Arc::new(assignment),
            options.parameter_is_tupled_arguments,
            Arc::clone(&self.shared),
        )?;

        tracing::debug!(
            num_replicas = executable.num_replicas(),
            num_partitions = executable.num_partitions(),
            donated = executable.parameters_that_must_be_donated().len(),
            "compiled executable"
        );
        Ok(executable)
    }

    /// Fingerprint of an executable's compiled code; this platform has none.
    pub fn executable_fingerprint(&self, executable: &Executable) -> Option<String> {
        executable.fingerprint()
    }

    fn validate_assignment(
        &self,
        assignment: &DeviceAssignment,
        num_replicas: usize,
        num_partitions: usize,
    ) -> Result<()> {
        if assignment.replica_count() != num_replicas
            || assignment.computation_count() != num_partitions
        {
            return Err(RuntimeError::InvalidArgument(format!(
                "device assignment is {}x{} but the build options ask for \
                 {num_replicas} replicas x {num_partitions} partitions",
                assignment.replica_count(),
                assignment.computation_count()
            )));
        }
        for (logical_ids, device) in assignment.iter() {
            if self.shared.registry.lookup_device(device).is_err() {
                return Err(RuntimeError::InvalidArgument(format!(
                    "device assignment places {logical_ids} on unknown device {device}"
                )));
            }
        }
        Ok(())
    }

    pub fn create_uninitialized_buffer(
        &self,
        _shape: &Shape,
        _device: DeviceId,
    ) -> Result<DeviceBuffer> {
        Err(HOST_CPU_CAPABILITIES.unsupported(Capability::CreateUninitializedBuffer))
    }

    pub fn buffer_from_host_buffer(
        &self,
        _data: &[u8],
        _shape: &Shape,
        _semantics: HostBufferSemantics,
        _device: DeviceId,
    ) -> Result<DeviceBuffer> {
        Err(HOST_CPU_CAPABILITIES.unsupported(Capability::BufferFromHostBuffer))
    }

    pub fn buffer_from_host_literal(
        &self,
        _literal: &[u8],
        _shape: &Shape,
        _device: DeviceId,
    ) -> Result<DeviceBuffer> {
        Err(HOST_CPU_CAPABILITIES.unsupported(Capability::BufferFromHostLiteral))
    }

    pub fn make_cross_host_receive_buffers(
        &self,
        _shapes: &[Shape],
        _device: DeviceId,
    ) -> Result<Vec<DeviceBuffer>> {
        Err(HOST_CPU_CAPABILITIES.unsupported(Capability::CrossHostReceiveBuffers))
    }

    pub fn create_view_of_device_buffer(
        &self,
        _address: usize,
        _shape: &Shape,
        _device: DeviceId,
    ) -> Result<DeviceBuffer> {
        Err(HOST_CPU_CAPABILITIES.unsupported(Capability::ViewOfDeviceBuffer))
    }

    pub fn create_channel_handle(&self) -> Result<ChannelHandle> {
        Err(HOST_CPU_CAPABILITIES.unsupported(Capability::ChannelHandle))
    }

    pub fn create_device_to_host_channel_handle(&self) -> Result<ChannelHandle> {
        Err(HOST_CPU_CAPABILITIES.unsupported(Capability::DeviceToHostChannelHandle))
    }

    pub fn create_host_to_device_channel_handle(&self) -> Result<ChannelHandle> {
        Err(HOST_CPU_CAPABILITIES.unsupported(Capability::HostToDeviceChannelHandle))
    }

    pub fn defragment(&self) -> Result<()> {
        Err(HOST_CPU_CAPABILITIES.unsupported(Capability::Defragment))
    }
}

impl std::fmt::Debug for CpuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuClient")
            .field("process_index", &self.process_index())
            .field("device_count", &self.device_count())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Create a host CPU client with default options.
///
/// `asynchronous` selects the default in-flight limit per device.
pub fn get_cpu_client(asynchronous: bool) -> Result<CpuClient> {
    CpuClient::new(ClientOptions::default().with_asynchronous(asynchronous))
}
