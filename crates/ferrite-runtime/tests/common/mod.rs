//! Common test utilities for runtime integration tests.
//!
//! Provides program builders and instrumented execution engines shared by
//! the test files in this directory.

#![allow(dead_code)]

use ferrite_core::{
    CompiledProgram, DataType, DeviceId, LogicalDeviceIds, Program, Shape, ShapeIndex,
};
use ferrite_runtime::{
    ClientOptions, CpuClient, DeviceBuffer, ExecutionContext, ExecutionEngine, ExecutionError,
    ExecutionInput, HostCompiler, HostEngine,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Shape used by every fixture program: `f32[4]`.
pub fn vector() -> Shape {
    Shape::array(DataType::F32, &[4])
}

/// `(a, b) -> c` with no aliasing.
pub fn binary_program() -> Program {
    Program::new("binary", vec![vector(), vector()], vector())
}

/// `(a, b, state) -> state'` where the result aliases parameter 2.
pub fn update_program() -> Program {
    Program::new("update", vec![vector(), vector(), vector()], vector())
        .with_alias(ShapeIndex::root(), 2, ShapeIndex::root())
        .expect("parameter 2 exists and matches the result shape")
}

/// `((a, b, c)) -> (x, y)` taking its arguments as one tuple, where result
/// element 0 aliases tuple element 1.
pub fn tupled_program() -> Program {
    let parameter = Shape::tuple(vec![vector(), vector(), vector()]);
    let result = Shape::tuple(vec![vector(), vector()]);
    Program::new("tupled", vec![parameter], result)
        .with_alias(ShapeIndex::new(vec![0]), 0, ShapeIndex::new(vec![1]))
        .expect("tuple element 1 matches result element 0")
}

/// A client over `device_count` local devices with the given engine.
/// Route runtime logs to the test harness. `RUST_LOG` picks the level.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub fn client_with(
    engine: Arc<dyn ExecutionEngine>,
    device_count: usize,
    max_inflight: usize,
) -> CpuClient {
    init_tracing();
    let options = ClientOptions::default()
        .with_device_count(device_count)
        .with_max_inflight(max_inflight)
        .with_intra_op_threads(2);
    CpuClient::with_backends(options, Arc::new(HostCompiler::new()), engine)
        .expect("valid client options")
}

/// Zero-filled `f32[4]` buffers on `device`.
pub fn buffers(device: DeviceId, count: usize) -> Vec<DeviceBuffer> {
    (0..count)
        .map(|_| DeviceBuffer::zeroed(device, vector()))
        .collect()
}

/// What an engine saw on one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub device: DeviceId,
    pub logical_ids: LogicalDeviceIds,
    /// Slots taken on the run's device while the engine ran.
    pub in_flight: usize,
    pub donated: Vec<bool>,
}

/// Delegates to [`HostEngine`] and records each run.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    records: Mutex<Vec<RunRecord>>,
}

impl RecordingEngine {
    pub fn records(&self) -> Vec<RunRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl ExecutionEngine for RecordingEngine {
    fn run(
        &self,
        program: &CompiledProgram,
        ctx: &ExecutionContext<'_>,
        inputs: Vec<ExecutionInput>,
    ) -> Result<Vec<DeviceBuffer>, ExecutionError> {
        self.records.lock().unwrap().push(RunRecord {
            device: ctx.device.id(),
            logical_ids: ctx.logical_ids,
            in_flight: ctx.device.max_inflight_computations_semaphore().in_flight(),
            donated: inputs.iter().map(ExecutionInput::is_donated).collect(),
        });
        HostEngine::new().run(program, ctx, inputs)
    }
}

/// Always fails.
#[derive(Debug, Default)]
pub struct FailingEngine {
    pub runs: AtomicUsize,
}

impl ExecutionEngine for FailingEngine {
    fn run(
        &self,
        program: &CompiledProgram,
        _ctx: &ExecutionContext<'_>,
        _inputs: Vec<ExecutionInput>,
    ) -> Result<Vec<DeviceBuffer>, ExecutionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Err(ExecutionError(format!("{} exploded", program.name)))
    }
}

/// Holds every run until [`BlockingEngine::release`] is called.
#[derive(Debug, Default)]
pub struct BlockingEngine {
    started: Mutex<usize>,
    started_cv: Condvar,
    released: Mutex<bool>,
    released_cv: Condvar,
}

impl BlockingEngine {
    /// Wait until `count` runs have entered the engine.
    pub fn wait_for_started(&self, count: usize) {
        let started = self.started.lock().unwrap();
        let (_started, timeout) = self
            .started_cv
            .wait_timeout_while(started, Duration::from_secs(10), |started| *started < count)
            .unwrap();
        assert!(!timeout.timed_out(), "engine never saw {count} runs");
    }

    pub fn started(&self) -> usize {
        *self.started.lock().unwrap()
    }

    pub fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.released_cv.notify_all();
    }
}

impl ExecutionEngine for BlockingEngine {
    fn run(
        &self,
        program: &CompiledProgram,
        ctx: &ExecutionContext<'_>,
        inputs: Vec<ExecutionInput>,
    ) -> Result<Vec<DeviceBuffer>, ExecutionError> {
        *self.started.lock().unwrap() += 1;
        self.started_cv.notify_all();

        let released = self.released.lock().unwrap();
        let _released = self
            .released_cv
            .wait_while(released, |released| !*released)
            .unwrap();

        HostEngine::new().run(program, ctx, inputs)
    }
}
