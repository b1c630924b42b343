//! Options for compiling and executing programs.

use crate::assignment::DeviceAssignment;
use std::collections::HashSet;

/// How an executable is laid out across devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableBuildOptions {
    /// Number of data-parallel replicas.
    pub num_replicas: usize,

    /// Number of model-parallel partitions per replica.
    pub num_partitions: usize,

    /// Explicit placement; when absent the client's default assignment is used.
    pub device_assignment: Option<DeviceAssignment>,
}

impl Default for ExecutableBuildOptions {
    fn default() -> Self {
        Self {
            num_replicas: 1,
            num_partitions: 1,
            device_assignment: None,
        }
    }
}

impl ExecutableBuildOptions {
    pub fn with_num_replicas(mut self, num_replicas: usize) -> Self {
        self.num_replicas = num_replicas;
        self
    }

    pub fn with_num_partitions(mut self, num_partitions: usize) -> Self {
        self.num_partitions = num_partitions;
        self
    }

    pub fn with_device_assignment(mut self, assignment: DeviceAssignment) -> Self {
        self.device_assignment = Some(assignment);
        self
    }
}

/// Options passed to `compile`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub build_options: ExecutableBuildOptions,

    /// Whether the entry takes a single tuple parameter whose elements are
    /// supplied as separate arguments.
    pub parameter_is_tupled_arguments: bool,
}

impl CompileOptions {
    pub fn with_build_options(mut self, build_options: ExecutableBuildOptions) -> Self {
        self.build_options = build_options;
        self
    }

    pub fn with_tupled_arguments(mut self, tupled: bool) -> Self {
        self.parameter_is_tupled_arguments = tupled;
        self
    }
}

/// Options passed to each execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Identifier shared by all launches of one multi-device execution.
    pub launch_id: i32,

    /// Argument positions the caller requires to stay intact. Listing a
    /// position whose parameter must be donated is an error.
    pub non_donatable_input_indices: HashSet<usize>,
}

impl ExecuteOptions {
    pub fn with_launch_id(mut self, launch_id: i32) -> Self {
        self.launch_id = launch_id;
        self
    }

    pub fn with_non_donatable_inputs(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.non_donatable_input_indices.extend(indices);
        self
    }
}
