//! Executable inspection: build a synthetic program, compile it and report
//! what the runtime derived from it.

use crate::AliasArg;
use anyhow::{Context, Result};
use ferrite_core::{CompileOptions, DataType, ExecutableBuildOptions, Program, Shape, ShapeIndex};
use ferrite_runtime::{CpuClient, Executable};
use std::fmt::Write;

/// Layout of the synthetic program to inspect.
#[derive(Debug, Clone)]
pub struct ProgramLayout {
    pub parameters: usize,
    pub results: usize,
    pub dtype: DataType,
    pub dims: Vec<usize>,
    pub aliases: Vec<AliasArg>,
    /// Pass the parameters as the elements of one tuple.
    pub tupled: bool,
}

impl ProgramLayout {
    /// Every parameter and result element has the same array shape. More
    /// than one result makes the result a tuple.
    pub fn build(&self) -> Result<Program> {
        let element = Shape::array(self.dtype, &self.dims);
        let elements = vec![element.clone(); self.parameters];
        let parameters = if self.tupled {
            vec![Shape::tuple(elements)]
        } else {
            elements
        };
        let result = match self.results {
            1 => element,
            n => Shape::tuple(vec![element; n]),
        };

        let mut program = Program::new("inspect", parameters, result);
        for alias in &self.aliases {
            let output_index = if self.results == 1 {
                ShapeIndex::root()
            } else {
                ShapeIndex::new(vec![alias.output])
            };
            let (number, index) = if self.tupled {
                (0, ShapeIndex::new(vec![alias.parameter]))
            } else {
                (alias.parameter, ShapeIndex::root())
            };
            program = program
                .with_alias(output_index, number, index)
                .with_context(|| {
                    format!(
                        "Cannot alias output {} with parameter {}",
                        alias.output, alias.parameter
                    )
                })?;
        }
        Ok(program)
    }
}

/// Compile `layout` with `replicas` replicas and describe the executable.
pub fn inspect_executable(
    client: &CpuClient,
    layout: &ProgramLayout,
    replicas: usize,
) -> Result<String> {
    let program = layout.build()?;
    let options = CompileOptions::default()
        .with_build_options(ExecutableBuildOptions::default().with_num_replicas(replicas))
        .with_tupled_arguments(layout.tupled);
    let executable = client
        .compile(&program, &options)
        .context("Failed to compile program")?;

    Ok(describe(&program, &executable))
}

fn describe(program: &Program, executable: &Executable) -> String {
    let mut out = String::new();
    let parameters: Vec<String> = program.parameters().iter().map(|p| p.to_string()).collect();
    let _ = writeln!(out, "Executable: {}", executable.name());
    let _ = writeln!(out, "  Parameters: ({})", parameters.join(", "));
    let _ = writeln!(out, "  Result: {}", program.result());
    let _ = writeln!(
        out,
        "  Replicas: {}, partitions: {}",
        executable.num_replicas(),
        executable.num_partitions()
    );

    let _ = writeln!(out, "  Addressable devices:");
    for (ids, device) in executable
        .addressable_device_logical_ids()
        .iter()
        .zip(executable.addressable_devices())
    {
        let _ = writeln!(out, "    {ids} -> {device}");
    }

    let _ = writeln!(out, "  Result buffer: {}", executable.result_buffer_index());
    let _ = writeln!(out, "  Result buffers: {:?}", executable.result_buffer_indices());

    let mut donated: Vec<usize> = executable
        .parameters_that_must_be_donated()
        .iter()
        .copied()
        .collect();
    donated.sort_unstable();
    if donated.is_empty() {
        let _ = writeln!(out, "  Donated arguments: (none)");
    } else {
        let _ = writeln!(out, "  Donated arguments: {donated:?}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_runtime::ClientOptions;

    fn layout() -> ProgramLayout {
        ProgramLayout {
            parameters: 3,
            results: 1,
            dtype: DataType::F32,
            dims: vec![4],
            aliases: vec![AliasArg {
                output: 0,
                parameter: 2,
            }],
            tupled: false,
        }
    }

    fn client() -> CpuClient {
        CpuClient::new(
            ClientOptions::default()
                .with_device_count(2)
                .with_intra_op_threads(1),
        )
        .unwrap()
    }

    #[test]
    fn test_inspect_reports_donation() {
        let report = inspect_executable(&client(), &layout(), 2).unwrap();
        assert!(report.contains("Donated arguments: [2]"), "{report}");
        assert!(report.contains("(replica 1, partition 0) -> HOST_CPU_1"), "{report}");
    }

    #[test]
    fn test_inspect_tupled() {
        let layout = ProgramLayout {
            results: 2,
            tupled: true,
            aliases: vec![AliasArg {
                output: 1,
                parameter: 0,
            }],
            ..layout()
        };
        let report = inspect_executable(&client(), &layout, 1).unwrap();
        assert!(report.contains("Donated arguments: [0]"), "{report}");
        assert!(report.contains("Result buffers: ["), "{report}");
    }

    #[test]
    fn test_inspect_rejects_bad_alias() {
        let layout = ProgramLayout {
            aliases: vec![AliasArg {
                output: 0,
                parameter: 7,
            }],
            ..layout()
        };
        assert!(inspect_executable(&client(), &layout, 1).is_err());
    }

    #[test]
    fn test_inspect_rejects_oversized_dims() {
        let layout = ProgramLayout {
            dims: vec![usize::MAX, 2],
            ..layout()
        };
        let err = inspect_executable(&client(), &layout, 1).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to compile"), "{err:#}");
    }
}
