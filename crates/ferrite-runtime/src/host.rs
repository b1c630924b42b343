//! Host reference compiler and engine.
//!
//! These implement the collaborator traits without any numerics so the
//! dispatch layer can be driven end to end. The compiler only plans buffers;
//! the engine only materializes result buffers, reusing donated storage
//! where the program aliases a result with a parameter.

use crate::buffer::DeviceBuffer;
use crate::engine::{Compiler, ExecutionContext, ExecutionEngine, ExecutionInput};
use crate::error::{CompileError, ExecutionError};
use ferrite_core::{
    AllocationKind, BufferAssignment, CompileOptions, CompiledProgram, Program, Shape, ShapeIndex,
};
use rayon::prelude::*;
use std::collections::HashMap;

/// Plans a buffer assignment for a program without generating code.
///
/// Every parameter sub-value gets its own allocation. Result sub-values that
/// alias a parameter reuse that parameter's allocation; all others get a
/// fresh output allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCompiler;

impl HostCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl Compiler for HostCompiler {
    #[tracing::instrument(skip_all, fields(program = program.name()))]
    fn compile(
        &self,
        program: &Program,
        options: &CompileOptions,
    ) -> Result<CompiledProgram, CompileError> {
        if options.parameter_is_tupled_arguments
            && !matches!(program.parameters(), [parameter] if parameter.is_tuple())
        {
            return Err(CompileError(format!(
                "'{}' must take a single tuple parameter to use tupled arguments",
                program.name()
            )));
        }

        let mut assignment = BufferAssignment::new();
        let mut parameter_allocations = HashMap::new();
        for (number, parameter) in program.parameters().iter().enumerate() {
            for (index, shape) in parameter.subshapes() {
                let allocation = assignment.add_allocation(
                    checked_size(shape)?,
                    AllocationKind::Parameter {
                        number,
                        index: index.clone(),
                    },
                );
                parameter_allocations.insert((number, index), allocation);
            }
        }

        for (output_index, shape) in program.result().subshapes() {
            let size = checked_size(shape)?;
            let allocation = match program.alias_config().get_aliased_parameter(&output_index) {
                Some(alias) => *parameter_allocations
                    .get(&(alias.parameter_number, alias.parameter_index.clone()))
                    .ok_or_else(|| {
                        CompileError(format!(
                            "output {output_index} aliases unknown parameter {} at {}",
                            alias.parameter_number, alias.parameter_index
                        ))
                    })?,
                None => assignment.add_allocation(size, AllocationKind::Output),
            };
            assignment
                .assign_output(output_index, allocation)
                .map_err(|e| CompileError(e.to_string()))?;
        }

        tracing::debug!(
            allocations = assignment.allocations().len(),
            aliases = program.alias_config().len(),
            "planned buffer assignment"
        );

        Ok(CompiledProgram {
            name: program.name().to_string(),
            parameter_shapes: program.parameters().to_vec(),
            result_shape: program.result().clone(),
            alias_config: program.alias_config().clone(),
            buffer_assignment: assignment,
            generated_code_size: 0,
        })
    }
}

/// Produces result buffers for a compiled program.
///
/// A result element aliased with a donated argument takes over that
/// argument's storage; every other result is zero-filled on the intra-op
/// pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostEngine;

impl HostEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionEngine for HostEngine {
    fn run(
        &self,
        program: &CompiledProgram,
        ctx: &ExecutionContext<'_>,
        mut inputs: Vec<ExecutionInput>,
    ) -> Result<Vec<DeviceBuffer>, ExecutionError> {
        let outputs: Vec<(ShapeIndex, &Shape)> = match program.result_shape.tuple_shapes() {
            Some(elements) => elements
                .iter()
                .enumerate()
                .map(|(i, shape)| (ShapeIndex::new(vec![i]), shape))
                .collect(),
            None => vec![(ShapeIndex::root(), &program.result_shape)],
        };
        if outputs.len() != ctx.result_buffer_indices.len() {
            return Err(ExecutionError(format!(
                "'{}' produces {} results but {} result buffers were planned",
                program.name,
                outputs.len(),
                ctx.result_buffer_indices.len()
            )));
        }

        let device = ctx.device.id();
        let mut reused: Vec<Option<DeviceBuffer>> = Vec::with_capacity(outputs.len());
        for (output_index, shape) in &outputs {
            let donated = program
                .alias_config
                .get_aliased_parameter(output_index)
                .and_then(|alias| alias.argument_position(ctx.parameter_is_tupled_arguments))
                .and_then(|position| inputs.get_mut(position))
                .and_then(|input| match input {
                    ExecutionInput::Donated(data) if data.len() == shape.byte_size() => {
                        Some(std::mem::take(data))
                    }
                    _ => None,
                });

            reused.push(match donated {
                Some(data) => Some(
                    DeviceBuffer::from_bytes(device, (*shape).clone(), data)
                        .map_err(|e| ExecutionError(e.to_string()))?,
                ),
                None => None,
            });
        }

        let results: Vec<DeviceBuffer> = ctx.intra_op_pool.install(|| {
            reused
                .into_par_iter()
                .zip(outputs.par_iter())
                .map(|(buffer, (_, shape))| {
                    buffer.unwrap_or_else(|| DeviceBuffer::zeroed(device, (*shape).clone()))
                })
                .collect()
        });

        tracing::trace!(run_id = ctx.run_id.value(), %device, "materialized results");
        Ok(results)
    }
}

fn checked_size(shape: &Shape) -> Result<usize, CompileError> {
    shape
        .checked_byte_size()
        .map_err(|e| CompileError(e.to_string()))
}
