//! Buffer donation: which parameters an executable destroys, and the checks
//! that keep callers from handing it buffers still aliased elsewhere.
//!
//! A parameter must be donated when the compiler aliased any part of it with
//! a result. The set is derived once from the compiled program's alias
//! config. At execution time every argument is validated against it before
//! any storage is touched, and only then are donated buffers taken over.

use crate::buffer::DeviceBuffer;
use crate::engine::ExecutionInput;
use crate::error::{Result, RuntimeError};
use ferrite_core::{CompiledProgram, DeviceId, ExecuteOptions};
use std::collections::HashSet;

/// Number of positional arguments the entry computation takes.
///
/// With tupled arguments the entry must have exactly one tuple parameter
/// and each of its elements is a separate argument.
pub fn entry_argument_count(program: &CompiledProgram, tuple_inputs: bool) -> Result<usize> {
    if !tuple_inputs {
        return Ok(program.parameter_shapes.len());
    }

    match program.parameter_shapes.as_slice() {
        [parameter] => parameter.tuple_shapes().map(<[_]>::len).ok_or_else(|| {
            RuntimeError::InvalidArgument(format!(
                "tupled arguments require a tuple parameter, '{}' takes {parameter}",
                program.name
            ))
        }),
        parameters => Err(RuntimeError::InvalidArgument(format!(
            "tupled arguments require exactly one entry parameter, '{}' takes {}",
            program.name,
            parameters.len()
        ))),
    }
}

/// Argument positions whose buffers the program aliases with some result.
///
/// If any buffer in a parameter is aliased, the entire parameter is donated.
pub fn parameters_that_must_be_donated(
    program: &CompiledProgram,
    tuple_inputs: bool,
) -> Result<HashSet<usize>> {
    let number_of_parameters = entry_argument_count(program, tuple_inputs)?;

    let mut parameters_to_donate = HashSet::new();
    for alias in program.alias_config.iter() {
        if tuple_inputs {
            if alias.parameter_number != 0 {
                return Err(RuntimeError::InvalidArgument(format!(
                    "unexpected parameter number {} in alias config with tupled inputs",
                    alias.parameter_number
                )));
            }
            // An alias of the whole tuple names no single argument.
            let Some(this_parameter) = alias.parameter_index.first() else {
                continue;
            };
            if this_parameter >= number_of_parameters {
                return Err(RuntimeError::InvalidArgument(format!(
                    "unexpected parameter index {} in alias config with tupled inputs \
                     and {number_of_parameters} parameters",
                    alias.parameter_index
                )));
            }
            parameters_to_donate.insert(this_parameter);
        } else {
            let this_parameter = alias.parameter_number;
            if this_parameter >= number_of_parameters {
                return Err(RuntimeError::InvalidArgument(format!(
                    "unexpected parameter number {this_parameter} in alias config \
                     with {number_of_parameters} parameters"
                )));
            }
            parameters_to_donate.insert(this_parameter);
        }
    }
    Ok(parameters_to_donate)
}

/// Where an execution is headed, for validation messages.
pub(crate) struct ArgumentTarget {
    pub device: DeviceId,
    pub replica: usize,
}

/// Check every argument before anything is touched.
pub(crate) fn validate_arguments(
    arguments: &[&DeviceBuffer],
    must_donate: &HashSet<usize>,
    expected_count: usize,
    target: &ArgumentTarget,
    options: &ExecuteOptions,
) -> Result<()> {
    if arguments.len() != expected_count {
        return Err(RuntimeError::InvalidArgument(format!(
            "execution supplied {} arguments but the program takes {expected_count}",
            arguments.len()
        )));
    }

    for (i, buffer) in arguments.iter().enumerate() {
        if buffer.device() != target.device {
            return Err(RuntimeError::InvalidArgument(format!(
                "buffer passed as argument {i} to replica {} is on device {}, \
                 but the replica is assigned to device {}",
                target.replica,
                buffer.device(),
                target.device
            )));
        }
        if buffer.is_deleted() {
            return Err(RuntimeError::InvalidArgument(format!(
                "deleted or donated buffer passed as argument {i} to replica {}",
                target.replica
            )));
        }
        if !must_donate.contains(&i) {
            continue;
        }
        if options.non_donatable_input_indices.contains(&i) {
            return Err(RuntimeError::InvalidArgument(format!(
                "argument {i} must be donated but is listed as non-donatable"
            )));
        }
        if let Some(j) = arguments
            .iter()
            .enumerate()
            .position(|(j, other)| j != i && std::ptr::eq(*other, *buffer))
        {
            return Err(RuntimeError::InvalidArgument(if must_donate.contains(&j) {
                format!("attempt to donate the same buffer twice (arguments {i} and {j})")
            } else {
                format!("buffer donated as argument {i} is also passed as argument {j}")
            }));
        }
    }
    Ok(())
}

/// Turn validated arguments into engine inputs, taking over donated storage.
///
/// If a buffer cannot be taken or shared, every donation already made is
/// undone before the error is returned.
pub(crate) fn prepare_inputs(
    arguments: &[&DeviceBuffer],
    must_donate: &HashSet<usize>,
) -> Result<Vec<ExecutionInput>> {
    let mut inputs = Vec::with_capacity(arguments.len());
    for (i, buffer) in arguments.iter().enumerate() {
        let input = if must_donate.contains(&i) {
            buffer.take_for_donation().map(ExecutionInput::Donated)
        } else {
            buffer.share().map(ExecutionInput::Borrowed)
        };

        match input {
            Ok(input) => inputs.push(input),
            Err(err) => {
                tracing::warn!(argument = i, %err, "rolling back donations");
                rollback(arguments, inputs);
                return Err(err);
            }
        }
    }
    Ok(inputs)
}

fn rollback(arguments: &[&DeviceBuffer], inputs: Vec<ExecutionInput>) {
    for (buffer, input) in arguments.iter().zip(inputs) {
        if let ExecutionInput::Donated(data) = input {
            buffer.restore(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_core::{AliasConfig, BufferAssignment, DataType, Shape, ShapeIndex};

    fn vector() -> Shape {
        Shape::array(DataType::F32, &[2])
    }

    fn program(parameters: Vec<Shape>, aliases: &[(usize, Vec<usize>)]) -> CompiledProgram {
        let mut alias_config = AliasConfig::new();
        for (output, (number, index)) in aliases.iter().enumerate() {
            alias_config
                .add_alias(
                    ShapeIndex::new(vec![output]),
                    *number,
                    ShapeIndex::new(index.clone()),
                )
                .unwrap();
        }
        CompiledProgram {
            name: "test".to_string(),
            parameter_shapes: parameters,
            result_shape: vector(),
            alias_config,
            buffer_assignment: BufferAssignment::new(),
            generated_code_size: 0,
        }
    }

    #[test]
    fn test_no_aliasing_donates_nothing() {
        let program = program(vec![vector(), vector()], &[]);
        assert!(parameters_that_must_be_donated(&program, false)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_untupled_aliases() {
        let program = program(vec![vector(), vector(), vector()], &[(2, vec![])]);
        let donated = parameters_that_must_be_donated(&program, false).unwrap();
        assert_eq!(donated, HashSet::from([2]));
    }

    #[test]
    fn test_untupled_alias_out_of_range() {
        let program = program(vec![vector()], &[(1, vec![])]);
        assert!(matches!(
            parameters_that_must_be_donated(&program, false),
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tupled_aliases() {
        let tuple = Shape::tuple(vec![vector(), vector(), vector()]);
        let program = program(vec![tuple], &[(0, vec![1]), (0, vec![])]);
        assert_eq!(entry_argument_count(&program, true).unwrap(), 3);
        let donated = parameters_that_must_be_donated(&program, true).unwrap();
        assert_eq!(donated, HashSet::from([1]));
    }

    #[test]
    fn test_tupled_alias_validation() {
        let tuple = Shape::tuple(vec![vector(), vector()]);
        let bad_number = program(vec![tuple.clone()], &[(1, vec![0])]);
        assert!(parameters_that_must_be_donated(&bad_number, true).is_err());

        let bad_index = program(vec![tuple], &[(0, vec![2])]);
        assert!(parameters_that_must_be_donated(&bad_index, true).is_err());

        let not_tuple = program(vec![vector()], &[]);
        assert!(entry_argument_count(&not_tuple, true).is_err());

        let two_parameters = program(vec![vector(), vector()], &[]);
        assert!(entry_argument_count(&two_parameters, true).is_err());
    }

    fn buffer() -> DeviceBuffer {
        DeviceBuffer::zeroed(DeviceId(0), vector())
    }

    fn target() -> ArgumentTarget {
        ArgumentTarget {
            device: DeviceId(0),
            replica: 0,
        }
    }

    #[test]
    fn test_validate_rejects_non_donatable_mandatory_donation() {
        let (a, b) = (buffer(), buffer());
        let must_donate = HashSet::from([1]);
        let options = ExecuteOptions::default().with_non_donatable_inputs([1]);
        let err = validate_arguments(&[&a, &b], &must_donate, 2, &target(), &options).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));

        let options = ExecuteOptions::default().with_non_donatable_inputs([0]);
        assert!(validate_arguments(&[&a, &b], &must_donate, 2, &target(), &options).is_ok());
    }

    #[test]
    fn test_validate_rejects_aliased_donation() {
        let a = buffer();
        let must_donate = HashSet::from([0]);
        let options = ExecuteOptions::default();
        let err = validate_arguments(&[&a, &a], &must_donate, 2, &target(), &options).unwrap_err();
        assert!(err.to_string().contains("also passed as argument 1"));

        let both = HashSet::from([0, 1]);
        let err = validate_arguments(&[&a, &a], &both, 2, &target(), &options).unwrap_err();
        assert!(err.to_string().contains("same buffer twice"));
    }

    #[test]
    fn test_validate_rejects_wrong_device_and_count() {
        let remote = DeviceBuffer::zeroed(DeviceId(5), vector());
        let options = ExecuteOptions::default();
        assert!(validate_arguments(&[&remote], &HashSet::new(), 1, &target(), &options).is_err());

        let a = buffer();
        assert!(validate_arguments(&[&a], &HashSet::new(), 2, &target(), &options).is_err());
    }

    #[test]
    fn test_prepare_inputs_rolls_back() {
        let (a, b) = (buffer(), buffer());
        let _reader = b.share().unwrap();
        let must_donate = HashSet::from([0, 1]);

        assert!(prepare_inputs(&[&a, &b], &must_donate).is_err());
        assert!(!a.is_deleted());
        assert!(!b.is_deleted());
    }

    #[test]
    fn test_prepare_inputs_donates_and_borrows() {
        let (a, b) = (buffer(), buffer());
        let inputs = prepare_inputs(&[&a, &b], &HashSet::from([1])).unwrap();
        assert!(!inputs[0].is_donated());
        assert!(inputs[1].is_donated());
        assert!(!a.is_deleted());
        assert!(b.is_donated());
    }
}
