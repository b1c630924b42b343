//! Source programs handed to a compiler.
//!
//! A [`Program`] only carries what the runtime layer needs to reason about:
//! the entry signature and which results the author asked to alias with
//! which parameters. Everything else about the computation belongs to the
//! compiler.

use crate::types::{Shape, ShapeIndex};
use crate::{Error, Result};

/// One result sub-value sharing storage with one parameter sub-value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputOutputAlias {
    /// Location within the entry result.
    pub output_index: ShapeIndex,

    /// Entry parameter whose storage is reused.
    pub parameter_number: usize,

    /// Location within that parameter.
    pub parameter_index: ShapeIndex,
}

impl InputOutputAlias {
    /// Positional argument that backs this alias.
    ///
    /// With separate positional arguments this is the parameter number. With
    /// tupled arguments the single entry parameter is a tuple and each
    /// top-level element is supplied as its own argument, so the position is
    /// the first component of the parameter index. Returns `None` when the
    /// alias does not name a positional argument.
    pub fn argument_position(&self, parameter_is_tupled_arguments: bool) -> Option<usize> {
        if parameter_is_tupled_arguments {
            if self.parameter_number != 0 {
                return None;
            }
            self.parameter_index.first()
        } else {
            Some(self.parameter_number)
        }
    }
}

/// The set of input/output aliases of an entry computation.
///
/// Each result location may alias at most one parameter location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasConfig {
    aliases: Vec<InputOutputAlias>,
}

impl AliasConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the result at `output_index` reuses the storage of
    /// parameter `parameter_number` at `parameter_index`.
    pub fn add_alias(
        &mut self,
        output_index: ShapeIndex,
        parameter_number: usize,
        parameter_index: ShapeIndex,
    ) -> Result<()> {
        if let Some(existing) = self.get_aliased_parameter(&output_index) {
            return Err(Error::InvalidArgument(format!(
                "output {output_index} is already aliased to parameter {} at {}",
                existing.parameter_number, existing.parameter_index
            )));
        }
        self.aliases.push(InputOutputAlias {
            output_index,
            parameter_number,
            parameter_index,
        });
        Ok(())
    }

    /// Alias registered for a result location, if any.
    pub fn get_aliased_parameter(&self, output_index: &ShapeIndex) -> Option<&InputOutputAlias> {
        self.aliases.iter().find(|a| &a.output_index == output_index)
    }

    pub fn output_has_alias(&self, output_index: &ShapeIndex) -> bool {
        self.get_aliased_parameter(output_index).is_some()
    }

    pub fn parameter_has_alias(
        &self,
        parameter_number: usize,
        parameter_index: &ShapeIndex,
    ) -> bool {
        self.aliases.iter().any(|a| {
            a.parameter_number == parameter_number && &a.parameter_index == parameter_index
        })
    }

    /// Iterate over aliases in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &InputOutputAlias> {
        self.aliases.iter()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// An entry computation as seen by the dispatch layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    name: String,
    parameters: Vec<Shape>,
    result: Shape,
    alias_config: AliasConfig,
}

impl Program {
    /// Create a program with no aliasing.
    pub fn new(name: impl Into<String>, parameters: Vec<Shape>, result: Shape) -> Self {
        Self {
            name: name.into(),
            parameters,
            result,
            alias_config: AliasConfig::new(),
        }
    }

    /// Add an input/output alias, checking that both locations exist and
    /// have identical shapes.
    ///
    /// Returns `self` for method chaining.
    pub fn with_alias(
        mut self,
        output_index: ShapeIndex,
        parameter_number: usize,
        parameter_index: ShapeIndex,
    ) -> Result<Self> {
        let parameter = self.parameters.get(parameter_number).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "alias names parameter {parameter_number} but '{}' has {} parameters",
                self.name,
                self.parameters.len()
            ))
        })?;
        let parameter_shape = parameter.subshape(&parameter_index)?;
        let output_shape = self.result.subshape(&output_index)?;
        if parameter_shape != output_shape {
            return Err(Error::InvalidShape(format!(
                "cannot alias output {output_index} ({output_shape}) with parameter \
                 {parameter_number} at {parameter_index} ({parameter_shape})"
            )));
        }

        self.alias_config
            .add_alias(output_index, parameter_number, parameter_index)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry parameter shapes in positional order.
    pub fn parameters(&self) -> &[Shape] {
        &self.parameters
    }

    pub fn result(&self) -> &Shape {
        &self.result
    }

    pub fn alias_config(&self) -> &AliasConfig {
        &self.alias_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn vector() -> Shape {
        Shape::array(DataType::F32, &[4])
    }

    #[test]
    fn test_with_alias_records_alias() {
        let program = Program::new("axpy", vec![vector(), vector(), vector()], vector())
            .with_alias(ShapeIndex::root(), 2, ShapeIndex::root())
            .unwrap();

        let config = program.alias_config();
        assert_eq!(config.len(), 1);
        assert!(config.parameter_has_alias(2, &ShapeIndex::root()));
        assert!(!config.parameter_has_alias(0, &ShapeIndex::root()));
        assert!(config.output_has_alias(&ShapeIndex::root()));
    }

    #[test]
    fn test_with_alias_rejects_unknown_parameter() {
        let err = Program::new("p", vec![vector()], vector())
            .with_alias(ShapeIndex::root(), 3, ShapeIndex::root())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_with_alias_rejects_shape_mismatch() {
        let err = Program::new(
            "p",
            vec![Shape::array(DataType::F32, &[8])],
            vector(),
        )
        .with_alias(ShapeIndex::root(), 0, ShapeIndex::root())
        .unwrap_err();
        assert!(matches!(err, Error::InvalidShape(_)));
    }

    #[test]
    fn test_output_aliased_once() {
        let mut config = AliasConfig::new();
        config
            .add_alias(ShapeIndex::root(), 0, ShapeIndex::root())
            .unwrap();
        assert!(config
            .add_alias(ShapeIndex::root(), 1, ShapeIndex::root())
            .is_err());
    }

    #[test]
    fn test_argument_position() {
        let untupled = InputOutputAlias {
            output_index: ShapeIndex::root(),
            parameter_number: 2,
            parameter_index: ShapeIndex::root(),
        };
        assert_eq!(untupled.argument_position(false), Some(2));
        assert_eq!(untupled.argument_position(true), None);

        let tupled = InputOutputAlias {
            output_index: ShapeIndex::new(vec![0]),
            parameter_number: 0,
            parameter_index: ShapeIndex::new(vec![1]),
        };
        assert_eq!(tupled.argument_position(true), Some(1));
    }
}
