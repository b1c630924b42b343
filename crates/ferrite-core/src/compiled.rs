//! Compiler output consumed by the runtime.
//!
//! Defines the artifact a compiler hands back: the entry signature, the
//! aliasing it committed to, and the buffer assignment that places every
//! parameter, result and temporary into a numbered allocation.

use crate::program::AliasConfig;
use crate::types::{Shape, ShapeIndex};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Index into a buffer assignment's allocation list.
pub type AllocationIndex = usize;

/// What an allocation holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationKind {
    /// Storage of an entry parameter (sub-)value.
    Parameter {
        /// Entry parameter number.
        number: usize,

        /// Location within that parameter.
        index: ShapeIndex,
    },

    /// Result storage that is not shared with any parameter.
    Output,

    /// Scratch storage that does not outlive the execution.
    Temp,

    /// Constant data baked into the program.
    Constant,
}

/// A single allocation in a buffer assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferAllocation {
    pub index: AllocationIndex,

    /// Size in bytes.
    pub size: usize,

    pub kind: AllocationKind,

    /// Whether the allocation may hold part of the entry result.
    pub maybe_live_out: bool,
}

impl BufferAllocation {
    pub fn is_entry_parameter(&self) -> bool {
        matches!(self.kind, AllocationKind::Parameter { .. })
    }
}

/// Allocations of a compiled program and the result locations they back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferAssignment {
    allocations: Vec<BufferAllocation>,

    /// Allocations that may hold each result location. A well-formed
    /// assignment has exactly one per location.
    output_slices: BTreeMap<ShapeIndex, Vec<AllocationIndex>>,
}

impl BufferAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an allocation and return its index.
    pub fn add_allocation(&mut self, size: usize, kind: AllocationKind) -> AllocationIndex {
        let index = self.allocations.len();
        self.allocations.push(BufferAllocation {
            index,
            size,
            kind,
            maybe_live_out: false,
        });
        index
    }

    /// Record that the result location `output_index` lives in `allocation`.
    pub fn assign_output(
        &mut self,
        output_index: ShapeIndex,
        allocation: AllocationIndex,
    ) -> Result<()> {
        let entry = self.allocations.get_mut(allocation).ok_or_else(|| {
            Error::Internal(format!(
                "output {output_index} assigned to unknown allocation {allocation}"
            ))
        })?;
        entry.maybe_live_out = true;

        let slices = self.output_slices.entry(output_index).or_default();
        if !slices.contains(&allocation) {
            slices.push(allocation);
        }
        Ok(())
    }

    pub fn allocations(&self) -> &[BufferAllocation] {
        &self.allocations
    }

    pub fn allocation(&self, index: AllocationIndex) -> Option<&BufferAllocation> {
        self.allocations.get(index)
    }

    /// The single allocation holding the result location `output_index`.
    ///
    /// Fails when no allocation, or more than one, may hold it.
    pub fn unique_slice(&self, output_index: &ShapeIndex) -> Result<AllocationIndex> {
        match self.output_slices.get(output_index).map(Vec::as_slice) {
            Some([allocation]) => Ok(*allocation),
            Some([]) | None => Err(Error::Internal(format!(
                "no buffer allocation holds result {output_index}"
            ))),
            Some(many) => Err(Error::Internal(format!(
                "result {output_index} is ambiguous between allocations {many:?}"
            ))),
        }
    }

    /// The single allocation holding the whole entry result.
    pub fn unique_top_level_output_slice(&self) -> Result<AllocationIndex> {
        self.unique_slice(&ShapeIndex::root())
    }
}

/// A compiled program ready to be wrapped in an executable.
///
/// This is the final output of a compiler, containing everything the
/// dispatch layer inspects without re-running analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    /// Program name (for debugging/profiling).
    pub name: String,

    /// Entry parameter shapes in positional order.
    pub parameter_shapes: Vec<Shape>,

    /// Entry result shape.
    pub result_shape: Shape,

    /// Input/output aliasing the compiler committed to.
    pub alias_config: AliasConfig,

    /// Placement of every value into allocations.
    pub buffer_assignment: BufferAssignment,

    /// Size of generated code in bytes.
    pub generated_code_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_slice() {
        let mut assignment = BufferAssignment::new();
        let param = assignment.add_allocation(
            16,
            AllocationKind::Parameter {
                number: 0,
                index: ShapeIndex::root(),
            },
        );
        let out = assignment.add_allocation(16, AllocationKind::Output);
        assignment.assign_output(ShapeIndex::root(), out).unwrap();

        assert_eq!(assignment.unique_top_level_output_slice().unwrap(), out);
        assert!(assignment.allocation(out).unwrap().maybe_live_out);
        assert!(!assignment.allocation(param).unwrap().maybe_live_out);
        assert!(assignment.allocation(param).unwrap().is_entry_parameter());
    }

    #[test]
    fn test_missing_and_ambiguous_slices() {
        let mut assignment = BufferAssignment::new();
        assert!(matches!(
            assignment.unique_top_level_output_slice(),
            Err(Error::Internal(_))
        ));

        let a = assignment.add_allocation(4, AllocationKind::Output);
        let b = assignment.add_allocation(4, AllocationKind::Output);
        assignment.assign_output(ShapeIndex::root(), a).unwrap();
        assignment.assign_output(ShapeIndex::root(), b).unwrap();
        assert!(matches!(
            assignment.unique_top_level_output_slice(),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_assign_output_unknown_allocation() {
        let mut assignment = BufferAssignment::new();
        assert!(assignment.assign_output(ShapeIndex::root(), 3).is_err());
    }
}
