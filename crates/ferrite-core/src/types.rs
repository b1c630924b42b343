//! Core types for element types and value shapes.

use crate::{Error, Result};
use std::fmt;

/// Size in bytes of one entry of a tuple's index table.
pub const TUPLE_ENTRY_SIZE: usize = 8;

/// Element type of a dense array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F16,
    F32,
    F64,
    I32,
    I64,
    U8,
    U32,
    Bool,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::F16 => 2,
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 => 8,
            DataType::U8 | DataType::Bool => 1,
        }
    }

    fn short_name(self) -> &'static str {
        match self {
            DataType::F16 => "f16",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::I32 => "s32",
            DataType::I64 => "s64",
            DataType::U8 => "u8",
            DataType::U32 => "u32",
            DataType::Bool => "pred",
        }
    }
}

/// Shape of a program value: a dense array or a (possibly nested) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Dense array with a fixed element type and static dimensions.
    Array { dtype: DataType, dims: Vec<usize> },

    /// Ordered collection of sub-values.
    Tuple(Vec<Shape>),
}

impl Shape {
    /// Create an array shape.
    pub fn array(dtype: DataType, dims: &[usize]) -> Self {
        Shape::Array {
            dtype,
            dims: dims.to_vec(),
        }
    }

    /// Create a rank-0 array shape.
    pub fn scalar(dtype: DataType) -> Self {
        Shape::Array {
            dtype,
            dims: Vec::new(),
        }
    }

    /// Create a tuple shape.
    pub fn tuple(elements: Vec<Shape>) -> Self {
        Shape::Tuple(elements)
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Shape::Tuple(_))
    }

    /// Element shapes of a tuple, or `None` for arrays.
    pub fn tuple_shapes(&self) -> Option<&[Shape]> {
        match self {
            Shape::Tuple(elements) => Some(elements),
            Shape::Array { .. } => None,
        }
    }

    /// Number of elements in an array shape; `None` for tuples.
    pub fn element_count(&self) -> Option<usize> {
        match self {
            Shape::Array { dims, .. } => {
                Some(dims.iter().fold(1usize, |n, &d| n.saturating_mul(d)))
            }
            Shape::Tuple(_) => None,
        }
    }

    /// Bytes needed to store this value's top-level buffer.
    ///
    /// Arrays store their elements; tuples store one index-table entry per
    /// element, with the elements themselves living in their own buffers.
    /// Saturates at `usize::MAX`; use [`Shape::checked_byte_size`] where an
    /// unrepresentable size must be rejected.
    pub fn byte_size(&self) -> usize {
        self.checked_byte_size().unwrap_or(usize::MAX)
    }

    /// Like [`Shape::byte_size`], but fails when the size overflows `usize`.
    pub fn checked_byte_size(&self) -> Result<usize> {
        let size = match self {
            Shape::Array { dtype, dims } => dims
                .iter()
                .try_fold(dtype.size_in_bytes(), |bytes, &d| bytes.checked_mul(d)),
            Shape::Tuple(elements) => elements.len().checked_mul(TUPLE_ENTRY_SIZE),
        };
        size.ok_or_else(|| Error::InvalidShape(format!("byte size of {self} overflows")))
    }

    /// Look up the sub-shape at `index`.
    pub fn subshape(&self, index: &ShapeIndex) -> Result<&Shape> {
        let mut current = self;
        for (depth, &i) in index.as_slice().iter().enumerate() {
            current = match current {
                Shape::Tuple(elements) => elements.get(i).ok_or_else(|| {
                    Error::InvalidShape(format!(
                        "index {index} out of range at depth {depth} for shape {self}"
                    ))
                })?,
                Shape::Array { .. } => {
                    return Err(Error::InvalidShape(format!(
                        "index {index} descends into array at depth {depth} of shape {self}"
                    )))
                }
            };
        }
        Ok(current)
    }

    /// All sub-shapes in pre-order, starting with the root at the empty index.
    pub fn subshapes(&self) -> Vec<(ShapeIndex, &Shape)> {
        let mut out = Vec::new();
        collect_subshapes(self, ShapeIndex::root(), &mut out);
        out
    }
}

fn collect_subshapes<'a>(
    shape: &'a Shape,
    index: ShapeIndex,
    out: &mut Vec<(ShapeIndex, &'a Shape)>,
) {
    out.push((index.clone(), shape));
    if let Shape::Tuple(elements) = shape {
        for (i, element) in elements.iter().enumerate() {
            collect_subshapes(element, index.child(i), out);
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Array { dtype, dims } => {
                let dims: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
                write!(f, "{}[{}]", dtype.short_name(), dims.join(","))
            }
            Shape::Tuple(elements) => {
                let elements: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", elements.join(", "))
            }
        }
    }
}

/// Path into a nested tuple value. The empty index refers to the whole value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeIndex(Vec<usize>);

impl ShapeIndex {
    /// The index of the whole value.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(path: Vec<usize>) -> Self {
        Self(path)
    }

    /// Index of the `i`-th element below this one.
    pub fn child(&self, i: usize) -> Self {
        let mut path = self.0.clone();
        path.push(i);
        Self(path)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First path component, i.e. the top-level tuple element.
    pub fn first(&self) -> Option<usize> {
        self.0.first().copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

impl From<Vec<usize>> for ShapeIndex {
    fn from(path: Vec<usize>) -> Self {
        Self(path)
    }
}

impl From<&[usize]> for ShapeIndex {
    fn from(path: &[usize]) -> Self {
        Self(path.to_vec())
    }
}

impl fmt::Display for ShapeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "{{{}}}", parts.join(","))
    }
}
