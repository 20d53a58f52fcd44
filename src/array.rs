//! # Typed Arrays
//!
//! The value objects that move between callers and the container: a named,
//! immutable rank-1 or rank-2 array of one primitive element kind.
//!
//! ## Element kinds
//!
//! The kind catalogue is closed and maps deterministically onto the
//! container's stored type classes:
//!
//! | Kind | Storage class | Width |
//! |---------|---------------|-------|
//! | Int8 | signed integer | 1 |
//! | Int16 | signed integer | 2 |
//! | Int32 | signed integer | 4 |
//! | Int64 | signed integer | 8 |
//! | Float32 | float | 4 |
//! | Float64 | float | 8 |
//! | Byte | unsigned integer | 1 |
//! | Text | fixed-width string | per dataset |
//!
//! Decoding picks the narrowest kind matching the stored class/width pair;
//! an unknown combination is an error rather than a guess.

use std::fmt;

/// Errors raised while constructing or decoding typed arrays
#[derive(Debug, thiserror::Error)]
pub enum ArrayError {
    #[error("rank-2 array '{0}' has ragged rows (row {1} has {2} columns, expected {3})")]
    RaggedRows(String, usize, usize, usize),

    #[error("array '{0}' is empty")]
    Empty(String),

    #[error("rank-2 text arrays are not supported ('{0}')")]
    TextRank2(String),

    #[error("no element kind for stored class {0:?} with width {1}")]
    UnknownKind(TypeClass, u32),

    #[error("buffer length {0} does not match shape {1:?}")]
    ShapeMismatch(usize, Vec<u64>),
}

/// Storage class of an element kind as recorded by the container backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    /// Fixed-point integer, signed or unsigned
    Integer { signed: bool },
    /// IEEE-754 float
    Float,
    /// Fixed-width text
    Text,
}

/// Closed set of supported element kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Byte,
    Text,
}

impl ElementKind {
    /// Storage class this kind maps to in the container.
    pub fn type_class(&self) -> TypeClass {
        match self {
            ElementKind::Int8 | ElementKind::Int16 | ElementKind::Int32 | ElementKind::Int64 => {
                TypeClass::Integer { signed: true }
            }
            ElementKind::Float32 | ElementKind::Float64 => TypeClass::Float,
            ElementKind::Byte => TypeClass::Integer { signed: false },
            ElementKind::Text => TypeClass::Text,
        }
    }

    /// Per-element byte width. Text elements use the dataset's recorded
    /// width instead.
    pub fn byte_width(&self, text_width: u32) -> u32 {
        match self {
            ElementKind::Int8 | ElementKind::Byte => 1,
            ElementKind::Int16 => 2,
            ElementKind::Int32 | ElementKind::Float32 => 4,
            ElementKind::Int64 | ElementKind::Float64 => 8,
            ElementKind::Text => text_width,
        }
    }

    /// Narrowest kind matching a stored class/width pair.
    pub fn from_class_width(class: TypeClass, width: u32) -> Result<Self, ArrayError> {
        match (class, width) {
            (TypeClass::Integer { signed: true }, 1) => Ok(ElementKind::Int8),
            (TypeClass::Integer { signed: true }, 2) => Ok(ElementKind::Int16),
            (TypeClass::Integer { signed: true }, 4) => Ok(ElementKind::Int32),
            (TypeClass::Integer { signed: true }, 8) => Ok(ElementKind::Int64),
            (TypeClass::Integer { signed: false }, 1) => Ok(ElementKind::Byte),
            (TypeClass::Float, 4) => Ok(ElementKind::Float32),
            (TypeClass::Float, 8) => Ok(ElementKind::Float64),
            (TypeClass::Text, _) => Ok(ElementKind::Text),
            (class, width) => Err(ArrayError::UnknownKind(class, width)),
        }
    }

    /// Stable one-byte tag used by the container directory.
    pub(crate) fn code(&self) -> u8 {
        match self {
            ElementKind::Int8 => 0,
            ElementKind::Int16 => 1,
            ElementKind::Int32 => 2,
            ElementKind::Int64 => 3,
            ElementKind::Float32 => 4,
            ElementKind::Float64 => 5,
            ElementKind::Byte => 6,
            ElementKind::Text => 7,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ElementKind::Int8),
            1 => Some(ElementKind::Int16),
            2 => Some(ElementKind::Int32),
            3 => Some(ElementKind::Int64),
            4 => Some(ElementKind::Float32),
            5 => Some(ElementKind::Float64),
            6 => Some(ElementKind::Byte),
            7 => Some(ElementKind::Text),
            _ => None,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Int8 => "int8",
            ElementKind::Int16 => "int16",
            ElementKind::Int32 => "int32",
            ElementKind::Int64 => "int64",
            ElementKind::Float32 => "float32",
            ElementKind::Float64 => "float64",
            ElementKind::Byte => "byte",
            ElementKind::Text => "text",
        };
        write!(f, "{name}")
    }
}

/// Owned element buffer, flat row-major for rank 2
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Byte(Vec<u8>),
    Text(Vec<String>),
}

impl ArrayData {
    pub fn kind(&self) -> ElementKind {
        match self {
            ArrayData::Int8(_) => ElementKind::Int8,
            ArrayData::Int16(_) => ElementKind::Int16,
            ArrayData::Int32(_) => ElementKind::Int32,
            ArrayData::Int64(_) => ElementKind::Int64,
            ArrayData::Float32(_) => ElementKind::Float32,
            ArrayData::Float64(_) => ElementKind::Float64,
            ArrayData::Byte(_) => ElementKind::Byte,
            ArrayData::Text(_) => ElementKind::Text,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::Int8(v) => v.len(),
            ArrayData::Int16(v) => v.len(),
            ArrayData::Int32(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::Float32(v) => v.len(),
            ArrayData::Float64(v) => v.len(),
            ArrayData::Byte(v) => v.len(),
            ArrayData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An immutable named array with a declared element kind and rank.
///
/// Shape is `[len]` for rank 1 and `[rows, cols]` for rank 2; rank-2 data is
/// stored flat in row-major order. Construction is the only mutation point.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedArray {
    name: String,
    data: ArrayData,
    shape: Vec<u64>,
}

impl TypedArray {
    /// Construct a rank-1 array; shape is inferred from the buffer length.
    pub fn rank1(name: impl Into<String>, data: ArrayData) -> Result<Self, ArrayError> {
        let name = name.into();
        if data.is_empty() {
            return Err(ArrayError::Empty(name));
        }
        let shape = vec![data.len() as u64];
        Ok(Self { name, data, shape })
    }

    /// Construct a rank-2 array from a flat row-major buffer.
    pub fn rank2(
        name: impl Into<String>,
        data: ArrayData,
        rows: u64,
        cols: u64,
    ) -> Result<Self, ArrayError> {
        let name = name.into();
        if matches!(data, ArrayData::Text(_)) {
            return Err(ArrayError::TextRank2(name));
        }
        if rows == 0 || cols == 0 {
            return Err(ArrayError::Empty(name));
        }
        let expected = (rows * cols) as usize;
        if data.len() != expected {
            return Err(ArrayError::ShapeMismatch(data.len(), vec![rows, cols]));
        }
        Ok(Self {
            name,
            data,
            shape: vec![rows, cols],
        })
    }

    /// Construct a rank-2 array from nested rows, rejecting ragged input.
    pub fn from_rows_f32(name: impl Into<String>, rows: &[Vec<f32>]) -> Result<Self, ArrayError> {
        let name = name.into();
        let Some(first) = rows.first() else {
            return Err(ArrayError::Empty(name));
        };
        let cols = first.len();
        let mut flat = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(ArrayError::RaggedRows(name, i, row.len(), cols));
            }
            flat.extend_from_slice(row);
        }
        Self::rank2(name, ArrayData::Float32(flat), rows.len() as u64, cols as u64)
    }

    /// Construct a rank-2 array from nested rows, rejecting ragged input.
    pub fn from_rows_f64(name: impl Into<String>, rows: &[Vec<f64>]) -> Result<Self, ArrayError> {
        let name = name.into();
        let Some(first) = rows.first() else {
            return Err(ArrayError::Empty(name));
        };
        let cols = first.len();
        let mut flat = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(ArrayError::RaggedRows(name, i, row.len(), cols));
            }
            flat.extend_from_slice(row);
        }
        Self::rank2(name, ArrayData::Float64(flat), rows.len() as u64, cols as u64)
    }

    /// Single-element text array, the form the reserved `Sample_ID` entry
    /// takes inside a node's meta collection.
    pub fn text_scalar(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: ArrayData::Text(vec![value.into()]),
            shape: vec![1],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ElementKind {
        self.data.kind()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// `[len]` for rank 1, `[rows, cols]` for rank 2.
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            ArrayData::Float32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.data {
            ArrayData::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.data {
            ArrayData::Int32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&[String]> {
        match &self.data {
            ArrayData::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            ArrayData::Byte(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for TypedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] shape {:?}", self.name, self.kind(), self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank1_shape() {
        let arr = TypedArray::rank1("a", ArrayData::Float32(vec![1.0, 2.0, 3.0])).unwrap();
        assert_eq!(arr.rank(), 1);
        assert_eq!(arr.shape(), &[3]);
        assert_eq!(arr.kind(), ElementKind::Float32);
    }

    #[test]
    fn test_rank2_shape() {
        let arr = TypedArray::rank2("m", ArrayData::Int32(vec![0; 12]), 3, 4).unwrap();
        assert_eq!(arr.rank(), 2);
        assert_eq!(arr.shape(), &[3, 4]);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let rows = vec![vec![1.0f32, 2.0], vec![3.0]];
        let err = TypedArray::from_rows_f32("r", &rows).unwrap_err();
        assert!(matches!(err, ArrayError::RaggedRows(_, 1, 1, 2)));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = TypedArray::rank2("m", ArrayData::Float64(vec![0.0; 5]), 2, 3).unwrap_err();
        assert!(matches!(err, ArrayError::ShapeMismatch(5, _)));
    }

    #[test]
    fn test_text_rank2_rejected() {
        let err = TypedArray::rank2("t", ArrayData::Text(vec!["x".into()]), 1, 1).unwrap_err();
        assert!(matches!(err, ArrayError::TextRank2(_)));
    }

    #[test]
    fn test_class_width_mapping_is_total() {
        for kind in [
            ElementKind::Int8,
            ElementKind::Int16,
            ElementKind::Int32,
            ElementKind::Int64,
            ElementKind::Float32,
            ElementKind::Float64,
            ElementKind::Byte,
            ElementKind::Text,
        ] {
            let class = kind.type_class();
            let width = kind.byte_width(16);
            let back = ElementKind::from_class_width(class, width).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn test_unknown_class_width_rejected() {
        let err = ElementKind::from_class_width(TypeClass::Float, 2).unwrap_err();
        assert!(matches!(err, ArrayError::UnknownKind(TypeClass::Float, 2)));
    }

    #[test]
    fn test_kind_codes_round_trip() {
        for code in 0..8u8 {
            let kind = ElementKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(ElementKind::from_code(8).is_none());
    }
}
