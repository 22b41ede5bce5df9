//! Dense tensors crossing the engine boundary.

use crate::element::{Element, ElementType};
use crate::error::{OrtError, Result};

/// Flat row-major element buffer, one variant per marshalled element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float(Vec<f32>),
    Double(Vec<f64>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Uint8(Vec<u8>),
    Uint16(Vec<u16>),
    Uint32(Vec<u32>),
    Uint64(Vec<u64>),
    Bool(Vec<bool>),
    String(Vec<String>),
}

// Expands `$body` once per fixed-width numeric variant with `$v` bound to
// the inner Vec.
macro_rules! for_numeric {
    ($data:expr, $v:ident => $body:expr, $other:pat => $fallback:expr) => {
        match $data {
            TensorData::Float($v) => $body,
            TensorData::Double($v) => $body,
            TensorData::Int8($v) => $body,
            TensorData::Int16($v) => $body,
            TensorData::Int32($v) => $body,
            TensorData::Int64($v) => $body,
            TensorData::Uint8($v) => $body,
            TensorData::Uint16($v) => $body,
            TensorData::Uint32($v) => $body,
            TensorData::Uint64($v) => $body,
            $other => $fallback,
        }
    };
}

impl TensorData {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Float(_) => ElementType::Float,
            Self::Double(_) => ElementType::Double,
            Self::Int8(_) => ElementType::Int8,
            Self::Int16(_) => ElementType::Int16,
            Self::Int32(_) => ElementType::Int32,
            Self::Int64(_) => ElementType::Int64,
            Self::Uint8(_) => ElementType::Uint8,
            Self::Uint16(_) => ElementType::Uint16,
            Self::Uint32(_) => ElementType::Uint32,
            Self::Uint64(_) => ElementType::Uint64,
            Self::Bool(_) => ElementType::Bool,
            Self::String(_) => ElementType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::String(v) => v.len(),
            other => for_numeric!(other, v => v.len(), _ => 0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty buffer of the given type.
    pub fn empty(elem: ElementType) -> Result<Self> {
        if elem == ElementType::String {
            return Ok(Self::String(Vec::new()));
        }
        Self::from_le_bytes(elem, &[])
    }

    /// Decodes packed little-endian bytes. Strings have no packed form.
    pub fn from_le_bytes(elem: ElementType, bytes: &[u8]) -> Result<Self> {
        elem.ensure_supported()?;
        let width = match elem.width() {
            Some(w) => w,
            None => {
                return Err(OrtError::InvalidRecord(
                    "string tensors have no packed byte form".into(),
                ))
            }
        };
        if bytes.len() % width != 0 {
            return Err(OrtError::InvalidRecord(format!(
                "{} bytes is not a multiple of {elem} width {width}",
                bytes.len()
            )));
        }

        macro_rules! decode {
            ($variant:ident, $ty:ty) => {
                Self::$variant(
                    bytes
                        .chunks_exact(width)
                        .map(|c| {
                            let mut buf = [0u8; std::mem::size_of::<$ty>()];
                            buf.copy_from_slice(c);
                            <$ty>::from_le_bytes(buf)
                        })
                        .collect(),
                )
            };
        }

        let data = match elem {
            ElementType::Float => decode!(Float, f32),
            ElementType::Double => decode!(Double, f64),
            ElementType::Int8 => decode!(Int8, i8),
            ElementType::Int16 => decode!(Int16, i16),
            ElementType::Int32 => decode!(Int32, i32),
            ElementType::Int64 => decode!(Int64, i64),
            ElementType::Uint8 => Self::Uint8(bytes.to_vec()),
            ElementType::Uint16 => decode!(Uint16, u16),
            ElementType::Uint32 => decode!(Uint32, u32),
            ElementType::Uint64 => decode!(Uint64, u64),
            ElementType::Bool => Self::Bool(bytes.iter().map(|&b| b != 0).collect()),
            // Rejected above.
            other => return Err(OrtError::UnsupportedType(other)),
        };
        Ok(data)
    }

    /// Encodes as packed little-endian bytes, `None` for strings.
    pub fn to_le_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Bool(v) => Some(v.iter().map(|&b| b as u8).collect()),
            Self::Uint8(v) => Some(v.clone()),
            Self::String(_) => None,
            other => for_numeric!(other, v => {
                Some(v.iter().flat_map(|x| x.to_le_bytes()).collect())
            }, _ => None),
        }
    }
}

/// Number of elements described by `shape`, `None` if any dimension is
/// negative or the product overflows.
pub fn element_count(shape: &[i64]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| {
        if d < 0 {
            None
        } else {
            acc.checked_mul(d as usize)
        }
    })
}

/// N-dimensional dense tensor with a concrete shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<i64>,
    data: TensorData,
}

impl Tensor {
    /// Creates a tensor with the given shape from a flat element vector.
    pub fn new<T: Element>(shape: &[i64], data: Vec<T>) -> Result<Self> {
        Self::from_data(shape, T::into_data(data))
    }

    /// Creates a tensor from an already typed buffer.
    pub fn from_data(shape: &[i64], data: TensorData) -> Result<Self> {
        let expected = element_count(shape).ok_or_else(|| OrtError::InvalidShape(shape.to_vec()))?;
        if data.len() != expected {
            return Err(OrtError::DataLength {
                shape: shape.to_vec(),
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Creates a tensor from packed little-endian bytes.
    pub fn from_le_bytes(elem: ElementType, shape: &[i64], bytes: &[u8]) -> Result<Self> {
        Self::from_data(shape, TensorData::from_le_bytes(elem, bytes)?)
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_data(self) -> TensorData {
        self.data
    }

    /// Borrows the elements as `T`, failing if the tensor holds another type.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        T::view(&self.data).ok_or_else(|| OrtError::TypeMismatch {
            expected: format!("tensor({})", T::TYPE),
            actual: format!("tensor({})", self.element_type()),
        })
    }

    /// Copies the elements out as `T`.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.as_slice::<T>().map(|s| s.to_vec())
    }

    /// Copies the tensor data into a new f32 vector.
    pub fn float_data(&self) -> Result<Vec<f32>> {
        self.to_vec::<f32>()
    }

    /// Element at a flat row-major index.
    pub fn get<T: Element>(&self, index: usize) -> Result<Option<&T>> {
        Ok(self.as_slice::<T>()?.get(index))
    }
}
