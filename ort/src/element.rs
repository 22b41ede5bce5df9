//! Tensor element types and their Rust counterparts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OrtError, Result};
use crate::tensor::TensorData;

/// Element type tags used across the engine boundary.
///
/// The discriminants are the ONNX `TensorProto.DataType` values and must
/// not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementType {
    Float = 1,
    Uint8 = 2,
    Int8 = 3,
    Uint16 = 4,
    Int16 = 5,
    Int32 = 6,
    Int64 = 7,
    String = 8,
    Bool = 9,
    Float16 = 10,
    Double = 11,
    Uint32 = 12,
    Uint64 = 13,
    Complex64 = 14,
    Complex128 = 15,
    Bfloat16 = 16,
}

impl ElementType {
    /// Resolves a raw tag. Tag 0 (undefined) and anything past `Bfloat16`
    /// are rejected rather than guessed at.
    pub fn from_tag(tag: i32) -> Result<Self> {
        let t = match tag {
            1 => Self::Float,
            2 => Self::Uint8,
            3 => Self::Int8,
            4 => Self::Uint16,
            5 => Self::Int16,
            6 => Self::Int32,
            7 => Self::Int64,
            8 => Self::String,
            9 => Self::Bool,
            10 => Self::Float16,
            11 => Self::Double,
            12 => Self::Uint32,
            13 => Self::Uint64,
            14 => Self::Complex64,
            15 => Self::Complex128,
            16 => Self::Bfloat16,
            other => return Err(OrtError::UnknownElementType(other)),
        };
        Ok(t)
    }

    pub fn tag(&self) -> i32 {
        *self as i32
    }

    /// Packed width in bytes, `None` for variable-width strings.
    pub fn width(&self) -> Option<usize> {
        match self {
            Self::Uint8 | Self::Int8 | Self::Bool => Some(1),
            Self::Uint16 | Self::Int16 | Self::Float16 | Self::Bfloat16 => Some(2),
            Self::Float | Self::Int32 | Self::Uint32 => Some(4),
            Self::Double | Self::Int64 | Self::Uint64 | Self::Complex64 => Some(8),
            Self::Complex128 => Some(16),
            Self::String => None,
        }
    }

    /// Reports whether tensors of this type can be marshalled.
    pub fn is_supported(&self) -> bool {
        !matches!(
            self,
            Self::Float16 | Self::Bfloat16 | Self::Complex64 | Self::Complex128
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            Self::Float | Self::Double | Self::Float16 | Self::Bfloat16
        )
    }

    /// Fails with `UnsupportedType` for known tags that are not marshalled.
    pub fn ensure_supported(&self) -> Result<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(OrtError::UnsupportedType(*self))
        }
    }

    /// Lowercase ONNX name, e.g. `float` or `uint16`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Uint8 => "uint8",
            Self::Int8 => "int8",
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Float16 => "float16",
            Self::Double => "double",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Complex64 => "complex64",
            Self::Complex128 => "complex128",
            Self::Bfloat16 => "bfloat16",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust types that map one-to-one onto a marshalled [`ElementType`].
pub trait Element: sealed::Sealed + Clone + Send + Sync + 'static {
    const TYPE: ElementType;

    #[doc(hidden)]
    fn into_data(values: Vec<Self>) -> TensorData;

    #[doc(hidden)]
    fn view(data: &TensorData) -> Option<&[Self]>;
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const TYPE: ElementType = ElementType::$variant;

                fn into_data(values: Vec<Self>) -> TensorData {
                    TensorData::$variant(values)
                }

                fn view(data: &TensorData) -> Option<&[Self]> {
                    match data {
                        TensorData::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_element! {
    f32 => Float,
    f64 => Double,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    bool => Bool,
    String => String,
}
