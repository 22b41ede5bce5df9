//! Serialized tensor records: the ONNX `TensorProto` wire format used by
//! model test data (`input_0.pb`, `output_0.pb`), and a JSON form of the
//! same record.
//!
//! Only the fields needed to describe a dense tensor are understood:
//!
//! ```text
//!  1 dims         repeated int64 (packed or not)
//!  2 data_type    int32 element tag
//!  4 float_data   repeated float
//!  5 int32_data   repeated int32 (also int8/int16/uint8/uint16/bool)
//!  6 string_data  repeated bytes
//!  7 int64_data   repeated int64
//!  8 name         string
//!  9 raw_data     bytes, packed little-endian
//! 10 double_data  repeated double
//! 11 uint64_data  repeated uint64 (also uint32)
//! 14 data_location  EXTERNAL (1) is rejected
//! ```
//!
//! Other fields are skipped.

use std::path::Path;

use base64::Engine as _;
use prost::Message;
use serde::{Deserialize, Serialize};

use crate::element::ElementType;
use crate::error::{OrtError, Result};
use crate::tensor::{element_count, Tensor, TensorData};
use crate::value::NamedValue;

/// External storage marker for `data_location`.
const DATA_LOCATION_EXTERNAL: i32 = 1;

/// The `TensorProto` subset read from and written to `.pb` files.
#[derive(Clone, PartialEq, Message)]
struct TensorProto {
    #[prost(int64, repeated, tag = "1")]
    dims: Vec<i64>,
    #[prost(int32, tag = "2")]
    data_type: i32,
    #[prost(float, repeated, tag = "4")]
    float_data: Vec<f32>,
    #[prost(int32, repeated, tag = "5")]
    int32_data: Vec<i32>,
    #[prost(bytes = "vec", repeated, tag = "6")]
    string_data: Vec<Vec<u8>>,
    #[prost(int64, repeated, tag = "7")]
    int64_data: Vec<i64>,
    #[prost(string, tag = "8")]
    name: String,
    #[prost(bytes = "vec", tag = "9")]
    raw_data: Vec<u8>,
    #[prost(double, repeated, tag = "10")]
    double_data: Vec<f64>,
    #[prost(uint64, repeated, tag = "11")]
    uint64_data: Vec<u64>,
    #[prost(int32, tag = "14")]
    data_location: i32,
}

/// One serialized tensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub dims: Vec<i64>,
    pub data_type: i32,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub raw_data: Vec<u8>,
    #[serde(default, with = "json_floats", skip_serializing_if = "Vec::is_empty")]
    pub float_data: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub int32_data: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub string_data: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub int64_data: Vec<i64>,
    #[serde(default, with = "json_floats", skip_serializing_if = "Vec::is_empty")]
    pub double_data: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uint64_data: Vec<u64>,
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// JSON has no literal for NaN or infinities; they travel as the strings
// "NaN", "Infinity" and "-Infinity".
mod json_floats {
    use serde::de::DeserializeOwned;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub trait JsonFloat: Copy + Serialize + DeserializeOwned {
        const NAN: Self;
        const INFINITY: Self;
        const NEG_INFINITY: Self;
        fn is_nan(self) -> bool;
        fn is_infinite(self) -> bool;
        fn is_sign_negative(self) -> bool;
    }

    macro_rules! impl_json_float {
        ($($ty:ty),*) => {
            $(
                impl JsonFloat for $ty {
                    const NAN: Self = <$ty>::NAN;
                    const INFINITY: Self = <$ty>::INFINITY;
                    const NEG_INFINITY: Self = <$ty>::NEG_INFINITY;
                    fn is_nan(self) -> bool {
                        <$ty>::is_nan(self)
                    }
                    fn is_infinite(self) -> bool {
                        <$ty>::is_infinite(self)
                    }
                    fn is_sign_negative(self) -> bool {
                        <$ty>::is_sign_negative(self)
                    }
                }
            )*
        };
    }

    impl_json_float!(f32, f64);

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Element<T> {
        Number(T),
        Name(String),
    }

    pub fn serialize<T: JsonFloat, S: Serializer>(values: &[T], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(values.len()))?;
        for &v in values {
            if v.is_nan() {
                seq.serialize_element("NaN")?;
            } else if v.is_infinite() {
                seq.serialize_element(if v.is_sign_negative() { "-Infinity" } else { "Infinity" })?;
            } else {
                seq.serialize_element(&v)?;
            }
        }
        seq.end()
    }

    pub fn deserialize<'de, T: JsonFloat, D: Deserializer<'de>>(d: D) -> Result<Vec<T>, D::Error> {
        Vec::<Element<T>>::deserialize(d)?
            .into_iter()
            .map(|e| match e {
                Element::Number(v) => Ok(v),
                Element::Name(name) => match name.as_str() {
                    "NaN" => Ok(T::NAN),
                    "Infinity" => Ok(T::INFINITY),
                    "-Infinity" => Ok(T::NEG_INFINITY),
                    other => Err(serde::de::Error::custom(format!("invalid float {other:?}"))),
                },
            })
            .collect()
    }
}

impl TensorRecord {
    /// Encodes a tensor: numeric and bool data as `raw_data`, strings as
    /// `string_data`.
    pub fn from_tensor(name: &str, tensor: &Tensor) -> Self {
        let mut rec = Self {
            name: name.to_string(),
            dims: tensor.shape().to_vec(),
            data_type: tensor.element_type().tag(),
            ..Default::default()
        };
        match tensor.data() {
            TensorData::String(v) => rec.string_data = v.clone(),
            data => rec.raw_data = data.to_le_bytes().unwrap_or_default(),
        }
        rec
    }

    pub fn element_type(&self) -> Result<ElementType> {
        ElementType::from_tag(self.data_type)
    }

    /// Decodes the record into a dense tensor.
    pub fn to_tensor(&self) -> Result<Tensor> {
        let elem = self.element_type()?;
        elem.ensure_supported()?;
        let count = element_count(&self.dims)
            .ok_or_else(|| OrtError::InvalidShape(self.dims.clone()))?;

        if !self.raw_data.is_empty() {
            return Tensor::from_le_bytes(elem, &self.dims, &self.raw_data);
        }

        let narrow = |what: &str| {
            OrtError::InvalidRecord(format!("{what} value out of range for {elem}"))
        };
        let data = match elem {
            ElementType::Float => TensorData::Float(self.float_data.clone()),
            ElementType::Double => TensorData::Double(self.double_data.clone()),
            ElementType::Int32 => TensorData::Int32(self.int32_data.clone()),
            ElementType::Int64 => TensorData::Int64(self.int64_data.clone()),
            ElementType::Uint64 => TensorData::Uint64(self.uint64_data.clone()),
            ElementType::String => TensorData::String(self.string_data.clone()),
            ElementType::Bool => TensorData::Bool(self.int32_data.iter().map(|&v| v != 0).collect()),
            ElementType::Int8 => TensorData::Int8(
                self.int32_data
                    .iter()
                    .map(|&v| i8::try_from(v).map_err(|_| narrow("int32_data")))
                    .collect::<Result<_>>()?,
            ),
            ElementType::Int16 => TensorData::Int16(
                self.int32_data
                    .iter()
                    .map(|&v| i16::try_from(v).map_err(|_| narrow("int32_data")))
                    .collect::<Result<_>>()?,
            ),
            ElementType::Uint8 => TensorData::Uint8(
                self.int32_data
                    .iter()
                    .map(|&v| u8::try_from(v).map_err(|_| narrow("int32_data")))
                    .collect::<Result<_>>()?,
            ),
            ElementType::Uint16 => TensorData::Uint16(
                self.int32_data
                    .iter()
                    .map(|&v| u16::try_from(v).map_err(|_| narrow("int32_data")))
                    .collect::<Result<_>>()?,
            ),
            ElementType::Uint32 => TensorData::Uint32(
                self.uint64_data
                    .iter()
                    .map(|&v| u32::try_from(v).map_err(|_| narrow("uint64_data")))
                    .collect::<Result<_>>()?,
            ),
            other => return Err(OrtError::UnsupportedType(other)),
        };
        if data.len() != count {
            return Err(OrtError::DataLength {
                shape: self.dims.clone(),
                expected: count,
                got: data.len(),
            });
        }
        Tensor::from_data(&self.dims, data)
    }

    /// Decodes into a named value, using `fallback` when the record is
    /// unnamed.
    pub fn to_named_value(&self, fallback: &str) -> Result<NamedValue> {
        let name = if self.name.is_empty() {
            fallback
        } else {
            &self.name
        };
        Ok(NamedValue::from_tensor(name, self.to_tensor()?))
    }

    /// Reads a record file: `.json` as JSON, anything else as protobuf.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            return serde_json::from_slice(&data)
                .map_err(|e| OrtError::InvalidRecord(format!("{}: {e}", path.display())));
        }
        Self::decode(&data)
    }

    /// Writes a record file in the format chosen by its extension.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::to_vec_pretty(self).map_err(|e| OrtError::InvalidRecord(e.to_string()))?
        } else {
            self.encode()
        };
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Decodes `TensorProto` wire bytes. Unknown fields are skipped.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let proto = TensorProto::decode(buf)
            .map_err(|e| OrtError::InvalidRecord(format!("protobuf: {e}")))?;
        if proto.data_location == DATA_LOCATION_EXTERNAL {
            return Err(OrtError::InvalidRecord(
                "externally stored tensor data is not supported".into(),
            ));
        }
        let string_data = proto
            .string_data
            .into_iter()
            .map(|b| {
                String::from_utf8(b)
                    .map_err(|e| OrtError::InvalidRecord(format!("string_data: {e}")))
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            name: proto.name,
            dims: proto.dims,
            data_type: proto.data_type,
            raw_data: proto.raw_data,
            float_data: proto.float_data,
            int32_data: proto.int32_data,
            string_data,
            int64_data: proto.int64_data,
            double_data: proto.double_data,
            uint64_data: proto.uint64_data,
        })
    }

    /// Encodes as `TensorProto` wire bytes (packed repeated fields).
    pub fn encode(&self) -> Vec<u8> {
        TensorProto {
            dims: self.dims.clone(),
            data_type: self.data_type,
            float_data: self.float_data.clone(),
            int32_data: self.int32_data.clone(),
            string_data: self.string_data.iter().map(|s| s.clone().into_bytes()).collect(),
            int64_data: self.int64_data.clone(),
            name: self.name.clone(),
            raw_data: self.raw_data.clone(),
            double_data: self.double_data.clone(),
            uint64_data: self.uint64_data.clone(),
            data_location: 0,
        }
        .encode_to_vec()
    }

    /// Raw payload as base64, handy for logs and JSON fixtures.
    pub fn raw_data_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.raw_data)
    }
}
