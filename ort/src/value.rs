//! Named values: tensors, sequences and maps passed into and out of a run.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementType};
use crate::error::{OrtError, Result};
use crate::tensor::Tensor;

/// Kind of a graph value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Tensor,
    Sequence,
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tensor => "tensor",
            Self::Sequence => "sequence",
            Self::Map => "map",
        })
    }
}

/// Map value stored as two parallel one-dimensional tensors.
///
/// Keys are `int64` or `string`; values are any marshalled element type.
#[derive(Debug, Clone, PartialEq)]
pub struct MapValue {
    keys: Tensor,
    values: Tensor,
}

impl MapValue {
    pub fn new(keys: Tensor, values: Tensor) -> Result<Self> {
        if !matches!(keys.element_type(), ElementType::Int64 | ElementType::String) {
            return Err(OrtError::TypeMismatch {
                expected: "map key int64 or string".into(),
                actual: keys.element_type().to_string(),
            });
        }
        if keys.len() != values.len() {
            return Err(OrtError::DataLength {
                shape: values.shape().to_vec(),
                expected: keys.len(),
                got: values.len(),
            });
        }
        Ok(Self { keys, values })
    }

    /// Builds a map from `(key, value)` pairs, preserving their order.
    pub fn from_entries<K: Element, V: Element>(entries: Vec<(K, V)>) -> Result<Self> {
        let n = entries.len() as i64;
        let (keys, values): (Vec<K>, Vec<V>) = entries.into_iter().unzip();
        Self::new(Tensor::new(&[n], keys)?, Tensor::new(&[n], values)?)
    }

    pub fn keys(&self) -> &Tensor {
        &self.keys
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    pub fn key_type(&self) -> ElementType {
        self.keys.element_type()
    }

    pub fn value_type(&self) -> ElementType {
        self.values.element_type()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Collects the entries into a `HashMap<K, V>`.
    pub fn to_hash_map<K, V>(&self) -> Result<HashMap<K, V>>
    where
        K: Element + Eq + Hash,
        V: Element,
    {
        let keys = self.keys.as_slice::<K>()?;
        let values = self.values.as_slice::<V>()?;
        Ok(keys.iter().cloned().zip(values.iter().cloned()).collect())
    }
}

/// A payload crossing the engine boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(Tensor),
    Sequence(Vec<Value>),
    Map(MapValue),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Tensor(_) => ValueKind::Tensor,
            Self::Sequence(_) => ValueKind::Sequence,
            Self::Map(_) => ValueKind::Map,
        }
    }

    pub fn as_tensor(&self) -> Result<&Tensor> {
        match self {
            Self::Tensor(t) => Ok(t),
            other => Err(other.kind_mismatch(ValueKind::Tensor)),
        }
    }

    pub fn into_tensor(self) -> Result<Tensor> {
        match self {
            Self::Tensor(t) => Ok(t),
            other => Err(other.kind_mismatch(ValueKind::Tensor)),
        }
    }

    pub fn as_sequence(&self) -> Result<&[Value]> {
        match self {
            Self::Sequence(items) => Ok(items),
            other => Err(other.kind_mismatch(ValueKind::Sequence)),
        }
    }

    pub fn as_map(&self) -> Result<&MapValue> {
        match self {
            Self::Map(m) => Ok(m),
            other => Err(other.kind_mismatch(ValueKind::Map)),
        }
    }

    /// Human-readable type, e.g. `tensor(float)` or `seq(map(int64,float))`.
    pub fn type_name(&self) -> String {
        match self {
            Self::Tensor(t) => format!("tensor({})", t.element_type()),
            Self::Sequence(items) => match items.first() {
                Some(first) => format!("seq({})", first.type_name()),
                None => "seq()".to_string(),
            },
            Self::Map(m) => format!("map({},{})", m.key_type(), m.value_type()),
        }
    }

    fn kind_mismatch(&self, expected: ValueKind) -> OrtError {
        OrtError::TypeMismatch {
            expected: expected.to_string(),
            actual: self.type_name(),
        }
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Self::Tensor(t)
    }
}

impl From<MapValue> for Value {
    fn from(m: MapValue) -> Self {
        Self::Map(m)
    }
}

/// A `(name, value)` pair, used for both run inputs and run outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    name: String,
    value: Value,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn from_tensor(name: impl Into<String>, tensor: Tensor) -> Self {
        Self::new(name, tensor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn as_tensor(&self) -> Result<&Tensor> {
        self.value.as_tensor()
    }

    pub fn as_sequence(&self) -> Result<&[Value]> {
        self.value.as_sequence()
    }

    pub fn as_map(&self) -> Result<&MapValue> {
        self.value.as_map()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_from_entries() {
        let m = MapValue::from_entries(vec![(0i64, 0.25f32), (1, 0.75)]).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.key_type(), ElementType::Int64);
        let hm = m.to_hash_map::<i64, f32>().unwrap();
        assert_eq!(hm[&1], 0.75);
    }

    #[test]
    fn map_rejects_float_keys() {
        let keys = Tensor::new(&[1], vec![1.0f32]).unwrap();
        let values = Tensor::new(&[1], vec![1.0f32]).unwrap();
        assert!(MapValue::new(keys, values).is_err());
    }

    #[test]
    fn map_rejects_length_mismatch() {
        let keys = Tensor::new(&[2], vec!["a".to_string(), "b".to_string()]).unwrap();
        let values = Tensor::new(&[1], vec![1.0f32]).unwrap();
        assert!(MapValue::new(keys, values).is_err());
    }

    #[test]
    fn type_names() {
        let m = MapValue::from_entries(vec![("x".to_string(), 1.0f32)]).unwrap();
        let seq = Value::Sequence(vec![Value::Map(m)]);
        assert_eq!(seq.type_name(), "seq(map(string,float))");
        assert_eq!(seq.kind(), ValueKind::Sequence);
        assert!(seq.as_tensor().is_err());
    }

    #[test]
    fn named_value_accessors() {
        let nv = NamedValue::from_tensor("input", Tensor::new(&[1], vec![true]).unwrap());
        assert_eq!(nv.name(), "input");
        assert_eq!(nv.as_tensor().unwrap().as_slice::<bool>().unwrap(), &[true]);
        assert!(nv.as_map().is_err());
    }
}
