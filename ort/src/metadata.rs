//! Static descriptions of graph inputs, outputs and overridable initializers.

use std::collections::HashMap;
use std::ops::Index;

use crate::element::ElementType;
use crate::error::{OrtError, Result};
use crate::value::{Value, ValueKind};

/// Dimension value reported for dynamic (symbolic or unknown) dimensions.
pub const DYNAMIC_DIM: i64 = -1;

/// Type and shape of one graph input, output or initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMetadata {
    kind: ValueKind,
    element_type: Option<ElementType>,
    dimensions: Vec<i64>,
    symbolic_dimensions: Vec<String>,
}

impl NodeMetadata {
    /// Describes a tensor. `symbolic_dimensions` must be as long as
    /// `dimensions`, with "" where a dimension has no symbolic name.
    pub fn tensor(
        element_type: ElementType,
        dimensions: Vec<i64>,
        symbolic_dimensions: Vec<String>,
    ) -> Result<Self> {
        if dimensions.len() != symbolic_dimensions.len() {
            return Err(OrtError::InvalidOption(format!(
                "metadata has {} dimensions but {} symbolic names",
                dimensions.len(),
                symbolic_dimensions.len()
            )));
        }
        if dimensions.iter().any(|&d| d < DYNAMIC_DIM) {
            return Err(OrtError::InvalidShape(dimensions));
        }
        Ok(Self {
            kind: ValueKind::Tensor,
            element_type: Some(element_type),
            dimensions,
            symbolic_dimensions,
        })
    }

    /// Describes a tensor with only fixed dimensions.
    pub fn fixed(element_type: ElementType, dimensions: &[i64]) -> Result<Self> {
        Self::tensor(
            element_type,
            dimensions.to_vec(),
            vec![String::new(); dimensions.len()],
        )
    }

    pub fn sequence() -> Self {
        Self::non_tensor(ValueKind::Sequence)
    }

    pub fn map() -> Self {
        Self::non_tensor(ValueKind::Map)
    }

    fn non_tensor(kind: ValueKind) -> Self {
        Self {
            kind,
            element_type: None,
            dimensions: Vec::new(),
            symbolic_dimensions: Vec::new(),
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_tensor(&self) -> bool {
        self.kind == ValueKind::Tensor
    }

    /// Element type for tensors, `None` for sequences and maps.
    pub fn element_type(&self) -> Option<ElementType> {
        self.element_type
    }

    pub fn dimensions(&self) -> &[i64] {
        &self.dimensions
    }

    pub fn symbolic_dimensions(&self) -> &[String] {
        &self.symbolic_dimensions
    }

    /// Reports whether a concrete shape fits the declared one.
    pub fn accepts_shape(&self, shape: &[i64]) -> bool {
        shape.len() == self.dimensions.len()
            && self
                .dimensions
                .iter()
                .zip(shape)
                .all(|(&want, &got)| want == DYNAMIC_DIM || want == got)
    }

    /// Checks kind, element type and shape of a value fed as `name`.
    pub fn check_value(&self, name: &str, value: &Value) -> Result<()> {
        let wrong_type = || OrtError::InvalidInputType {
            name: name.to_string(),
            expected: self.type_name(),
            actual: value.type_name(),
        };
        if value.kind() != self.kind {
            return Err(wrong_type());
        }
        let Value::Tensor(tensor) = value else {
            return Ok(());
        };
        if Some(tensor.element_type()) != self.element_type {
            return Err(wrong_type());
        }
        if !self.accepts_shape(tensor.shape()) {
            return Err(OrtError::InvalidInputShape {
                name: name.to_string(),
                expected: self.dimensions.clone(),
                actual: tensor.shape().to_vec(),
            });
        }
        Ok(())
    }

    /// ONNX-style type name, e.g. `tensor(float)`.
    pub fn type_name(&self) -> String {
        match (self.kind, self.element_type) {
            (ValueKind::Tensor, Some(t)) => format!("tensor({t})"),
            (kind, _) => kind.to_string(),
        }
    }
}

/// Name → metadata map that keeps graph declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataMap {
    entries: Vec<(String, NodeMetadata)>,
    index: HashMap<String, usize>,
}

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry. Names are unique within one map.
    pub fn insert(&mut self, name: impl Into<String>, meta: NodeMetadata) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(OrtError::InvalidOption(format!(
                "duplicate node name {name:?}"
            )));
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push((name, meta));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&NodeMetadata> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeMetadata)> {
        self.entries.iter().map(|(n, m)| (n.as_str(), m))
    }
}

impl Index<&str> for MetadataMap {
    type Output = NodeMetadata;

    fn index(&self, name: &str) -> &NodeMetadata {
        match self.get(name) {
            Some(m) => m,
            None => panic!("no metadata for {name:?}"),
        }
    }
}
