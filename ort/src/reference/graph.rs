//! JSON graph documents understood by the reference engine, and their
//! compiled form.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::element::ElementType;
use crate::engine::GraphMetadata;
use crate::error::{ErrorCode, OrtError, Result};
use crate::metadata::{NodeMetadata, DYNAMIC_DIM};
use crate::record::TensorRecord;
use crate::tensor::Tensor;
use crate::value::{MapValue, Value, ValueKind};

/// One dimension of a declared tensor shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimSpec {
    Fixed(i64),
    Symbolic(String),
    Unknown,
}

/// Declared type of a graph input or output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSpec {
    Tensor {
        elem_type: ElementType,
        #[serde(default)]
        shape: Vec<DimSpec>,
    },
    Sequence {
        elem: Box<TypeSpec>,
    },
    Map {
        key: ElementType,
        value: Box<TypeSpec>,
    },
}

impl TypeSpec {
    pub fn tensor(elem_type: ElementType, shape: Vec<DimSpec>) -> Self {
        Self::Tensor { elem_type, shape }
    }

    /// Tensor type with only fixed dimensions (`-1` becomes unknown).
    pub fn fixed(elem_type: ElementType, dims: &[i64]) -> Self {
        let shape = dims
            .iter()
            .map(|&d| if d == DYNAMIC_DIM { DimSpec::Unknown } else { DimSpec::Fixed(d) })
            .collect();
        Self::Tensor { elem_type, shape }
    }

    fn static_type(&self) -> StaticType {
        match self {
            Self::Tensor { elem_type, shape } => StaticType::tensor(
                *elem_type,
                shape
                    .iter()
                    .map(|d| match d {
                        DimSpec::Fixed(n) if *n >= 0 => Some(*n),
                        _ => None,
                    })
                    .collect(),
            ),
            Self::Sequence { .. } => StaticType::of_kind(ValueKind::Sequence),
            Self::Map { .. } => StaticType::of_kind(ValueKind::Map),
        }
    }

    fn to_metadata(&self) -> Result<NodeMetadata> {
        match self {
            Self::Tensor { elem_type, shape } => {
                let mut dims = Vec::with_capacity(shape.len());
                let mut syms = Vec::with_capacity(shape.len());
                for d in shape {
                    match d {
                        DimSpec::Fixed(n) if *n >= 0 => {
                            dims.push(*n);
                            syms.push(String::new());
                        }
                        DimSpec::Fixed(n) => return Err(OrtError::InvalidShape(vec![*n])),
                        DimSpec::Symbolic(s) => {
                            dims.push(DYNAMIC_DIM);
                            syms.push(s.clone());
                        }
                        DimSpec::Unknown => {
                            dims.push(DYNAMIC_DIM);
                            syms.push(String::new());
                        }
                    }
                }
                NodeMetadata::tensor(*elem_type, dims, syms)
            }
            Self::Sequence { .. } => Ok(NodeMetadata::sequence()),
            Self::Map { .. } => Ok(NodeMetadata::map()),
        }
    }
}

/// A named, typed graph input or output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeSpec,
}

/// A tensor baked into the model. Overridable ones may be replaced by a
/// same-named feed for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializerSpec {
    pub name: String,
    #[serde(default)]
    pub overridable: bool,
    pub tensor: TensorRecord,
}

/// Serialized form of a constant value of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSpec {
    Tensor(TensorRecord),
    Sequence(Vec<ValueSpec>),
    Map { keys: TensorRecord, values: TensorRecord },
}

impl ValueSpec {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Tensor(t) => Self::Tensor(TensorRecord::from_tensor("", t)),
            Value::Sequence(items) => Self::Sequence(items.iter().map(Self::from_value).collect()),
            Value::Map(m) => Self::Map {
                keys: TensorRecord::from_tensor("", m.keys()),
                values: TensorRecord::from_tensor("", m.values()),
            },
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        match self {
            Self::Tensor(rec) => Ok(Value::Tensor(rec.to_tensor()?)),
            Self::Sequence(items) => Ok(Value::Sequence(
                items.iter().map(Self::to_value).collect::<Result<_>>()?,
            )),
            Self::Map { keys, values } => Ok(Value::Map(MapValue::new(
                keys.to_tensor()?,
                values.to_tensor()?,
            )?)),
        }
    }
}

/// A named constant value of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantSpec {
    pub name: String,
    pub value: ValueSpec,
}

/// One operator application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub op_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// A complete reference model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub producer: String,
    #[serde(default)]
    pub inputs: Vec<ValueInfo>,
    #[serde(default)]
    pub outputs: Vec<ValueInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initializers: Vec<InitializerSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constants: Vec<ConstantSpec>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

impl GraphDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn input(mut self, name: impl Into<String>, ty: TypeSpec) -> Self {
        self.inputs.push(ValueInfo { name: name.into(), ty });
        self
    }

    pub fn output(mut self, name: impl Into<String>, ty: TypeSpec) -> Self {
        self.outputs.push(ValueInfo { name: name.into(), ty });
        self
    }

    pub fn initializer(mut self, name: impl Into<String>, tensor: &Tensor, overridable: bool) -> Self {
        self.initializers.push(InitializerSpec {
            name: name.into(),
            overridable,
            tensor: TensorRecord::from_tensor("", tensor),
        });
        self
    }

    pub fn constant(mut self, name: impl Into<String>, value: &Value) -> Self {
        self.constants.push(ConstantSpec {
            name: name.into(),
            value: ValueSpec::from_value(value),
        });
        self
    }

    pub fn node(mut self, op_type: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        self.nodes.push(NodeSpec {
            op_type: op_type.to_string(),
            name: String::new(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Shorthand for an `Identity` node from `from` to `to`.
    pub fn identity(self, from: &str, to: &str) -> Self {
        self.node("Identity", &[from], &[to])
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| {
            OrtError::model_load(
                ErrorCode::InvalidProtobuf,
                format!("failed to parse model document: {e}"),
            )
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // A document holds only strings, numbers and sequences of them.
        serde_json::to_vec_pretty(self).unwrap_or_default()
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Drops nodes, constants and non-overridable initializers that no
    /// graph output depends on.
    pub fn pruned(&self) -> Self {
        let mut live: HashSet<&str> = self.outputs.iter().map(|o| o.name.as_str()).collect();
        let mut keep_nodes = vec![false; self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate().rev() {
            if node.outputs.iter().any(|o| live.contains(o.as_str())) {
                keep_nodes[i] = true;
                live.extend(node.inputs.iter().map(String::as_str));
            }
        }
        Self {
            name: self.name.clone(),
            producer: self.producer.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            initializers: self
                .initializers
                .iter()
                .filter(|i| i.overridable || live.contains(i.name.as_str()))
                .cloned()
                .collect(),
            constants: self
                .constants
                .iter()
                .filter(|c| live.contains(c.name.as_str()))
                .cloned()
                .collect(),
            nodes: self
                .nodes
                .iter()
                .zip(keep_nodes)
                .filter_map(|(n, keep)| keep.then(|| n.clone()))
                .collect(),
        }
    }
}

/// What compile time knows about a value. `None` dims are unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StaticType {
    kind: ValueKind,
    elem: Option<ElementType>,
    dims: Vec<Option<i64>>,
}

impl StaticType {
    fn tensor(elem: ElementType, dims: Vec<Option<i64>>) -> Self {
        Self {
            kind: ValueKind::Tensor,
            elem: Some(elem),
            dims,
        }
    }

    fn of_kind(kind: ValueKind) -> Self {
        Self {
            kind,
            elem: None,
            dims: Vec::new(),
        }
    }

    fn of_tensor(tensor: &Tensor) -> Self {
        Self::tensor(
            tensor.element_type(),
            tensor.shape().iter().map(|&d| Some(d)).collect(),
        )
    }

    fn of_value(value: &Value) -> Self {
        match value {
            Value::Tensor(t) => Self::of_tensor(t),
            other => Self::of_kind(other.kind()),
        }
    }

    fn same_type(&self, other: &Self) -> bool {
        self.kind == other.kind && self.elem == other.elem
    }

    /// True when both shapes are known well enough to disagree: a rank
    /// difference, or a dimension fixed to different sizes on each side.
    fn shape_conflicts(&self, other: &Self) -> bool {
        if self.kind != ValueKind::Tensor {
            return false;
        }
        self.dims.len() != other.dims.len()
            || self
                .dims
                .iter()
                .zip(&other.dims)
                .any(|(a, b)| matches!((a, b), (Some(a), Some(b)) if a != b))
    }

    fn describe(&self) -> String {
        match self.elem {
            Some(e) => format!("tensor({e})"),
            None => self.kind.to_string(),
        }
    }

    fn describe_shape(&self) -> String {
        let dims: Vec<String> = self
            .dims
            .iter()
            .map(|d| d.map_or_else(|| "?".to_string(), |n| n.to_string()))
            .collect();
        format!("[{}]", dims.join(","))
    }
}

/// Supported operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Identity,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledNode {
    pub op: Op,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// A validated graph ready to evaluate.
#[derive(Debug)]
pub(crate) struct CompiledGraph {
    pub name: String,
    pub metadata: GraphMetadata,
    /// Initializers and constants, by name.
    pub baked: HashMap<String, Value>,
    pub nodes: Vec<CompiledNode>,
}

fn define<'a>(defined: &mut HashMap<&'a str, StaticType>, name: &'a str, ty: StaticType) -> Result<()> {
    if name.is_empty() {
        return Err(invalid_graph("empty value name"));
    }
    if defined.insert(name, ty).is_some() {
        return Err(invalid_graph(format!("duplicate definition of {name:?}")));
    }
    Ok(())
}

fn invalid_graph(message: impl Into<String>) -> OrtError {
    OrtError::model_load(ErrorCode::InvalidGraph, message)
}

impl CompiledGraph {
    pub fn compile(doc: &GraphDocument) -> Result<Self> {
        let mut defined: HashMap<&str, StaticType> = HashMap::new();

        let mut metadata = GraphMetadata::default();
        for input in &doc.inputs {
            define(&mut defined, &input.name, input.ty.static_type())?;
            metadata
                .inputs
                .insert(input.name.clone(), input.ty.to_metadata().map_err(as_graph_error)?)?;
        }

        let mut baked = HashMap::new();
        for init in &doc.initializers {
            let tensor = init.tensor.to_tensor().map_err(|e| {
                invalid_graph(format!("initializer {:?}: {e}", init.name))
            })?;
            define(&mut defined, &init.name, StaticType::of_tensor(&tensor))?;
            if init.overridable {
                let meta = NodeMetadata::fixed(tensor.element_type(), tensor.shape())?;
                metadata
                    .overridable_initializers
                    .insert(init.name.clone(), meta)?;
            }
            baked.insert(init.name.clone(), Value::Tensor(tensor));
        }

        for constant in &doc.constants {
            let value = constant.value.to_value().map_err(|e| {
                invalid_graph(format!("constant {:?}: {e}", constant.name))
            })?;
            let ty = StaticType::of_value(&value);
            define(&mut defined, &constant.name, ty)?;
            baked.insert(constant.name.clone(), value);
        }

        let mut nodes = Vec::with_capacity(doc.nodes.len());
        for (i, node) in doc.nodes.iter().enumerate() {
            let label = if node.name.is_empty() {
                format!("node {i} ({})", node.op_type)
            } else {
                format!("node {:?} ({})", node.name, node.op_type)
            };
            let op = match node.op_type.as_str() {
                "Identity" => Op::Identity,
                other => {
                    return Err(OrtError::model_load(
                        ErrorCode::NotImplemented,
                        format!("Could not find an implementation for {label}: unknown op {other:?}"),
                    ));
                }
            };
            if node.inputs.len() != 1 || node.outputs.len() != 1 {
                return Err(invalid_graph(format!(
                    "{label} takes 1 input and 1 output, got {} and {}",
                    node.inputs.len(),
                    node.outputs.len()
                )));
            }
            let src = node.inputs[0].as_str();
            let ty = defined.get(src).cloned().ok_or_else(|| {
                invalid_graph(format!("{label} reads undefined value {src:?}"))
            })?;
            define(&mut defined, &node.outputs[0], ty)?;
            nodes.push(CompiledNode {
                op,
                inputs: node.inputs.clone(),
                outputs: node.outputs.clone(),
            });
        }

        for output in &doc.outputs {
            let actual = defined.get(output.name.as_str()).ok_or_else(|| {
                invalid_graph(format!("graph output {:?} is never produced", output.name))
            })?;
            let declared = output.ty.static_type();
            if !actual.same_type(&declared) {
                return Err(invalid_graph(format!(
                    "graph output {:?} declared as {} but produced as {}",
                    output.name,
                    declared.describe(),
                    actual.describe()
                )));
            }
            if actual.shape_conflicts(&declared) {
                return Err(invalid_graph(format!(
                    "graph output {:?} declared with shape {} but produced with shape {}",
                    output.name,
                    declared.describe_shape(),
                    actual.describe_shape()
                )));
            }
            metadata
                .outputs
                .insert(output.name.clone(), output.ty.to_metadata().map_err(as_graph_error)?)
                .map_err(as_graph_error)?;
        }

        Ok(Self {
            name: doc.name.clone(),
            metadata,
            baked,
            nodes,
        })
    }
}

fn as_graph_error(e: OrtError) -> OrtError {
    match e {
        e @ OrtError::ModelLoad { .. } => e,
        other => invalid_graph(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> GraphDocument {
        GraphDocument::new("identity")
            .input(
                "x",
                TypeSpec::tensor(
                    ElementType::Float,
                    vec![DimSpec::Symbolic("n".into()), DimSpec::Fixed(2)],
                ),
            )
            .output("y", TypeSpec::fixed(ElementType::Float, &[-1, 2]))
            .identity("x", "y")
    }

    #[test]
    fn document_json_shape() {
        let json = serde_json::to_value(doc()).unwrap();
        assert_eq!(json["inputs"][0]["type"]["tensor"]["elem_type"], "FLOAT");
        assert_eq!(json["inputs"][0]["type"]["tensor"]["shape"][0], "n");
        assert_eq!(json["outputs"][0]["type"]["tensor"]["shape"][0], serde_json::Value::Null);
        let back = GraphDocument::parse(&doc().to_bytes()).unwrap();
        assert_eq!(back, doc());
    }

    #[test]
    fn compile_metadata() {
        let g = CompiledGraph::compile(&doc()).unwrap();
        let x = &g.metadata.inputs["x"];
        assert_eq!(x.dimensions(), &[-1, 2]);
        assert_eq!(x.symbolic_dimensions(), &["n".to_string(), String::new()]);
        assert_eq!(g.metadata.outputs["y"].dimensions(), &[-1, 2]);
        assert_eq!(g.nodes.len(), 1);
    }

    #[test]
    fn unknown_op() {
        let d = doc().node("Conv", &["x"], &["z"]);
        let err = CompiledGraph::compile(&d).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotImplemented);
    }

    #[test]
    fn undefined_and_duplicate_names() {
        let d = GraphDocument::new("bad")
            .output("y", TypeSpec::fixed(ElementType::Float, &[1]))
            .identity("nope", "y");
        assert_eq!(CompiledGraph::compile(&d).unwrap_err().code(), ErrorCode::InvalidGraph);

        let d = doc().identity("x", "y");
        assert_eq!(CompiledGraph::compile(&d).unwrap_err().code(), ErrorCode::InvalidGraph);
    }

    #[test]
    fn output_type_must_match_source() {
        let d = GraphDocument::new("bad")
            .input("x", TypeSpec::fixed(ElementType::Int32, &[1]))
            .output("y", TypeSpec::fixed(ElementType::Int64, &[1]))
            .identity("x", "y");
        let err = CompiledGraph::compile(&d).unwrap_err();
        assert!(err.to_string().contains("tensor(int64)"));
    }

    #[test]
    fn output_shape_must_agree_with_source() {
        let rank = GraphDocument::new("bad")
            .input("x", TypeSpec::fixed(ElementType::Float, &[-1, 2]))
            .output("z", TypeSpec::fixed(ElementType::Float, &[2]))
            .identity("x", "z");
        let err = CompiledGraph::compile(&rank).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidGraph);
        assert!(err.to_string().contains("declared with shape [2] but produced with shape [?,2]"));

        let size = GraphDocument::new("bad")
            .input("x", TypeSpec::fixed(ElementType::Float, &[-1, 2]))
            .output("y", TypeSpec::fixed(ElementType::Float, &[4, 3]))
            .identity("x", "y");
        assert_eq!(CompiledGraph::compile(&size).unwrap_err().code(), ErrorCode::InvalidGraph);

        // Unknown dims on either side are compatible.
        let one = Tensor::new(&[1, 3], vec![0.5f32; 3]).unwrap();
        let ok = GraphDocument::new("ok")
            .input("x", TypeSpec::fixed(ElementType::Float, &[-1, 2]))
            .output("y", TypeSpec::fixed(ElementType::Float, &[7, -1]))
            .initializer("w", &one, false)
            .output("w", TypeSpec::fixed(ElementType::Float, &[-1, 3]))
            .identity("x", "y");
        CompiledGraph::compile(&ok).unwrap();

        let wrong_init = GraphDocument::new("bad")
            .initializer("w", &one, false)
            .output("w", TypeSpec::fixed(ElementType::Float, &[1, 4]));
        assert_eq!(CompiledGraph::compile(&wrong_init).unwrap_err().code(), ErrorCode::InvalidGraph);
    }

    #[test]
    fn non_finite_float_data_survives_document_bytes() {
        let rec = TensorRecord {
            dims: vec![2],
            data_type: ElementType::Float.tag(),
            float_data: vec![f32::NAN, f32::NEG_INFINITY],
            ..Default::default()
        };
        let mut d = GraphDocument::new("nan").output("w", TypeSpec::fixed(ElementType::Float, &[2]));
        d.initializers.push(InitializerSpec {
            name: "w".into(),
            overridable: false,
            tensor: rec,
        });
        let back = GraphDocument::parse(&d.to_bytes()).unwrap();
        let g = CompiledGraph::compile(&back).unwrap();
        let w = g.baked["w"].as_tensor().unwrap().as_slice::<f32>().unwrap();
        assert!(w[0].is_nan());
        assert_eq!(w[1], f32::NEG_INFINITY);
    }

    #[test]
    fn parse_errors_are_invalid_protobuf() {
        let err = GraphDocument::parse(b"\x08\x07garbage").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidProtobuf);
    }

    #[test]
    fn prune_drops_dead_values() {
        let one = Tensor::new(&[1], vec![1.0f32]).unwrap();
        let d = doc()
            .constant("unused", &Value::Tensor(one.clone()))
            .initializer("dead", &one, false)
            .initializer("knob", &one, true)
            .identity("x", "dangling");
        let p = d.pruned();
        assert_eq!(p.nodes.len(), 1);
        assert!(p.constants.is_empty());
        assert_eq!(p.initializers.len(), 1);
        assert_eq!(p.initializers[0].name, "knob");
        CompiledGraph::compile(&p).unwrap();
    }
}
