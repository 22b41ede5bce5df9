//! Pass-through reference engine.
//!
//! Loads [`GraphDocument`] JSON models: declared inputs and outputs,
//! initializers, constant values and `Identity` wiring. No arithmetic
//! operator is implemented. Every run evaluates in its own environment,
//! so one loaded model serves any number of concurrent runs.

mod graph;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, warn};

use crate::engine::{Engine, EngineModel, GraphMetadata, ModelSource};
use crate::error::{ErrorCode, OrtError, Result};
use crate::options::{ExecutionProvider, RunOptions, SessionOptions};
use crate::profile::Profiler;
use crate::value::{NamedValue, Value};

pub use graph::{
    ConstantSpec, DimSpec, GraphDocument, InitializerSpec, NodeSpec, TypeSpec, ValueInfo,
    ValueSpec,
};

use graph::{CompiledGraph, Op};

/// Engine for [`GraphDocument`] models.
#[derive(Debug, Default)]
pub struct ReferenceEngine;

impl ReferenceEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for ReferenceEngine {
    fn name(&self) -> &str {
        "reference"
    }

    fn load(&self, source: ModelSource<'_>, options: &SessionOptions) -> Result<Box<dyn EngineModel>> {
        let load_start = Instant::now();
        let profiler = Profiler::new(options.enable_profiling(), options.profile_output_prefix());

        let doc = match source {
            ModelSource::Path(path) => {
                let data = std::fs::read(path).map_err(|e| {
                    let code = if e.kind() == std::io::ErrorKind::NotFound {
                        ErrorCode::NoSuchFile
                    } else {
                        ErrorCode::Fail
                    };
                    OrtError::model_load(code, format!("Load model from {} failed: {e}", path.display()))
                })?;
                GraphDocument::parse(&data)?
            }
            ModelSource::Memory(data) => {
                if data.is_empty() {
                    return Err(OrtError::EmptyData);
                }
                GraphDocument::parse(data)?
            }
        };

        let provider = select_provider(options.execution_providers())?;
        let graph = CompiledGraph::compile(&doc)?;
        debug!(
            model = %graph.name,
            provider = %provider,
            nodes = graph.nodes.len(),
            optimization = ?options.graph_optimization_level(),
            execution_mode = ?options.execution_mode(),
            intra_op_threads = options.intra_op_num_threads(),
            inter_op_threads = options.inter_op_num_threads(),
            "graph placed"
        );

        if let Some(path) = options.optimized_model_path() {
            doc.pruned().write_file(path)?;
            debug!(path = %path.display(), "optimized model written");
        }

        profiler.record(
            "model_loading",
            load_start,
            load_start.elapsed(),
            Default::default(),
        );
        Ok(Box::new(ReferenceModel { graph, profiler }))
    }
}

/// Picks the first usable provider in priority order. The reference
/// engine runs everything on the CPU; other providers are skipped.
fn select_provider(providers: &[ExecutionProvider]) -> Result<ExecutionProvider> {
    for p in providers {
        match p {
            ExecutionProvider::Cpu { .. } => return Ok(p.clone()),
            ExecutionProvider::Named { name, .. } if name.is_empty() => {
                return Err(OrtError::InvalidOption("execution provider name is empty".into()));
            }
            other => warn!(provider = %other, "execution provider not available, skipping"),
        }
    }
    Ok(ExecutionProvider::cpu())
}

struct ReferenceModel {
    graph: CompiledGraph,
    profiler: Profiler,
}

impl ReferenceModel {
    fn evaluate(
        &self,
        inputs: &[NamedValue],
        output_names: &[&str],
        run_options: &RunOptions,
    ) -> Result<Vec<Value>> {
        let mut env: HashMap<&str, &Value> = HashMap::with_capacity(
            self.graph.baked.len() + inputs.len() + self.graph.nodes.len(),
        );
        for (name, value) in &self.graph.baked {
            env.insert(name, value);
        }
        // Feeds shadow overridable initializers.
        for input in inputs {
            env.insert(input.name(), input.value());
        }

        for node in &self.graph.nodes {
            if run_options.terminate() {
                return Err(OrtError::Terminated);
            }
            match node.op {
                Op::Identity => {
                    let src = env.get(node.inputs[0].as_str()).copied().ok_or_else(|| {
                        OrtError::engine(
                            ErrorCode::InvalidArgument,
                            format!("value {:?} is not available", node.inputs[0]),
                        )
                    })?;
                    env.insert(node.outputs[0].as_str(), src);
                }
            }
        }

        if run_options.terminate() {
            return Err(OrtError::Terminated);
        }
        output_names
            .iter()
            .map(|name| {
                env.get(name).map(|v| (*v).clone()).ok_or_else(|| {
                    OrtError::engine(
                        ErrorCode::InvalidArgument,
                        format!("output {name:?} was not produced"),
                    )
                })
            })
            .collect()
    }
}

impl EngineModel for ReferenceModel {
    fn metadata(&self) -> &GraphMetadata {
        &self.graph.metadata
    }

    fn run(
        &self,
        inputs: &[NamedValue],
        output_names: &[&str],
        run_options: &RunOptions,
    ) -> Result<Vec<Value>> {
        if run_options.terminate() {
            return Err(OrtError::Terminated);
        }
        let start = Instant::now();
        let result = self.evaluate(inputs, output_names, run_options);
        if self.profiler.is_active() {
            let mut args = serde_json::Map::new();
            args.insert("log_id".into(), run_options.log_id().into());
            args.insert("ok".into(), result.is_ok().into());
            self.profiler.record("model_run", start, start.elapsed(), args);
        }
        result
    }

    fn end_profiling(&self) -> Result<Option<PathBuf>> {
        self.profiler.finish()
    }
}
