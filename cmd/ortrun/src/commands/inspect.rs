//! Print model metadata.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use giztoy_ort::{MetadataMap, NodeMetadata};
use serde::Serialize;

use super::{create_env, session_options};
use crate::Cli;

/// Print inputs, outputs and overridable initializers of a model.
#[derive(Args)]
pub struct InspectCommand {
    /// Model file
    #[arg(short = 'm', long)]
    model: PathBuf,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct NodeInfo {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    dimensions: Vec<i64>,
    symbolic_dimensions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    engine: String,
    inputs: Vec<NodeInfo>,
    outputs: Vec<NodeInfo>,
    overridable_initializers: Vec<NodeInfo>,
}

impl InspectCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let env = create_env(cli)?;
        let options = session_options(cli)?;
        let session = env
            .session_from_file(&self.model, &options)
            .with_context(|| format!("failed to load {}", self.model.display()))?;

        let info = ModelInfo {
            engine: env.engine_name().to_string(),
            inputs: nodes(session.input_metadata()),
            outputs: nodes(session.output_metadata()),
            overridable_initializers: nodes(session.overridable_initializer_metadata()),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
            return Ok(());
        }

        println!("engine: {}", info.engine);
        print_section("inputs", &info.inputs);
        print_section("outputs", &info.outputs);
        if !info.overridable_initializers.is_empty() {
            print_section("overridable initializers", &info.overridable_initializers);
        }
        Ok(())
    }
}

fn nodes(map: &MetadataMap) -> Vec<NodeInfo> {
    map.iter().map(|(name, meta)| node(name, meta)).collect()
}

fn node(name: &str, meta: &NodeMetadata) -> NodeInfo {
    NodeInfo {
        name: name.to_string(),
        ty: meta.type_name(),
        dimensions: meta.dimensions().to_vec(),
        symbolic_dimensions: meta.symbolic_dimensions().to_vec(),
    }
}

fn print_section(title: &str, nodes: &[NodeInfo]) {
    println!("{title}:");
    for n in nodes {
        println!("  {}: {} {}", n.name, n.ty, format_dims(n));
    }
}

/// `[n, 2]` style dims, with symbolic names in place of -1 where known.
fn format_dims(n: &NodeInfo) -> String {
    let dims: Vec<String> = n
        .dimensions
        .iter()
        .zip(&n.symbolic_dimensions)
        .map(|(d, sym)| match (*d, sym.is_empty()) {
            (-1, false) => sym.clone(),
            (-1, true) => "?".to_string(),
            (d, _) => d.to_string(),
        })
        .collect();
    format!("[{}]", dims.join(", "))
}
