//! Run one model on tensor records.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use giztoy_ort::record::TensorRecord;
use giztoy_ort::{NamedValue, Session};
use tracing::debug;

use super::{create_env, describe_value, session_options};
use crate::Cli;

/// Run a model on inputs read from tensor records.
#[derive(Args)]
pub struct RunCommand {
    /// Model file
    #[arg(short = 'm', long)]
    model: PathBuf,

    /// Input tensor record (.pb or .json); repeat for each input
    #[arg(short = 'i', long = "input")]
    inputs: Vec<PathBuf>,

    /// Output to fetch; repeat to select several (default: all)
    #[arg(long = "output")]
    outputs: Vec<String>,

    /// Directory to write outputs to as output_<n>.pb
    #[arg(long)]
    save: Option<PathBuf>,
}

impl RunCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let env = create_env(cli)?;
        let options = session_options(cli)?;
        let session = env
            .session_from_file(&self.model, &options)
            .with_context(|| format!("failed to load {}", self.model.display()))?;

        let feeds = read_inputs(&session, &self.inputs)?;
        let names: Vec<&str> = self.outputs.iter().map(String::as_str).collect();
        let requested = (!names.is_empty()).then_some(names.as_slice());
        let outputs = session.run_with(&feeds, requested, None)?;

        for out in &outputs {
            println!("{}: {}", out.name(), describe_value(out.value()));
        }

        if let Some(dir) = &self.save {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            for (i, out) in outputs.iter().enumerate() {
                let path = dir.join(format!("output_{i}.pb"));
                let tensor = out
                    .as_tensor()
                    .with_context(|| format!("output {} is not a tensor", out.name()))?;
                TensorRecord::from_tensor(out.name(), tensor).write_file(&path)?;
                debug!(path = %path.display(), "output saved");
            }
        }

        if let Some(trace) = session.end_profiling()? {
            println!("profile: {}", trace.display());
        }
        Ok(())
    }
}

/// Reads input records, naming unnamed records after the model inputs in
/// declaration order.
pub(crate) fn read_inputs(session: &Session, paths: &[PathBuf]) -> anyhow::Result<Vec<NamedValue>> {
    let declared: Vec<&str> = session.input_metadata().keys().collect();
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let record = TensorRecord::read_file(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let fallback = declared.get(i).copied().unwrap_or_default();
            Ok(record.to_named_value(fallback)?)
        })
        .collect()
}
