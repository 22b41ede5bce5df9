//! Run a model-zoo directory against its recorded outputs.

use std::path::PathBuf;

use clap::Args;

use super::{create_env, session_options};
use crate::Cli;
use crate::config::{ActiveSkips, SkipList};
use crate::runner::{print_summary, save_report, ZooRunner};

/// Run every `<opset>/<model>/` under a zoo directory and compare outputs.
#[derive(Args)]
pub struct ZooCommand {
    /// Root of the model zoo
    root: PathBuf,

    /// Skip list (YAML); defaults to the bundled known-bad list
    #[arg(long)]
    skip_list: Option<PathBuf>,

    /// Run every model, ignoring any skip list
    #[arg(long, conflicts_with = "skip_list")]
    no_skips: bool,

    /// Write the JSON report here
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

impl ZooCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let env = create_env(cli)?;
        let options = session_options(cli)?;
        let skips = match &self.skip_list {
            _ if self.no_skips => ActiveSkips::default(),
            Some(path) => SkipList::load(path)?.resolve(),
            None => SkipList::known_bad()?.resolve(),
        };
        tracing::debug!(skips = skips.len(), "skip list resolved");

        let report = ZooRunner::new(&env, &options, &skips).run(&self.root)?;
        print_summary(&report);

        if let Some(path) = &self.output {
            save_report(&report, path)?;
            println!("\nReport saved to {}", path.display());
        }

        if report.has_failures() {
            anyhow::bail!(
                "{} failed, {} errors out of {} cases",
                report.failed,
                report.errors,
                report.cases.len()
            );
        }
        Ok(())
    }
}
