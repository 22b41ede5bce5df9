//! The seam between the session facade and whatever runtime executes graphs.
//!
//! The facade owns validation and lifetime; an [`Engine`] only parses a
//! model, reports its metadata and runs already-validated feeds.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::metadata::MetadataMap;
use crate::options::{RunOptions, SessionOptions};
use crate::value::{NamedValue, Value};

/// Where a model comes from.
#[derive(Debug, Clone, Copy)]
pub enum ModelSource<'a> {
    Path(&'a Path),
    Memory(&'a [u8]),
}

/// Metadata namespaces of a loaded graph.
#[derive(Debug, Clone, Default)]
pub struct GraphMetadata {
    pub inputs: MetadataMap,
    pub outputs: MetadataMap,
    pub overridable_initializers: MetadataMap,
}

/// A runtime that turns model bytes into runnable [`EngineModel`]s.
///
/// Implementations must be safe for concurrent use.
pub trait Engine: Send + Sync {
    /// Short engine name for logs, e.g. `reference` or `onnxruntime`.
    fn name(&self) -> &str;

    /// Parses and prepares a model under the given options snapshot.
    fn load(&self, source: ModelSource<'_>, options: &SessionOptions) -> Result<Box<dyn EngineModel>>;
}

/// One loaded model inside an engine.
///
/// `run` is called concurrently from many threads; the model must not be
/// mutated by it.
pub trait EngineModel: Send + Sync {
    fn metadata(&self) -> &GraphMetadata;

    /// Runs with feeds whose names, kinds, types and shapes the facade has
    /// already checked. Returns one value per entry of `output_names`, in
    /// the same order.
    fn run(
        &self,
        inputs: &[NamedValue],
        output_names: &[&str],
        run_options: &RunOptions,
    ) -> Result<Vec<Value>>;

    /// Stops profiling and returns the written trace file, if profiling
    /// was enabled.
    fn end_profiling(&self) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}
