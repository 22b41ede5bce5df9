//! Environment and session facade.
//!
//! Feeds are checked against the session metadata here, before an engine
//! ever sees them.

use std::collections::HashSet;
use std::ops::Index;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::engine::{Engine, EngineModel, ModelSource};
use crate::error::{ErrorCode, OrtError, Result};
use crate::metadata::MetadataMap;
use crate::options::{LogLevel, RunOptions, SessionOptions};
use crate::reference::ReferenceEngine;
use crate::value::{NamedValue, Value};

// ---------------------------------------------------------------------------
// Env
// ---------------------------------------------------------------------------

/// Owns the engine that sessions are loaded into. Create one per process.
#[derive(Clone)]
pub struct Env {
    name: String,
    engine: Arc<dyn Engine>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("name", &self.name)
            .field("engine", &self.engine.name())
            .finish()
    }
}

impl Env {
    /// Creates an environment on the default engine: ONNX Runtime when the
    /// `onnxruntime` feature is enabled, the reference engine otherwise.
    pub fn new(name: &str) -> Result<Self> {
        #[cfg(feature = "onnxruntime")]
        {
            Self::native(name)
        }
        #[cfg(not(feature = "onnxruntime"))]
        {
            Ok(Self::reference(name))
        }
    }

    /// Creates an environment on the reference engine.
    pub fn reference(name: &str) -> Self {
        Self::with_engine(name, Arc::new(ReferenceEngine::new()))
    }

    /// Creates an environment on the ONNX Runtime engine.
    #[cfg(feature = "onnxruntime")]
    pub fn native(name: &str) -> Result<Self> {
        let engine = crate::native::NativeEngine::new(name)?;
        Ok(Self::with_engine(name, Arc::new(engine)))
    }

    pub fn with_engine(name: &str, engine: Arc<dyn Engine>) -> Self {
        Self {
            name: name.to_string(),
            engine,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Creates a session from in-memory model data with default options.
    pub fn new_session(&self, model_data: &[u8]) -> Result<Session> {
        self.session_from_memory(model_data, &SessionOptions::default())
    }

    /// Creates a session from in-memory model data.
    pub fn session_from_memory(&self, model_data: &[u8], options: &SessionOptions) -> Result<Session> {
        if model_data.is_empty() {
            return Err(OrtError::EmptyData);
        }
        self.load(ModelSource::Memory(model_data), options, "<memory>")
    }

    /// Creates a session from a model file.
    pub fn session_from_file(&self, path: impl AsRef<Path>, options: &SessionOptions) -> Result<Session> {
        let path = path.as_ref();
        self.load(ModelSource::Path(path), options, &path.display().to_string())
    }

    fn load(&self, source: ModelSource<'_>, options: &SessionOptions, origin: &str) -> Result<Session> {
        options.validate()?;
        let start = Instant::now();
        let model = self.engine.load(source, options)?;
        let meta = model.metadata();
        if options.log_level().allows(LogLevel::Verbose) {
            debug!(
                env = %self.name,
                engine = self.engine.name(),
                log_id = options.log_id(),
                model = origin,
                inputs = meta.inputs.len(),
                outputs = meta.outputs.len(),
                overridable_initializers = meta.overridable_initializers.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "session created"
            );
        }
        Ok(Session {
            model,
            options: options.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A loaded model plus the options snapshot it was built with.
///
/// `run` takes `&self`; share a session across threads with `Arc`.
pub struct Session {
    model: Box<dyn EngineModel>,
    options: SessionOptions,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("inputs", &self.input_metadata().keys().collect::<Vec<_>>())
            .field("outputs", &self.output_metadata().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn input_metadata(&self) -> &MetadataMap {
        &self.model.metadata().inputs
    }

    pub fn output_metadata(&self) -> &MetadataMap {
        &self.model.metadata().outputs
    }

    pub fn overridable_initializer_metadata(&self) -> &MetadataMap {
        &self.model.metadata().overridable_initializers
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Runs with default run options, returning every declared output.
    pub fn run(&self, inputs: &[NamedValue]) -> Result<RunOutputs> {
        self.run_with(inputs, None, None)
    }

    /// Runs, returning the requested outputs in request order (all
    /// declared outputs when `output_names` is `None`).
    pub fn run_with(
        &self,
        inputs: &[NamedValue],
        output_names: Option<&[&str]>,
        run_options: Option<&RunOptions>,
    ) -> Result<RunOutputs> {
        let names: Vec<&str> = match output_names {
            Some(names) => names.to_vec(),
            None => self.output_metadata().keys().collect(),
        };
        self.validate(inputs, &names)?;

        let default_options;
        let run_options = match run_options {
            Some(o) => o,
            None => {
                default_options = RunOptions::new();
                &default_options
            }
        };

        let start = Instant::now();
        let values = match self.model.run(inputs, &names, run_options) {
            Ok(v) => v,
            Err(OrtError::Terminated) => {
                if run_options.log_level().allows(LogLevel::Warning) {
                    warn!(log_id = run_options.log_id(), "run terminated");
                }
                return Err(OrtError::Terminated);
            }
            Err(e) => return Err(e),
        };
        if values.len() != names.len() {
            return Err(OrtError::engine(
                ErrorCode::Fail,
                format!("engine returned {} outputs for {} requested", values.len(), names.len()),
            ));
        }
        if run_options.log_level().allows(LogLevel::Verbose) {
            debug!(
                log_id = run_options.log_id(),
                session_log_id = self.options.log_id(),
                inputs = inputs.len(),
                outputs = names.len(),
                elapsed_us = start.elapsed().as_micros() as u64,
                "run complete"
            );
        }

        Ok(RunOutputs {
            values: names
                .into_iter()
                .zip(values)
                .map(|(n, v)| NamedValue::new(n, v))
                .collect(),
        })
    }

    /// Stops profiling and returns the trace file, or `None` when profiling
    /// is off or already ended.
    pub fn end_profiling(&self) -> Result<Option<PathBuf>> {
        self.model.end_profiling()
    }

    fn validate(&self, inputs: &[NamedValue], output_names: &[&str]) -> Result<()> {
        let declared = self.input_metadata();
        let overridable = self.overridable_initializer_metadata();

        let mut seen = HashSet::with_capacity(inputs.len());
        for input in inputs {
            let name = input.name();
            let meta = declared
                .get(name)
                .or_else(|| overridable.get(name))
                .ok_or_else(|| OrtError::InvalidInputName(name.to_string()))?;
            if !seen.insert(name) {
                return Err(OrtError::InvalidInputName(name.to_string()));
            }
            meta.check_value(name, input.value())?;
        }
        if let Some(missing) = declared.keys().find(|n| !seen.contains(n)) {
            return Err(OrtError::MissingInput(missing.to_string()));
        }

        let outputs = self.output_metadata();
        if let Some(bad) = output_names.iter().find(|n| !outputs.contains_key(n)) {
            return Err(OrtError::InvalidOutputName(bad.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RunOutputs
// ---------------------------------------------------------------------------

/// Named outputs of one run, in request order. Owns its values.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutputs {
    values: Vec<NamedValue>,
}

impl RunOutputs {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|v| v.name() == name).map(|v| v.value())
    }

    pub fn first(&self) -> Option<&NamedValue> {
        self.values.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NamedValue> {
        self.values.iter()
    }

    pub fn into_vec(self) -> Vec<NamedValue> {
        self.values
    }
}

impl Index<usize> for RunOutputs {
    type Output = NamedValue;

    fn index(&self, i: usize) -> &NamedValue {
        &self.values[i]
    }
}

impl IntoIterator for RunOutputs {
    type Item = NamedValue;
    type IntoIter = std::vec::IntoIter<NamedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a RunOutputs {
    type Item = &'a NamedValue;
    type IntoIter = std::slice::Iter<'a, NamedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
