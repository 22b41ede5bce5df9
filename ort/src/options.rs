//! Session and per-run configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(any(test, feature = "onnxruntime"))]
use std::sync::{Mutex, atomic::AtomicU64};

use serde::{Deserialize, Serialize};

use crate::error::{OrtError, Result};

/// Default prefix for profiling output files.
pub const DEFAULT_PROFILE_PREFIX: &str = "onnxruntime_profile_";

/// Whether operators of one run execute one at a time or concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential = 0,
    Parallel = 1,
}

/// Graph optimization tiers, ordered from none to all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphOptimizationLevel {
    DisableAll = 0,
    #[default]
    EnableBasic = 1,
    EnableExtended = 2,
    EnableAll = 99,
}

impl TryFrom<i32> for GraphOptimizationLevel {
    type Error = OrtError;

    fn try_from(v: i32) -> Result<Self> {
        match v {
            0 => Ok(Self::DisableAll),
            1 => Ok(Self::EnableBasic),
            2 => Ok(Self::EnableExtended),
            99 => Ok(Self::EnableAll),
            other => Err(OrtError::InvalidOption(format!(
                "invalid graph optimization level: {other}"
            ))),
        }
    }
}

/// Log severity, most verbose first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Verbose = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
    Fatal = 4,
}

impl LogLevel {
    /// Reports whether an event at `level` passes this threshold.
    pub fn allows(&self, level: LogLevel) -> bool {
        level >= *self
    }
}

/// A backend that can execute some subset of graph operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionProvider {
    Cpu {
        #[serde(default = "default_true")]
        use_arena: bool,
    },
    Cuda {
        #[serde(default)]
        device_id: i32,
    },
    Tensorrt {
        #[serde(default)]
        device_id: i32,
    },
    /// Any provider the engine knows by name, with string options.
    Named {
        name: String,
        #[serde(default)]
        options: BTreeMap<String, String>,
    },
}

fn default_true() -> bool {
    true
}

impl ExecutionProvider {
    pub fn cpu() -> Self {
        Self::Cpu { use_arena: true }
    }

    /// Provider name as the engine registers it.
    pub fn name(&self) -> &str {
        match self {
            Self::Cpu { .. } => "CPUExecutionProvider",
            Self::Cuda { .. } => "CUDAExecutionProvider",
            Self::Tensorrt { .. } => "TensorrtExecutionProvider",
            Self::Named { name, .. } => name,
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build-time options for a session. Applied once when the session is
/// created; the session keeps its own snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    execution_mode: ExecutionMode,
    enable_memory_pattern: bool,
    enable_profiling: bool,
    profile_output_prefix: String,
    enable_cpu_mem_arena: bool,
    log_id: String,
    log_level: LogLevel,
    intra_op_num_threads: i32,
    inter_op_num_threads: i32,
    graph_optimization_level: GraphOptimizationLevel,
    optimized_model_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Sequential,
            enable_memory_pattern: true,
            enable_profiling: false,
            profile_output_prefix: DEFAULT_PROFILE_PREFIX.to_string(),
            enable_cpu_mem_arena: true,
            log_id: String::new(),
            log_level: LogLevel::Verbose,
            intra_op_num_threads: 0,
            inter_op_num_threads: 0,
            graph_optimization_level: GraphOptimizationLevel::EnableBasic,
            optimized_model_path: None,
            execution_providers: Vec::new(),
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    pub fn set_execution_mode(&mut self, mode: ExecutionMode) -> &mut Self {
        self.execution_mode = mode;
        self
    }

    pub fn enable_memory_pattern(&self) -> bool {
        self.enable_memory_pattern
    }

    pub fn set_enable_memory_pattern(&mut self, enabled: bool) -> &mut Self {
        self.enable_memory_pattern = enabled;
        self
    }

    pub fn enable_profiling(&self) -> bool {
        self.enable_profiling
    }

    pub fn set_enable_profiling(&mut self, enabled: bool) -> &mut Self {
        self.enable_profiling = enabled;
        self
    }

    pub fn profile_output_prefix(&self) -> &str {
        &self.profile_output_prefix
    }

    pub fn set_profile_output_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.profile_output_prefix = prefix.into();
        self
    }

    pub fn enable_cpu_mem_arena(&self) -> bool {
        self.enable_cpu_mem_arena
    }

    pub fn set_enable_cpu_mem_arena(&mut self, enabled: bool) -> &mut Self {
        self.enable_cpu_mem_arena = enabled;
        self
    }

    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    pub fn set_log_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.log_id = id.into();
        self
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn set_log_level(&mut self, level: LogLevel) -> &mut Self {
        self.log_level = level;
        self
    }

    /// Intra-op thread count; 0 lets the engine choose.
    pub fn intra_op_num_threads(&self) -> i32 {
        self.intra_op_num_threads
    }

    pub fn set_intra_op_num_threads(&mut self, n: i32) -> Result<&mut Self> {
        self.intra_op_num_threads = check_threads("intra_op_num_threads", n)?;
        Ok(self)
    }

    /// Inter-op thread count; 0 lets the engine choose.
    pub fn inter_op_num_threads(&self) -> i32 {
        self.inter_op_num_threads
    }

    pub fn set_inter_op_num_threads(&mut self, n: i32) -> Result<&mut Self> {
        self.inter_op_num_threads = check_threads("inter_op_num_threads", n)?;
        Ok(self)
    }

    pub fn graph_optimization_level(&self) -> GraphOptimizationLevel {
        self.graph_optimization_level
    }

    pub fn set_graph_optimization_level(&mut self, level: GraphOptimizationLevel) -> &mut Self {
        self.graph_optimization_level = level;
        self
    }

    /// Sets the level from its raw tier value (0, 1, 2 or 99). Anything
    /// else fails and leaves the current level in place.
    pub fn set_graph_optimization_level_raw(&mut self, level: i32) -> Result<&mut Self> {
        self.graph_optimization_level = GraphOptimizationLevel::try_from(level)?;
        Ok(self)
    }

    pub fn optimized_model_path(&self) -> Option<&Path> {
        self.optimized_model_path.as_deref()
    }

    pub fn set_optimized_model_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.optimized_model_path = Some(path.into());
        self
    }

    /// Registered providers, highest priority first.
    pub fn execution_providers(&self) -> &[ExecutionProvider] {
        &self.execution_providers
    }

    /// Appends a provider. Earlier providers win operator placement.
    pub fn append_execution_provider(&mut self, provider: ExecutionProvider) -> &mut Self {
        self.execution_providers.push(provider);
        self
    }

    pub fn append_execution_provider_cpu(&mut self, use_arena: bool) -> &mut Self {
        self.append_execution_provider(ExecutionProvider::Cpu { use_arena })
    }

    /// Checks values a deserialized config may carry out of range.
    pub fn validate(&self) -> Result<()> {
        check_threads("intra_op_num_threads", self.intra_op_num_threads)?;
        check_threads("inter_op_num_threads", self.inter_op_num_threads)?;
        Ok(())
    }
}

fn check_threads(field: &str, n: i32) -> Result<i32> {
    if n < 0 {
        return Err(OrtError::InvalidOption(format!("{field} must be >= 0, got {n}")));
    }
    Ok(n)
}

#[cfg(any(test, feature = "onnxruntime"))]
pub(crate) type TerminateListener = Box<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct TerminateFlag {
    set: AtomicBool,
    #[cfg(any(test, feature = "onnxruntime"))]
    next_id: AtomicU64,
    #[cfg(any(test, feature = "onnxruntime"))]
    listeners: Mutex<Vec<(u64, TerminateListener)>>,
}

/// Per-run options.
///
/// The terminate flag may be flipped from any thread while a run that
/// uses these options is in flight.
pub struct RunOptions {
    log_id: String,
    log_level: LogLevel,
    terminate: Arc<TerminateFlag>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            log_id: String::new(),
            log_level: LogLevel::Verbose,
            terminate: Arc::new(TerminateFlag::default()),
        }
    }
}

impl Clone for RunOptions {
    /// The clone gets its own terminate flag with the current value.
    fn clone(&self) -> Self {
        let out = Self {
            log_id: self.log_id.clone(),
            log_level: self.log_level,
            terminate: Arc::new(TerminateFlag::default()),
        };
        out.terminate.set.store(self.terminate(), Ordering::SeqCst);
        out
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("log_id", &self.log_id)
            .field("log_level", &self.log_level)
            .field("terminate", &self.terminate())
            .finish()
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    pub fn set_log_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.log_id = id.into();
        self
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn set_log_level(&mut self, level: LogLevel) -> &mut Self {
        self.log_level = level;
        self
    }

    pub fn terminate(&self) -> bool {
        self.terminate.set.load(Ordering::SeqCst)
    }

    /// Requests (or withdraws a request for) early termination of runs
    /// using these options.
    pub fn set_terminate(&self, terminate: bool) {
        self.terminate.set.store(terminate, Ordering::SeqCst);
        #[cfg(any(test, feature = "onnxruntime"))]
        {
            let listeners = self
                .terminate
                .listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            // Reloaded under the lock so the last listener call carries the
            // latest value even when setters race.
            let current = self.terminate();
            for (_, f) in listeners.iter() {
                f(current);
            }
        }
    }

    /// Registers a callback fired on every `set_terminate` until the guard
    /// is dropped. Engines use it to forward the flag to native handles.
    ///
    /// The callback is first invoked with the current value, under the same
    /// lock `set_terminate` takes, so no flip between reading the flag and
    /// registering is lost.
    #[cfg(any(test, feature = "onnxruntime"))]
    pub(crate) fn watch_terminate(&self, f: TerminateListener) -> TerminateWatch {
        let id = self.terminate.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self
            .terminate
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        f(self.terminate());
        listeners.push((id, f));
        TerminateWatch {
            flag: Arc::clone(&self.terminate),
            id,
        }
    }
}

/// Unregisters a terminate callback on drop.
#[cfg(any(test, feature = "onnxruntime"))]
pub(crate) struct TerminateWatch {
    flag: Arc<TerminateFlag>,
    id: u64,
}

#[cfg(any(test, feature = "onnxruntime"))]
impl Drop for TerminateWatch {
    fn drop(&mut self) {
        let mut listeners = self.flag.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|(id, _)| *id != self.id);
    }
}
