//! Inference sessions over ONNX Runtime.
//!
//! An [`Env`] owns an engine; a [`Session`] is one loaded model. Sessions
//! expose input, output and overridable-initializer metadata, validate
//! named feeds against it and run inference from any number of threads.
//!
//! Two engines sit behind the [`Engine`] trait:
//!
//! - the ONNX Runtime C API (feature `onnxruntime`), reached through a
//!   small C shim and dynamically linked `libonnxruntime`;
//! - a pass-through [`reference`] engine for JSON graph documents, used
//!   by tests and tooling without a native library.
//!
//! # Usage
//!
//! ```no_run
//! use giztoy_ort::{Env, NamedValue, SessionOptions, Tensor};
//!
//! let env = Env::new("myapp").unwrap();
//! let session = env
//!     .session_from_file("squeezenet.onnx", &SessionOptions::new())
//!     .unwrap();
//!
//! let input = Tensor::new(&[1, 3, 224, 224], vec![0.0f32; 3 * 224 * 224]).unwrap();
//! let outputs = session.run(&[NamedValue::from_tensor("data_0", input)]).unwrap();
//! let scores = outputs[0].as_tensor().unwrap().float_data().unwrap();
//! ```
//!
//! # Dynamic Linking
//!
//! With `onnxruntime` enabled the build script compiles `csrc/ort_shim.c`
//! and links `onnxruntime`. Point `ORT_INCLUDE_DIR` and `ORT_LIB_DIR` at
//! an ONNX Runtime release when it is not installed system-wide.

pub mod compare;
mod element;
mod engine;
mod error;
mod metadata;
mod options;
mod profile;
pub mod record;
pub mod reference;
mod session;
mod tensor;
mod value;

#[cfg(feature = "onnxruntime")]
mod ffi;
#[cfg(feature = "onnxruntime")]
mod native;

pub use element::{Element, ElementType};
pub use engine::{Engine, EngineModel, GraphMetadata, ModelSource};
pub use error::{ErrorCode, OrtError, Result};
pub use metadata::{MetadataMap, NodeMetadata, DYNAMIC_DIM};
pub use options::{
    ExecutionMode, ExecutionProvider, GraphOptimizationLevel, LogLevel, RunOptions,
    SessionOptions, DEFAULT_PROFILE_PREFIX,
};
pub use profile::{ProfileEvent, Profiler};
pub use session::{Env, RunOutputs, Session};
pub use tensor::{element_count, Tensor, TensorData};
pub use value::{MapValue, NamedValue, Value, ValueKind};

#[cfg(feature = "onnxruntime")]
pub use native::NativeEngine;
