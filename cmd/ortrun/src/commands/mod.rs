//! CLI commands module.

mod inspect;
mod run;
mod zoo;

pub use inspect::InspectCommand;
pub use run::RunCommand;
pub use zoo::ZooCommand;

use std::path::Path;

use giztoy_ort::{Env, SessionOptions, Tensor, TensorData, Value};

use crate::Cli;
use crate::config::load_session_options;

const ENV_NAME: &str = "ortrun";

/// Number of elements shown per tensor when printing values.
const PREVIEW_LEN: usize = 8;

/// Creates the environment selected by the global flags.
pub(crate) fn create_env(cli: &Cli) -> anyhow::Result<Env> {
    if cli.reference {
        return Ok(Env::reference(ENV_NAME));
    }
    Ok(Env::new(ENV_NAME)?)
}

/// Session options from `--options`, or defaults.
pub(crate) fn session_options(cli: &Cli) -> anyhow::Result<SessionOptions> {
    match cli.options.as_deref() {
        Some(path) => load_session_options(Path::new(path)),
        None => Ok(SessionOptions::new()),
    }
}

/// One-line summary of a value: type, shape and leading elements.
pub(crate) fn describe_value(value: &Value) -> String {
    match value {
        Value::Tensor(t) => format!(
            "{} {:?} {}",
            value.type_name(),
            t.shape(),
            preview(t)
        ),
        Value::Sequence(items) => {
            let inner: Vec<String> = items.iter().map(describe_value).collect();
            format!("sequence[{}] [{}]", items.len(), inner.join(", "))
        }
        Value::Map(m) => format!(
            "map({}, {})[{}] keys={} values={}",
            m.key_type(),
            m.value_type(),
            m.len(),
            preview(m.keys()),
            preview(m.values())
        ),
    }
}

fn preview(tensor: &Tensor) -> String {
    fn head<T: std::fmt::Debug>(v: &[T]) -> String {
        let shown: Vec<String> = v.iter().take(PREVIEW_LEN).map(|x| format!("{x:?}")).collect();
        let more = if v.len() > PREVIEW_LEN { ", ..." } else { "" };
        format!("[{}{more}]", shown.join(", "))
    }
    match tensor.data() {
        TensorData::Float(v) => head(v),
        TensorData::Double(v) => head(v),
        TensorData::Int8(v) => head(v),
        TensorData::Int16(v) => head(v),
        TensorData::Int32(v) => head(v),
        TensorData::Int64(v) => head(v),
        TensorData::Uint8(v) => head(v),
        TensorData::Uint16(v) => head(v),
        TensorData::Uint32(v) => head(v),
        TensorData::Uint64(v) => head(v),
        TensorData::Bool(v) => head(v),
        TensorData::String(v) => head(v),
    }
}
