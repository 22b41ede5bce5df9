//! Session options and skip-list loading.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use giztoy_ort::SessionOptions;
use serde::Deserialize;

/// Loads session options from a YAML or JSON file (by extension).
pub fn load_session_options(path: &Path) -> Result<SessionOptions> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read options file: {}", path.display()))?;
    let options: SessionOptions = if is_json(path) {
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse options JSON: {}", path.display()))?
    } else {
        serde_yaml::from_str(&data)
            .with_context(|| format!("failed to parse options YAML: {}", path.display()))?
    };
    options.validate()?;
    Ok(options)
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

/// Models skipped only when an environment variable has a given value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvCondition {
    pub var: String,
    pub value: String,
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

/// Known-bad models, keyed by model directory name, with the reason.
///
/// ```yaml
/// models:
///   mxnet_arcface: Model not supported by CPU execution provider
/// when_env:
///   - var: DisableContribOps
///     value: "ON"
///     models:
///       test_tiny_yolov2: Works when contrib ops are enabled
/// when_32bit:
///   test_vgg19: Unattainable memory on 32-bit builds
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkipList {
    #[serde(default)]
    pub models: BTreeMap<String, String>,
    #[serde(default)]
    pub when_env: Vec<EnvCondition>,
    #[serde(default)]
    pub when_32bit: BTreeMap<String, String>,
}

/// Known-bad model-zoo models shipped with the CLI.
const KNOWN_BAD: &str = include_str!("../skip-list.yaml");

impl SkipList {
    /// The bundled list of known-bad model-zoo models.
    pub fn known_bad() -> Result<Self> {
        serde_yaml::from_str(KNOWN_BAD).context("failed to parse bundled skip list")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read skip list: {}", path.display()))?;
        serde_yaml::from_str(&data)
            .with_context(|| format!("failed to parse skip list: {}", path.display()))
    }

    /// Resolves the conditional sections against the current process.
    pub fn resolve(&self) -> ActiveSkips {
        self.resolve_with(
            |var| std::env::var(var).ok(),
            cfg!(target_pointer_width = "32"),
        )
    }

    /// Resolves with an explicit environment lookup and pointer width.
    pub fn resolve_with(&self, env: impl Fn(&str) -> Option<String>, is_32bit: bool) -> ActiveSkips {
        let mut reasons = self.models.clone();
        for cond in &self.when_env {
            if env(&cond.var).as_deref() == Some(cond.value.as_str()) {
                for (name, reason) in &cond.models {
                    reasons.entry(name.clone()).or_insert_with(|| reason.clone());
                }
            }
        }
        if is_32bit {
            for (name, reason) in &self.when_32bit {
                reasons.entry(name.clone()).or_insert_with(|| reason.clone());
            }
        }
        ActiveSkips { reasons }
    }
}

/// The skips that apply to this run.
#[derive(Debug, Clone, Default)]
pub struct ActiveSkips {
    reasons: BTreeMap<String, String>,
}

impl ActiveSkips {
    pub fn reason(&self, model: &str) -> Option<&str> {
        self.reasons.get(model).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKIPS: &str = r#"
models:
  mxnet_arcface: Model not supported by CPU execution provider
  tf_inception_v2: Known output mismatch
when_env:
  - var: DisableContribOps
    value: "ON"
    models:
      test_tiny_yolov2: Works when contrib ops are enabled
when_32bit:
  test_vgg19: Unattainable memory on 32-bit builds
"#;

    fn skips() -> SkipList {
        serde_yaml::from_str(SKIPS).unwrap()
    }

    #[test]
    fn unconditional_entries() {
        let active = skips().resolve_with(|_| None, false);
        assert_eq!(active.len(), 2);
        assert!(active.reason("mxnet_arcface").unwrap().contains("CPU"));
        assert!(active.reason("test_tiny_yolov2").is_none());
        assert!(active.reason("test_vgg19").is_none());
    }

    #[test]
    fn env_condition() {
        let on = skips().resolve_with(
            |var| (var == "DisableContribOps").then(|| "ON".to_string()),
            false,
        );
        assert!(on.reason("test_tiny_yolov2").is_some());

        let off = skips().resolve_with(|_| Some("OFF".to_string()), false);
        assert!(off.reason("test_tiny_yolov2").is_none());
    }

    #[test]
    fn pointer_width_condition() {
        let active = skips().resolve_with(|_| None, true);
        assert!(active.reason("test_vgg19").is_some());
    }

    #[test]
    fn bundled_known_bad_list() {
        let list = SkipList::known_bad().unwrap();
        assert_eq!(list.models.len(), 10);
        assert!(list.models["fp16_shufflenet"].contains("16-bit"));

        let plain = list.resolve_with(|_| None, false);
        assert!(plain.reason("BERT_Squad").unwrap().contains("OneHot"));
        assert!(plain.reason("mask_rcnn_keras").is_none());
        assert!(plain.reason("tf_nasnet_large").is_none());

        let all = list.resolve_with(|_| Some("ON".to_string()), true);
        assert_eq!(all.len(), 15);
        assert!(all.reason("mask_rcnn_keras").is_some());
        assert!(all.reason("test_vgg19").unwrap().contains("conv4_4_b_0"));
    }

    #[test]
    fn session_options_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("options.yaml");
        std::fs::write(&yaml, "enable_profiling: true\nlog_id: zoo\n").unwrap();
        let opts = load_session_options(&yaml).unwrap();
        assert!(opts.enable_profiling());
        assert_eq!(opts.log_id(), "zoo");

        let json = dir.path().join("options.json");
        std::fs::write(&json, r#"{"graph_optimization_level": "disable_all"}"#).unwrap();
        let opts = load_session_options(&json).unwrap();
        assert_eq!(
            opts.graph_optimization_level(),
            giztoy_ort::GraphOptimizationLevel::DisableAll
        );

        std::fs::write(&json, r#"{"inter_op_num_threads": -1}"#).unwrap();
        assert!(load_session_options(&json).is_err());
    }
}
