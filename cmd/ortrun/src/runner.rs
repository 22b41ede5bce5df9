//! Model-zoo runner implementation.
//!
//! A zoo directory holds `<opset>/<model>/` entries, each with a single
//! `*.onnx` file and one or more `test_data*` (or `seq_lens*`) directories
//! of `input_<n>.pb` / `output_<n>.pb` tensor records. AppleDouble `._*`
//! files are ignored.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use giztoy_ort::compare::{compare_values, Tolerance};
use giztoy_ort::record::TensorRecord;
use giztoy_ort::{Env, Session, SessionOptions, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ActiveSkips;

/// Outcome of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

/// Result of running one `test_data*` directory (or of a skipped model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub opset: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub test_data: String,
    pub status: CaseStatus,
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Full zoo report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZooReport {
    pub timestamp: String,
    pub root: String,
    pub engine: String,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub cases: Vec<CaseResult>,
}

impl ZooReport {
    fn push(&mut self, case: CaseResult) {
        match case.status {
            CaseStatus::Pass => self.passed += 1,
            CaseStatus::Fail => self.failed += 1,
            CaseStatus::Skip => self.skipped += 1,
            CaseStatus::Error => self.errors += 1,
        }
        self.cases.push(case);
    }

    /// Whether any case failed or errored.
    pub fn has_failures(&self) -> bool {
        self.failed + self.errors > 0
    }
}

pub struct ZooRunner<'a> {
    env: &'a Env,
    options: &'a SessionOptions,
    skips: &'a ActiveSkips,
    tolerance: Tolerance,
}

impl<'a> ZooRunner<'a> {
    pub fn new(env: &'a Env, options: &'a SessionOptions, skips: &'a ActiveSkips) -> Self {
        Self {
            env,
            options,
            skips,
            tolerance: Tolerance::default(),
        }
    }

    /// Runs every model under `root`.
    pub fn run(&self, root: &Path) -> Result<ZooReport> {
        let mut report = ZooReport {
            timestamp: Utc::now().to_rfc3339(),
            root: root.display().to_string(),
            engine: self.env.engine_name().to_string(),
            ..Default::default()
        };

        for opset_dir in subdirs(root)? {
            let opset = dir_name(&opset_dir);
            for model_dir in subdirs(&opset_dir)? {
                let model = dir_name(&model_dir);
                if let Some(reason) = self.skips.reason(&model) {
                    debug!(model = %model, reason, "skipped");
                    report.push(CaseResult {
                        opset: opset.clone(),
                        model,
                        test_data: String::new(),
                        status: CaseStatus::Skip,
                        duration_ms: 0,
                        detail: Some(reason.to_string()),
                    });
                    continue;
                }
                for case in self.run_model(&opset, &model, &model_dir) {
                    report.push(case);
                }
            }
        }

        info!(
            passed = report.passed,
            failed = report.failed,
            skipped = report.skipped,
            errors = report.errors,
            "zoo run complete"
        );
        Ok(report)
    }

    fn run_model(&self, opset: &str, model: &str, dir: &Path) -> Vec<CaseResult> {
        let case = |test_data: String, status, duration_ms, detail| CaseResult {
            opset: opset.to_string(),
            model: model.to_string(),
            test_data,
            status,
            duration_ms,
            detail,
        };

        let start = Instant::now();
        let session = match find_model(dir).and_then(|path| {
            self.env
                .session_from_file(&path, self.options)
                .with_context(|| format!("failed to load {}", path.display()))
        }) {
            Ok(s) => s,
            Err(e) => {
                let ms = start.elapsed().as_millis() as i64;
                return vec![case(String::new(), CaseStatus::Error, ms, Some(format!("{e:#}")))];
            }
        };

        let test_dirs = match subdirs(dir) {
            Ok(dirs) => dirs,
            Err(e) => return vec![case(String::new(), CaseStatus::Error, 0, Some(format!("{e:#}")))],
        };

        test_dirs
            .into_iter()
            .filter(|d| is_test_data_dir(&dir_name(d)))
            .map(|test_dir| {
                let start = Instant::now();
                let outcome = self.run_case(&session, &test_dir);
                let ms = start.elapsed().as_millis() as i64;
                let (status, detail) = match outcome {
                    Ok(None) => (CaseStatus::Pass, None),
                    Ok(Some(mismatch)) => (CaseStatus::Fail, Some(mismatch)),
                    Err(e) => (CaseStatus::Error, Some(format!("{e:#}"))),
                };
                case(dir_name(&test_dir), status, ms, detail)
            })
            .collect()
    }

    /// Runs one test directory. `Ok(Some(..))` describes the first mismatch.
    fn run_case(&self, session: &Session, dir: &Path) -> Result<Option<String>> {
        let input_paths = indexed_files(dir, "input_")?;
        let declared: Vec<&str> = session.input_metadata().keys().collect();
        let mut feeds = Vec::with_capacity(input_paths.len());
        for (i, path) in input_paths.iter().enumerate() {
            let record = TensorRecord::read_file(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let fallback = declared.get(i).copied().unwrap_or_default();
            feeds.push(record.to_named_value(fallback)?);
        }

        let mut expected = Vec::new();
        for path in indexed_files(dir, "output_")? {
            let record = TensorRecord::read_file(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            expected.push(record);
        }

        let outputs = session.run(&feeds)?;
        for (i, record) in expected.iter().enumerate() {
            let (name, actual) = if session.output_metadata().contains_key(&record.name) {
                (record.name.as_str(), outputs.get(&record.name))
            } else {
                match outputs.iter().nth(i) {
                    Some(out) => (out.name(), Some(out.value())),
                    None => (record.name.as_str(), None),
                }
            };
            let Some(actual) = actual else {
                return Ok(Some(format!("output {i} ({name}) missing")));
            };
            let want = Value::Tensor(record.to_tensor()?);
            if let Err(mismatch) = compare_values(&want, actual, self.tolerance) {
                return Ok(Some(format!("output {name}: {mismatch}")));
            }
        }
        Ok(None)
    }
}

/// Sorted subdirectories of `dir`.
fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_test_data_dir(name: &str) -> bool {
    name.starts_with("test_data") || name.starts_with("seq_lens")
}

/// The single `*.onnx` file in a model directory.
fn find_model(dir: &Path) -> Result<PathBuf> {
    let mut models = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if dir_name(&path).starts_with("._") {
            continue;
        }
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("onnx") {
            models.push(path);
        }
    }
    match models.len() {
        1 => Ok(models.remove(0)),
        0 => anyhow::bail!("no .onnx model in {}", dir.display()),
        n => anyhow::bail!("{n} .onnx models in {}, expected one", dir.display()),
    }
}

/// `<prefix><n>.pb` files in `dir`, ordered by `n`.
fn indexed_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let index = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(".pb"))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(index) = index {
            files.push((index, path));
        }
    }
    files.sort_by_key(|(index, _)| *index);
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Prints the per-case table and totals.
pub fn print_summary(report: &ZooReport) {
    println!("\n{}", "=".repeat(90));
    println!("ZOO SUMMARY ({})", report.engine);
    println!("{}", "=".repeat(90));
    println!("{:<12} {:<30} {:<14} {:>8} {:>10}", "Opset", "Model", "Test", "Status", "Time(ms)");
    println!("{}", "-".repeat(90));
    for c in &report.cases {
        let status = match c.status {
            CaseStatus::Pass => "pass",
            CaseStatus::Fail => "FAIL",
            CaseStatus::Skip => "skip",
            CaseStatus::Error => "ERROR",
        };
        println!(
            "{:<12} {:<30} {:<14} {:>8} {:>10}",
            c.opset, c.model, c.test_data, status, c.duration_ms
        );
        if let Some(detail) = &c.detail {
            if c.status != CaseStatus::Pass {
                println!("    {detail}");
            }
        }
    }
    println!("{}", "-".repeat(90));
    println!(
        "passed: {}  failed: {}  errors: {}  skipped: {}",
        report.passed, report.failed, report.errors, report.skipped
    );
}

/// Saves the report as pretty JSON.
pub fn save_report(report: &ZooReport, path: &Path) -> Result<()> {
    let data = serde_json::to_string_pretty(report)?;
    std::fs::write(path, data)?;
    Ok(())
}
