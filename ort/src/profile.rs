//! Per-session run profiling written as a chrome-trace style JSON array.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::Result;

/// One complete ("X" phase) trace event.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileEvent {
    pub cat: &'static str,
    pub pid: u32,
    pub tid: u64,
    /// Microseconds.
    pub dur: u64,
    /// Microseconds since profiling started.
    pub ts: u64,
    pub ph: &'static str,
    pub name: String,
    pub args: serde_json::Map<String, serde_json::Value>,
}

struct ProfileState {
    started: Instant,
    started_at: DateTime<Local>,
    events: Vec<ProfileEvent>,
}

/// Collects events until [`Profiler::finish`] writes them out.
///
/// A disabled profiler records nothing; a finished one stops recording.
pub struct Profiler {
    prefix: String,
    state: Mutex<Option<ProfileState>>,
}

impl Profiler {
    pub fn new(enabled: bool, prefix: &str) -> Self {
        let state = enabled.then(|| ProfileState {
            started: Instant::now(),
            started_at: Local::now(),
            events: Vec::new(),
        });
        Self {
            prefix: prefix.to_string(),
            state: Mutex::new(state),
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Records a session-level event that began at `start` and lasted `dur`.
    pub fn record(&self, name: &str, start: Instant, dur: Duration, args: serde_json::Map<String, serde_json::Value>) {
        let mut guard = self.lock();
        let Some(state) = guard.as_mut() else {
            return;
        };
        let ts = start.saturating_duration_since(state.started);
        state.events.push(ProfileEvent {
            cat: "Session",
            pid: std::process::id(),
            tid: thread_id(),
            dur: dur.as_micros() as u64,
            ts: ts.as_micros() as u64,
            ph: "X",
            name: name.to_string(),
            args,
        });
    }

    /// Writes `<prefix><timestamp>.json` and stops profiling. Returns
    /// `None` if profiling was never enabled or already finished.
    pub fn finish(&self) -> Result<Option<PathBuf>> {
        let Some(state) = self.lock().take() else {
            return Ok(None);
        };
        let path = PathBuf::from(format!(
            "{}{}.json",
            self.prefix,
            state.started_at.format("%Y-%m-%d_%H-%M-%S")
        ));
        write_trace(&path, &state.events)?;
        tracing::debug!(path = %path.display(), events = state.events.len(), "profile written");
        Ok(Some(path))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ProfileState>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn write_trace(path: &Path, events: &[ProfileEvent]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let data = serde_json::to_vec_pretty(events).map_err(std::io::Error::other)?;
    std::fs::write(path, data)?;
    Ok(())
}

fn thread_id() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut h);
    h.finish() & 0xffff_ffff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_profiler_writes_nothing() {
        let p = Profiler::new(false, "unused_");
        assert!(!p.is_active());
        p.record("run", Instant::now(), Duration::from_millis(1), Default::default());
        assert!(p.finish().unwrap().is_none());
    }

    #[test]
    fn finish_writes_events_once() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = format!("{}/Ort_P_", dir.path().display());
        let p = Profiler::new(true, &prefix);
        let start = Instant::now();
        p.record("model_run", start, Duration::from_micros(250), Default::default());

        let path = p.finish().unwrap().unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("Ort_P_"));
        assert!(name.ends_with(".json"));

        let events: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(events[0]["name"], "model_run");
        assert_eq!(events[0]["dur"], 250);
        assert_eq!(events[0]["ph"], "X");

        assert!(p.finish().unwrap().is_none());
        assert!(!p.is_active());
    }
}
