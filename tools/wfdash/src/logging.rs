use crate::errors::DashError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;

static RUN_LOG: OnceLock<Mutex<JsonlLogger>> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub ts_ms: u128,
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), DashError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&LogEvent {
            ts_ms: event.ts_ms,
            level: event.level,
            event_type: event.event_type,
            payload: truncate_json(event.payload.clone(), self.max_payload_bytes),
        })
        .map_err(|e| DashError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        if let Some(parent) = self.path.parent() {
            let _ = enforce_total_budget(parent, self.budget_bytes, Some(&self.path))?;
        }

        Ok(())
    }
}

/// Installs the process-wide run log. Later calls keep the first logger.
pub fn init_run_log(logger: JsonlLogger) -> bool {
    RUN_LOG.set(Mutex::new(logger)).is_ok()
}

/// Appends to the run log if one is installed. Logging failures are dropped:
/// the dashboard owns the screen, so there is nowhere else to report them.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let Some(logger) = RUN_LOG.get() else {
        return;
    };
    let Ok(logger) = logger.lock() else {
        return;
    };
    let _ = logger.append(&LogEvent {
        ts_ms: now_ms(),
        level,
        event_type,
        payload,
    });
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{JsonlLogger, LogEvent};
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;
        logger.budget_bytes = 1024;

        logger
            .append(&LogEvent {
                ts_ms: 1,
                level: "warn",
                event_type: "store.apply.rejected",
                payload: json!({"reason": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"store.apply.rejected\""));
        assert!(text.contains("..."));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let value = super::truncate_json(json!("ééééééééééééééé"), 10);
        assert!(value.as_str().is_some_and(|s| s.ends_with("...")));
    }
}
