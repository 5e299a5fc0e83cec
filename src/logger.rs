use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::diff::diff_json;

/// How snapshots are written to the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    /// Every snapshot in full.
    Full,
    /// First snapshot in full, then only the changed leaves.
    Diffed,
}

/// NDJSON trace of API traffic and cycle results. Credentials are never
/// written: login requests bypass the logger.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_state: Option<Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_state: None,
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, body: Option<&Value>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_write(&mut self, device_id: &str, parameter_id: &str, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "write",
            "device": device_id,
            "parameter": parameter_id,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_failure(&mut self, cycle: &str, error: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cycle",
            "cycle": cycle,
            "error": error,
        });
        self.write_line(&entry);
    }

    pub fn log_snapshot(&mut self, cycle: &str, body: &Value) {
        let entry = match (self.mode, self.previous_state.as_ref()) {
            (MessageLogMode::Diffed, Some(prev)) => {
                let mut changes = Vec::new();
                diff_json(prev, body, "", &mut changes);
                let changes: Vec<Value> = changes
                    .into_iter()
                    .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                    .collect();
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "cycle",
                    "cycle": cycle,
                    "changes": changes,
                })
            }
            (MessageLogMode::Diffed, None) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "cycle",
                "cycle": cycle,
                "full": true,
                "body": body,
            }),
            (MessageLogMode::Full, _) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "cycle",
                "cycle": cycle,
                "body": body,
            }),
        };
        self.write_line(&entry);
        if self.mode == MessageLogMode::Diffed {
            self.previous_state = Some(body.clone());
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
