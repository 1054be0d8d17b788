use doorbell_core::{AuditLog, AuditRecord};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Serialize)]
struct Line<'a> {
    timestamp: String,
    #[serde(flatten)]
    record: &'a AuditRecord,
}

/// Append-only JSON Lines event log. One object per line, prefixed with a
/// local RFC 3339 timestamp. Write failures are logged and dropped.
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(dir = %parent.display(), error = %e, "cannot create log directory");
            }
        }
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl AuditLog for JsonlAuditLog {
    fn append(&self, record: &AuditRecord) {
        let line = Line {
            timestamp: chrono::Local::now().to_rfc3339(),
            record,
        };
        let json = match serde_json::to_string(&line) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "cannot serialize audit record");
                return;
            }
        };
        if let Err(e) = self.write_line(&json) {
            tracing::warn!(path = %self.path.display(), error = %e, "audit append failed");
        }
    }
}
