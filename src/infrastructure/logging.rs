use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const LOG_FILE: &str = "tallybar.log";

/// JSON-lines logger shared by the application and infrastructure layers.
/// Logging is best-effort: a failed append never surfaces to the caller.
#[derive(Debug)]
pub struct Logger {
    logs_dir: PathBuf,
    guard: Mutex<()>,
}

impl Logger {
    pub fn new(logs_dir: impl AsRef<Path>) -> Self {
        let logs_dir = logs_dir.as_ref().to_path_buf();
        let _ = std::fs::create_dir_all(&logs_dir);
        Self {
            logs_dir,
            guard: Mutex::new(()),
        }
    }

    pub fn info(&self, scope: &str, message: &str) {
        self.append("info", scope, message);
    }

    pub fn warn(&self, scope: &str, message: &str) {
        self.append("warn", scope, message);
    }

    pub fn error(&self, scope: &str, message: &str) {
        self.append("error", scope, message);
    }

    fn append(&self, level: &str, scope: &str, message: &str) {
        let Ok(_guard) = self.guard.lock() else {
            return;
        };
        let path = self.logs_dir.join(LOG_FILE);
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "scope": scope,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}
