use jiff::Timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One structured event in an operation's history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    /// Advertise IP of the server the entry concerns, when any.
    pub server: Option<String>,
    pub message: String,
    pub recorded: Timestamp,
}

/// User-visible progress, emitted at stable percentages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub percent: u8,
    pub message: String,
}

/// In-memory structured event log for a single operation.
#[derive(Default)]
pub struct OperationLog {
    entries: Mutex<Vec<LogEntry>>,
    progress: Mutex<Vec<ProgressEntry>>,
}

impl OperationLog {
    pub fn new() -> Self {
        OperationLog::default()
    }

    pub fn info(&self, server: Option<&str>, message: impl Into<String>) {
        self.record(Severity::Info, server, message.into());
    }

    pub fn warn(&self, server: Option<&str>, message: impl Into<String>) {
        self.record(Severity::Warning, server, message.into());
    }

    pub fn error(&self, server: Option<&str>, message: impl Into<String>) {
        self.record(Severity::Error, server, message.into());
    }

    pub fn progress(&self, percent: u8, message: impl Into<String>) {
        self.progress.lock().push(ProgressEntry {
            percent,
            message: message.into(),
        });
    }

    fn record(&self, severity: Severity, server: Option<&str>, message: String) {
        self.entries.lock().push(LogEntry {
            severity,
            server: server.map(str::to_string),
            message,
            recorded: Timestamp::now(),
        });
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn last_progress(&self) -> Option<ProgressEntry> {
        self.progress.lock().last().cloned()
    }

    pub fn progress_entries(&self) -> Vec<ProgressEntry> {
        self.progress.lock().clone()
    }

    /// Entries of one severity for one server, oldest first.
    pub fn entries_for(&self, severity: Severity, server: &str) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.severity == severity && e.server.as_deref() == Some(server))
            .cloned()
            .collect()
    }
}
