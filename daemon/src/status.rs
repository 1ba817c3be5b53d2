use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// Configuration loaded; the backend is being launched.
    Starting,
    /// Connected to the backend and waiting for device events.
    Watching,
    /// The chooser is open for an inserted device.
    Prompting,
    /// The dispatch loop has returned.
    Stopped,
}

/// Outcome of the most recent prompt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LastDecision {
    Allowed,
    Declined,
    /// The chooser or the allow action could not be run.
    Failed,
}

/// Runtime status written by the daemon to `status.toml` for status bars and scripts.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: DaemonState,
    /// Name of the most recently prompted device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_device_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_decision: Option<LastDecision>,
    /// RFC 3339 timestamp of `last_decision`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_decision_timestamp: Option<String>,
    /// Human-readable description of the last error, fatal or not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    /// Constructs the initial status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Starting,
            last_device: None,
            last_device_id: None,
            last_decision: None,
            last_decision_timestamp: None,
            error: None,
        }
    }
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist. Failures are logged only.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("failed to create status directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!("failed to write status file: {e}");
            }
        }
        Err(e) => warn!("failed to serialize status: {e}"),
    }
}

/// Owns the daemon's status and rewrites the file after every change.
/// With no path, status is tracked in memory only.
pub struct StatusReporter {
    path: Option<PathBuf>,
    status: DaemonStatus,
}

impl StatusReporter {
    pub fn new(path: Option<PathBuf>) -> Self {
        let reporter = Self {
            path,
            status: DaemonStatus::new(),
        };
        reporter.flush();
        reporter
    }

    #[cfg(test)]
    pub fn status(&self) -> &DaemonStatus {
        &self.status
    }

    pub fn set_state(&mut self, state: DaemonState) {
        self.status.state = state;
        self.flush();
    }

    pub fn record_decision(&mut self, device: &str, id: u32, decision: LastDecision) {
        self.status.last_device = Some(device.to_string());
        self.status.last_device_id = Some(id);
        self.status.last_decision = Some(decision);
        self.status.last_decision_timestamp = Some(chrono::Local::now().to_rfc3339());
        self.flush();
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.status.error = Some(error.into());
        self.flush();
    }

    fn flush(&self) {
        if let Some(path) = &self.path {
            write_status(path, &self.status);
        }
    }
}
