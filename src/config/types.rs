//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::supervisor::{SupervisorSettings, WatchdogConfig, DEFAULT_CONNECTED_MARKER};
use crate::worker::WorkerCommand;
use crate::workflow::WorkflowSettings;

/// Environment variable overriding the interpreter for both workers.
pub const PROGRAM_ENV: &str = "PYTHON_PATH";
/// Environment variable overriding `metrics.base_url`.
pub const BASE_URL_ENV: &str = "API_ENDPOINT_BASE_URL";
/// Environment variable overriding `metrics.store_id`.
pub const STORE_ID_ENV: &str = "STORE_ID";

/// Default interpreter for the workers.
#[must_use]
pub fn default_program() -> String {
    if cfg!(windows) { "python" } else { "python3" }.to_string()
}

/// Which worker a [`WorkerConfig`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Capture,
    Recognition,
}

impl WorkerRole {
    fn default_script(self) -> PathBuf {
        match self {
            Self::Capture => PathBuf::from("main.py"),
            Self::Recognition => PathBuf::from("face_rekognition.py"),
        }
    }

    fn default_search_path_var(self) -> Option<String> {
        match self {
            Self::Capture => Some("PYTHONPATH".to_string()),
            Self::Recognition => None,
        }
    }
}

/// One worker's launch settings. Unset fields fall back to per-role
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Interpreter or executable.
    pub program: Option<String>,
    /// Script passed as the first argument.
    pub script: Option<PathBuf>,
    /// Extra arguments after the script.
    pub args: Vec<String>,
    /// Working directory; defaults to `project_root`.
    pub working_dir: Option<PathBuf>,
    /// Search-path variable to prepend the working directory to.
    pub search_path_var: Option<String>,
    /// Extra environment variables, e.g. the camera source.
    pub env: BTreeMap<String, String>,
}

impl WorkerConfig {
    /// Build the launch command for `role`.
    #[must_use]
    pub fn to_command(&self, role: WorkerRole, project_root: Option<&PathBuf>) -> WorkerCommand {
        let program = self.program.clone().unwrap_or_else(default_program);
        let script = self.script.clone().unwrap_or_else(|| role.default_script());

        let mut command = WorkerCommand::new(program)
            .script(script)
            .args(self.args.iter().cloned());

        if let Some(dir) = self.working_dir.as_ref().or(project_root) {
            command = command.working_dir(dir.clone());
        }
        if let Some(var) = self
            .search_path_var
            .clone()
            .or_else(|| role.default_search_path_var())
            .filter(|var| !var.is_empty())
        {
            command = command.search_path_var(var);
        }
        for (key, value) in &self.env {
            command = command.env(key.clone(), value.clone());
        }
        command
    }
}

/// Watchdog timer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSection {
    pub connect_timeout_ms: u64,
    pub stale_check_interval_ms: u64,
    pub stale_threshold_ms: u64,
    /// Substring of a status line that means the camera is connected.
    pub connected_marker: String,
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            stale_check_interval_ms: 5_000,
            stale_threshold_ms: 5_000,
            connected_marker: DEFAULT_CONNECTED_MARKER.to_string(),
        }
    }
}

impl WatchdogSection {
    #[must_use]
    pub fn to_watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            stale_check_interval: Duration::from_millis(self.stale_check_interval_ms),
            stale_threshold: Duration::from_millis(self.stale_threshold_ms),
        }
    }
}

/// Metrics API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// API base URL, e.g. `https://analytics.example.com`.
    pub base_url: Option<String>,
    /// Endpoint path under the base URL.
    pub path: String,
    pub store_id: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            path: "/api/v1/analytics/stores/metrics/".to_string(),
            store_id: String::new(),
            api_key_env: "API_KEY".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl MetricsConfig {
    /// Resolve the endpoint URL against `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base` or the joined URL is invalid.
    pub fn endpoint(&self, base: &str) -> Result<Url, url::ParseError> {
        let base = if base.ends_with('/') {
            Url::parse(base)?
        } else {
            Url::parse(&format!("{base}/"))?
        };
        base.join(self.path.trim_start_matches('/'))
    }
}

/// Workflow settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    /// Delay before controls come back after a completed run.
    pub reenable_delay_ms: u64,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            reenable_delay_ms: 2_000,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the worker scripts.
    pub project_root: Option<PathBuf>,
    pub primary: WorkerConfig,
    pub secondary: WorkerConfig,
    pub watchdog: WatchdogSection,
    pub metrics: MetricsConfig,
    pub workflow: WorkflowSection,
}

impl AppConfig {
    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(program) = non_empty(PROGRAM_ENV) {
            self.primary.program = Some(program.clone());
            self.secondary.program = Some(program);
        }
        if let Some(base_url) = non_empty(BASE_URL_ENV) {
            self.metrics.base_url = Some(base_url);
        }
        if let Some(store_id) = non_empty(STORE_ID_ENV) {
            self.metrics.store_id = store_id;
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env_overrides(|name| std::env::var(name).ok());
    }

    #[must_use]
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        let root = self.project_root.as_ref();
        SupervisorSettings {
            primary: self.primary.to_command(WorkerRole::Capture, root),
            secondary: self.secondary.to_command(WorkerRole::Recognition, root),
            watchdog: self.watchdog.to_watchdog_config(),
            connected_marker: self.watchdog.connected_marker.clone(),
        }
    }

    #[must_use]
    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            reenable_delay: Duration::from_millis(self.workflow.reenable_delay_ms),
        }
    }
}
