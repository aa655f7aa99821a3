//! External worker spawning and control.
//!
//! This module provides a builder for the command line of a worker process
//! and a thin wrapper over the spawned child with control methods for
//! stopping it.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The worker executable was not found.
    #[error("Worker executable not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied launching {0}")]
    PermissionDenied(String),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Builder for a worker command line and environment.
#[derive(Debug, Clone, Default)]
pub struct WorkerCommand {
    program: String,
    script: Option<PathBuf>,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    search_path_var: Option<String>,
    envs: Vec<(String, String)>,
}

impl WorkerCommand {
    /// Create a new builder for the given executable.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Script passed as the first argument (e.g. `main.py`).
    #[must_use]
    pub fn script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Append a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory of the worker.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Prepend the working directory to this search-path variable
    /// (e.g. `PYTHONPATH`) in the worker's environment.
    #[must_use]
    pub fn search_path_var(mut self, name: impl Into<String>) -> Self {
        self.search_path_var = Some(name.into());
        self
    }

    /// Set an extra environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Get the executable.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the extra environment variables.
    #[must_use]
    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        if let Some(script) = &self.script {
            args.push(script.clone().into_os_string());
        }
        args.extend(self.args.iter().map(OsString::from));
        args
    }

    /// Value of the augmented search-path variable, given its current value.
    ///
    /// Returns `None` when no search-path variable is configured.
    #[must_use]
    pub fn search_path_value(&self, existing: Option<OsString>) -> Option<(String, OsString)> {
        let name = self.search_path_var.as_ref()?;
        let root = self
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();

        let mut paths = vec![root];
        if let Some(existing) = existing.filter(|value| !value.is_empty()) {
            paths.extend(std::env::split_paths(&existing));
        }

        let value = std::env::join_paths(paths)
            .unwrap_or_else(|_| self.working_dir.clone().unwrap_or_default().into_os_string());
        Some((name.clone(), value))
    }
}

/// A running worker process.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
}

impl WorkerProcess {
    /// Spawn a worker with stdout and stderr piped.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(command: &WorkerCommand) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(command.build_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = command.working_dir {
            cmd.current_dir(dir);
        }

        if let Some(var) = &command.search_path_var {
            if let Some((name, value)) = command.search_path_value(std::env::var_os(var)) {
                cmd.env(name, value);
            }
        }

        for (key, value) in &command.envs {
            cmd.env(key, value);
        }

        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(&command.program, e))?;

        tracing::debug!(
            program = %command.program,
            pid = ?child.id(),
            "Spawned worker process"
        );

        Ok(Self { child })
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Send a kill signal without waiting for the exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub fn start_kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }

    /// Ask the process to exit.
    ///
    /// On Unix this sends SIGTERM and returns immediately; the caller waits
    /// for the exit. On other platforms there is no graceful signal, so the
    /// process is killed.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    pub fn terminate(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.terminate_unix()
        }

        #[cfg(not(unix))]
        {
            self.start_kill()
        }
    }

    #[cfg(unix)]
    fn terminate_unix(&mut self) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.id() else {
            // Already reaped
            return Ok(());
        };

        let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        kill(nix_pid, Signal::SIGTERM).map_err(std::io::Error::from)
    }
}
