//! External command execution with output capture and redaction

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

use crate::redact::Redactor;

/// How a failed process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatusKind {
    /// Exited normally with a non-zero code
    Code(i32),
    /// Terminated by a signal
    Signal(i32),
    /// Neither code nor signal available
    Unknown,
}

impl ExitStatusKind {
    fn from_status(status: &ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitStatusKind::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatusKind::Signal(signal);
            }
        }

        ExitStatusKind::Unknown
    }
}

impl fmt::Display for ExitStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatusKind::Code(code) => write!(f, "exit code {}", code),
            ExitStatusKind::Signal(signal) => write!(f, "killed by signal {}", signal),
            ExitStatusKind::Unknown => write!(f, "unknown exit status"),
        }
    }
}

/// Failure of a single external command. All text fields are already redacted.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command [{command}] failed ({status}): {output}")]
    Failed {
        command: String,
        output: String,
        status: ExitStatusKind,
    },

    #[error("Command [{command}] could not be started: {message}")]
    Spawn { command: String, message: String },

    #[error("Command [{command}] timed out after {}s", .after.as_secs())]
    TimedOut { command: String, after: Duration },
}

impl CommandError {
    /// The redacted command line that failed
    pub fn command(&self) -> &str {
        match self {
            CommandError::Failed { command, .. }
            | CommandError::Spawn { command, .. }
            | CommandError::TimedOut { command, .. } => command,
        }
    }
}

/// A fully-formed command: program, discrete arguments, optional working directory
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    /// Run the command inside `dir`. Only the child process sees the change.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Shell-quoted rendering for logs. Not redacted.
    pub fn display_line(&self) -> String {
        let parts = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(parts.clone()).unwrap_or_else(|_| parts.collect::<Vec<_>>().join(" "))
    }
}

/// Runs external commands one at a time, routing everything it reports
/// through the run's [`Redactor`]
#[derive(Debug, Clone)]
pub struct CommandRunner {
    redactor: Redactor,
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(redactor: Redactor) -> Self {
        Self {
            redactor,
            timeout: None,
        }
    }

    /// Bound each command's run time. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Execute `spec` and return its combined stdout/stderr on success
    pub async fn run(&self, spec: &CommandSpec) -> Result<String, CommandError> {
        let command_line = self.redactor.redact(&spec.display_line());
        match spec.working_dir() {
            Some(dir) => info!("Executing command: {} (in {})", command_line, dir.display()),
            None => info!("Executing command: {}", command_line),
        }

        let mut command = AsyncCommand::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &spec.envs {
            command.env(key, value);
        }

        let output_future = command.output();
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, output_future).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(CommandError::TimedOut {
                        command: command_line,
                        after: limit,
                    })
                }
            },
            None => output_future.await,
        }
        .map_err(|e| CommandError::Spawn {
            command: command_line.clone(),
            message: self.redactor.redact(&e.to_string()),
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = self.redactor.redact(combined.trim_end());

        if !output.status.success() {
            return Err(CommandError::Failed {
                command: command_line,
                output: combined,
                status: ExitStatusKind::from_status(&output.status),
            });
        }

        debug!("Command output: {}", combined);
        Ok(combined)
    }
}
