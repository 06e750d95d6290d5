//! Running the external dependency resolver (`composer update <package>`).

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::error::{InstallError, Result};

/// Captured result of a resolver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    /// stdout followed by stderr, as a terminal would interleave them roughly.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Finalizes an installation once the host manifest references the package.
pub trait DependencyResolver: Send + Sync {
    /// Resolve and install `package` (bare name, without vendor) from `working_dir`.
    fn update(&self, package: &str, working_dir: &Path) -> Result<ToolOutput>;
}

/// Invokes the `composer` executable.
#[derive(Debug, Clone)]
pub struct ComposerResolver {
    binary: PathBuf,
    extra_args: Vec<String>,
    timeout: Option<Duration>,
}

impl ComposerResolver {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn program(&self) -> String {
        self.binary.display().to_string()
    }

    fn failure(&self, reason: String, output: Option<ToolOutput>) -> InstallError {
        InstallError::ExternalToolFailure {
            program: self.program(),
            reason,
            output,
        }
    }
}

impl Default for ComposerResolver {
    fn default() -> Self {
        Self::new("composer")
    }
}

impl DependencyResolver for ComposerResolver {
    fn update(&self, package: &str, working_dir: &Path) -> Result<ToolOutput> {
        log::info!(
            "Running {} update {} in {}",
            self.program(),
            package,
            working_dir.display()
        );

        let start = Instant::now();
        let mut child = Command::new(&self.binary)
            .arg("update")
            .arg(package)
            .args(&self.extra_args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.failure(format!("failed to start {}: {}", self.program(), e), None))?;

        // Drain both pipes while waiting so a chatty child cannot block on a full pipe
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match self.timeout {
            Some(timeout) => match child.wait_timeout(timeout) {
                Ok(Some(status)) => Some(status),
                Ok(None) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    None
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(self.failure(format!("failed while waiting: {}", e), None));
                }
            },
            None => Some(
                child
                    .wait()
                    .map_err(|e| self.failure(format!("failed while waiting: {}", e), None))?,
            ),
        };

        let output = ToolOutput {
            status: status.and_then(|s| s.code()),
            stdout: join_drain(stdout),
            stderr: join_drain(stderr),
            duration: start.elapsed(),
        };

        log::debug!(
            "{} finished with {:?} in {:?}",
            self.program(),
            output.status,
            output.duration
        );

        match status {
            None => {
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                Err(self.failure(format!("timed out after {} seconds", secs), Some(output)))
            }
            Some(status) if !status.success() => {
                Err(self.failure(describe_status(status), Some(output)))
            }
            Some(_) => Ok(output),
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).to_string()
    })
}

fn join_drain(handle: Option<thread::JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with status {}", code),
        None => "terminated by signal".to_string(),
    }
}
