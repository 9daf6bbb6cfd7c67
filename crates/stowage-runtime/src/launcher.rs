//! Launching commands inside an unpacked image.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use stowage_common::config::StowageConfig;
use stowage_common::constants::ROOTFS_PLACEHOLDER;
use stowage_common::error::{Result, StowageError};
use stowage_image::reference::CanonicalReference;

use crate::exec::{self, Completion, ExecOutput};

/// Longest stderr excerpt carried in a launch error.
const STDERR_EXCERPT: usize = 512;

/// Everything needed to start one command in one image.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    /// Image being run, for error reporting.
    pub reference: &'a CanonicalReference,
    /// Unpacked root filesystem.
    pub rootfs: &'a Path,
    /// Command to run inside the image.
    pub command: &'a [String],
    /// `KEY=VALUE` pairs from the image config.
    pub env: &'a [String],
    /// Upper bound on the run.
    pub timeout: Duration,
}

/// Something that can run a command against a root filesystem.
pub trait Launcher: Send + Sync {
    /// Runs the request to completion and returns its output.
    ///
    /// # Errors
    ///
    /// Returns `StowageError::Launch` if the process cannot be started,
    /// exits unsuccessfully or outlives the timeout.
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<ExecOutput>;
}

/// Launcher running an external program such as `chroot`.
///
/// The argv prefix may contain `{rootfs}`, which is replaced by the
/// unpacked image path. The container command is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLauncher {
    argv: Vec<String>,
}

impl CommandLauncher {
    /// Creates a launcher from an argv prefix.
    #[must_use]
    pub const fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// Creates the launcher named in `config`.
    #[must_use]
    pub fn from_config(config: &StowageConfig) -> Self {
        Self::new(config.launcher.clone())
    }

    /// Builds the full argv for `command` run against `rootfs`.
    #[must_use]
    pub fn argv(&self, rootfs: &Path, command: &[String]) -> Vec<String> {
        let rootfs = rootfs.to_string_lossy();
        self.argv
            .iter()
            .map(|arg| arg.replace(ROOTFS_PLACEHOLDER, &rootfs))
            .chain(command.iter().cloned())
            .collect()
    }

    fn program(&self, reference: &CanonicalReference) -> Result<PathBuf> {
        let program = self
            .argv
            .first()
            .ok_or_else(|| StowageError::launch(reference, "no launcher is configured"))?;
        which::which(program).map_err(|_| {
            StowageError::launch(
                reference,
                format!("launcher binary '{program}' not found in PATH"),
            )
        })
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<ExecOutput> {
        let reference = request.reference;
        if request.command.is_empty() {
            return Err(StowageError::launch(reference, "command is empty"));
        }
        let program = self.program(reference)?;
        let argv = self.argv(request.rootfs, request.command);
        tracing::info!(%reference, program = %program.display(), ?argv, "launching");

        let mut command = Command::new(&program);
        let _ = command.args(&argv[1..]);
        for pair in request.env {
            if let Some((key, value)) = pair.split_once('=') {
                let _ = command.env(key, value);
            }
        }

        let completion = exec::run_captured(&mut command, request.timeout).map_err(|e| {
            StowageError::launch(reference, format!("failed to spawn {}: {e}", program.display()))
        })?;

        match completion {
            Completion::Exited(output) if output.success() => Ok(output),
            Completion::Exited(output) => {
                let status = output
                    .exit_code
                    .map_or_else(|| "killed by a signal".to_string(), |c| format!("exit code {c}"));
                Err(StowageError::launch(
                    reference,
                    format!("command failed with {status}: {}", excerpt(&output.stderr)),
                ))
            }
            Completion::TimedOut(_) => Err(StowageError::launch(
                reference,
                format!("command timed out after {}s", request.timeout.as_secs_f64()),
            )),
        }
    }
}

fn excerpt(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_EXCERPT {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_EXCERPT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}
