//! Command output type shared by every session implementation.

/// Result of running a command on a device.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the remote side, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Builds a successful output carrying `stdout`.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Describes why the command should be treated as failed, if it should.
    ///
    /// Network operating systems frequently report errors on stderr while
    /// still exiting zero, so any stderr text counts as a failure.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return Some(stderr.to_owned());
        }
        if self.is_success() {
            return None;
        }
        Some(
            self.code
                .map_or_else(|| String::from("terminated without an exit status"), |code| {
                    format!("exited with status {code}")
                }),
        )
    }
}
