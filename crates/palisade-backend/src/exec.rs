//! Results of commands executed inside service containers.

use serde::{Deserialize, Serialize};

/// Output of a command executed inside a service or sidecar container.
///
/// A non-zero exit code is a *successful* exec that carries a failure
/// result; transport failures are reported as [`BackendError::ExecFailed`]
/// instead.
///
/// [`BackendError::ExecFailed`]: crate::error::BackendError::ExecFailed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    exit_code: i32,
    output: String,
}

impl ExecResult {
    /// Creates a new exec result.
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    /// Returns the command's exit code.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Returns the combined command output.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Returns true if the command exited with code zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
