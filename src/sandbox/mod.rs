pub mod harness;
pub mod limits;
pub mod process;

use crate::validator::ValidationError;
use serde::Serialize;
use std::fmt;

/// Why an execution that got past validation did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// `main` raised, or the harness reported a fault (including its own alarm).
    Script,
    TimedOut,
    /// The child exited with a nonzero status.
    Crashed,
    /// The child exited cleanly but did not honour the single-line contract.
    MalformedOutput,
    /// The host could not prepare or launch the child.
    Host,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success {
        value: serde_json::Value,
        stdout: String,
    },
    Failure {
        kind: FailureKind,
        error: String,
        stdout: String,
    },
}

impl ExecutionResult {
    pub fn failure(kind: FailureKind, error: impl Into<String>, stdout: impl Into<String>) -> Self {
        ExecutionResult::Failure {
            kind,
            error: error.into(),
            stdout: stdout.into(),
        }
    }

    pub fn timed_out() -> Self {
        Self::failure(FailureKind::TimedOut, "execution timed out", "")
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn stdout(&self) -> &str {
        match self {
            ExecutionResult::Success { stdout, .. } | ExecutionResult::Failure { stdout, .. } => {
                stdout
            }
        }
    }
}

#[derive(Serialize)]
struct Wire<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    stdout: &'a str,
}

/// Serializes to the same `{success, result|error, stdout}` shape the harness emits.
impl Serialize for ExecutionResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            ExecutionResult::Success { value, stdout } => Wire {
                success: true,
                result: Some(value),
                error: None,
                stdout: stdout.as_str(),
            },
            ExecutionResult::Failure { error, stdout, .. } => Wire {
                success: false,
                result: None,
                error: Some(error.as_str()),
                stdout: stdout.as_str(),
            },
        };
        wire.serialize(serializer)
    }
}

/// Host-side faults while preparing or supervising the child.
#[derive(Debug)]
pub enum SandboxError {
    InterpreterNotFound(String),
    Workspace(std::io::Error),
    Spawn(std::io::Error),
    Wait(std::io::Error),
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxError::InterpreterNotFound(name) => {
                write!(f, "Python interpreter '{}' not found", name)
            }
            SandboxError::Workspace(e) => write!(f, "Failed to prepare workspace: {}", e),
            SandboxError::Spawn(e) => write!(f, "Failed to start interpreter: {}", e),
            SandboxError::Wait(e) => write!(f, "Failed to wait for interpreter: {}", e),
        }
    }
}

impl std::error::Error for SandboxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SandboxError::InterpreterNotFound(_) => None,
            SandboxError::Workspace(e) | SandboxError::Spawn(e) | SandboxError::Wait(e) => Some(e),
        }
    }
}

impl From<SandboxError> for ExecutionResult {
    fn from(err: SandboxError) -> Self {
        ExecutionResult::failure(FailureKind::Host, format!("sandbox error: {}", err), "")
    }
}

pub trait Sandbox: Send + Sync {
    /// Run a script's `main` entry point. Rejects scripts the validator would reject.
    fn run(&self, script: &str) -> Result<ExecutionResult, ValidationError>;
}
