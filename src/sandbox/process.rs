use super::harness::{self, HARNESS_FILE, SCRIPT_FILE};
use super::limits::{ResourceLimits, LIMITS};
use super::{ExecutionResult, FailureKind, Sandbox, SandboxError};
use crate::validator::{ValidationError, Validator};
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn};
use wait_timeout::ChildExt;

/// Upper bound on how much of each child stream is kept in memory.
const MAX_CAPTURE_BYTES: u64 = 16 * 1024 * 1024;

/// How long to wait for the pipes to close once the child has exited.
const PIPE_GRACE: Duration = Duration::from_secs(2);

const DEFAULT_INTERPRETER: &str = "python3";

/// Runs each script in a fresh temporary directory under a resource-limited
/// Python child process.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    interpreter: String,
    scratch_dir: Option<PathBuf>,
    validator: Validator,
    limits: ResourceLimits,
}

impl ProcessSandbox {
    pub fn new(validator: Validator) -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            scratch_dir: None,
            validator,
            limits: LIMITS,
        }
    }

    /// Interpreter name (looked up on `PATH`) or absolute path.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Parent directory for per-run workspaces. Defaults to the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    fn resolve_interpreter(&self) -> Result<PathBuf, SandboxError> {
        which::which(&self.interpreter)
            .map_err(|_| SandboxError::InterpreterNotFound(self.interpreter.clone()))
    }

    fn create_workspace(&self) -> Result<tempfile::TempDir, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pysandbox-");
        let dir = match &self.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.map_err(SandboxError::Workspace)
    }

    /// Everything between workspace creation and cleanup.
    fn run_in(&self, workdir: &Path, script: &str) -> Result<ExecutionResult, SandboxError> {
        let interpreter = self.resolve_interpreter()?;

        std::fs::write(workdir.join(SCRIPT_FILE), script).map_err(SandboxError::Workspace)?;
        let harness_path = workdir.join(HARNESS_FILE);
        std::fs::write(&harness_path, harness::render(workdir, self.limits.alarm))
            .map_err(SandboxError::Workspace)?;

        let mut cmd = Command::new(&interpreter);
        cmd.arg(&harness_path)
            .current_dir(workdir)
            .env_clear()
            .env("PYTHONPATH", workdir)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let limits = self.limits;
        // SAFETY: the closure only calls setrlimit, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                limits.apply_best_effort();
                Ok(())
            });
        }

        debug!(interpreter = %interpreter.display(), "spawning harness");
        let mut child = cmd.spawn().map_err(SandboxError::Spawn)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match child.wait_timeout(self.limits.supervisory_timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(
                    timeout_secs = self.limits.supervisory_timeout.as_secs(),
                    "supervisory timeout expired, killing process group"
                );
                terminate(&mut child);
                return Ok(ExecutionResult::timed_out());
            }
            Err(e) => {
                terminate(&mut child);
                return Err(SandboxError::Wait(e));
            }
        };

        // Descendants left behind would keep the pipes open and block the readers.
        kill_group(&child);
        let stdout = stdout.collect(PIPE_GRACE);
        let stderr = stderr.collect(PIPE_GRACE);

        if status.signal() == Some(libc::SIGXCPU) {
            warn!("cpu time ceiling exceeded");
            return Ok(ExecutionResult::timed_out());
        }

        if !status.success() {
            debug!(status = %status, "harness exited abnormally");
            return Ok(ExecutionResult::failure(
                FailureKind::Crashed,
                format!("execution failed: {}", stderr),
                stdout,
            ));
        }

        Ok(harness::parse_output(&stdout))
    }
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new(Validator::default())
    }
}

impl Sandbox for ProcessSandbox {
    fn run(&self, script: &str) -> Result<ExecutionResult, ValidationError> {
        let id = uuid::Uuid::new_v4();
        let span = info_span!("execution", id = %id);
        let _enter = span.enter();

        self.validator.check(script).into_result().inspect_err(|e| {
            info!(reason = %e, "script rejected");
        })?;

        let workspace = match self.create_workspace() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "could not create workspace");
                return Ok(e.into());
            }
        };
        debug!(workdir = %workspace.path().display(), "workspace ready");

        let result = self
            .run_in(workspace.path(), script)
            .unwrap_or_else(|e| {
                warn!(error = %e, "sandbox fault");
                e.into()
            });

        if let Err(e) = workspace.close() {
            warn!(error = %e, "failed to remove workspace");
        }

        match &result {
            ExecutionResult::Success { .. } => info!("execution succeeded"),
            ExecutionResult::Failure { kind, .. } => info!(?kind, "execution failed"),
        }
        Ok(result)
    }
}

/// A child stream being read to the end on its own thread.
struct Capture(Option<mpsc::Receiver<Vec<u8>>>);

/// Keeps at most `MAX_CAPTURE_BYTES` of `stream` and discards the rest.
fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Capture {
    let Some(mut stream) = stream else {
        return Capture(None);
    };
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = (&mut stream).take(MAX_CAPTURE_BYTES).read_to_end(&mut buf);
        let _ = std::io::copy(&mut stream, &mut std::io::sink());
        let _ = tx.send(buf);
    });
    Capture(Some(rx))
}

impl Capture {
    /// Wait up to `grace` for end of stream. A descendant that escaped the
    /// process group and still holds the pipe yields an empty capture.
    fn collect(self, grace: Duration) -> String {
        let bytes = self
            .0
            .and_then(|rx| rx.recv_timeout(grace).ok())
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn kill_group(child: &Child) {
    // The child leads its own process group, so its pid is the group id.
    let pgid = child.id() as libc::pid_t;
    // SAFETY: killpg has no memory-safety preconditions; ESRCH is expected and ignored.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

fn terminate(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
    let _ = child.wait();
}
