//! Request boundary: validates the request body, runs the script and shapes
//! the response the way the HTTP front end reports it.

use crate::sandbox::{ExecutionResult, FailureKind, Sandbox};
use crate::validator::{ValidationError, Validator};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum ExecuteError {
    /// The request itself was malformed (not JSON, no script, empty script).
    InvalidRequest(String),
    /// The script was rejected by the validator.
    Rejected(ValidationError),
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteError::InvalidRequest(msg) => write!(f, "{}", msg),
            ExecuteError::Rejected(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ExecuteError {}

impl From<ValidationError> for ExecuteError {
    fn from(err: ValidationError) -> Self {
        ExecuteError::Rejected(err)
    }
}

/// Extract the script from a `{"script": "..."}` request body.
pub fn parse_request(body: &str) -> Result<String, ExecuteError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|_| ExecuteError::InvalidRequest("Request must be JSON".to_string()))?;

    let script = value
        .as_object()
        .and_then(|obj| obj.get("script"))
        .ok_or_else(|| {
            ExecuteError::InvalidRequest("Missing 'script' field in request body".to_string())
        })?;

    match script.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(ExecuteError::InvalidRequest(
            "Script must be a non-empty string".to_string(),
        )),
    }
}

/// Validate, then run. A rejection never reaches the sandbox.
pub fn execute(
    validator: &Validator,
    sandbox: &dyn Sandbox,
    script: &str,
) -> Result<ExecutionResult, ExecuteError> {
    if script.trim().is_empty() {
        return Err(ExecuteError::InvalidRequest(
            "Script must be a non-empty string".to_string(),
        ));
    }
    validator.check(script).into_result()?;
    Ok(sandbox.run(script)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// The caller's request or script is at fault.
    BadRequest,
    /// The host failed to run an acceptable script.
    Internal,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Internal => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub body: serde_json::Value,
}

pub fn respond(outcome: Result<ExecutionResult, ExecuteError>) -> Response {
    match outcome {
        Ok(ExecutionResult::Success { value, stdout }) => Response {
            status: Status::Ok,
            body: json!({ "result": value, "stdout": stdout }),
        },
        Ok(ExecutionResult::Failure {
            kind,
            error,
            stdout,
        }) => {
            let status = if kind == FailureKind::Host {
                Status::Internal
            } else {
                Status::BadRequest
            };
            Response {
                status,
                body: json!({ "error": error, "stdout": stdout }),
            }
        }
        Err(err) => Response {
            status: Status::BadRequest,
            body: json!({ "error": err.to_string() }),
        },
    }
}

pub fn health() -> serde_json::Value {
    json!({ "status": "healthy" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts invocations instead of spawning anything.
    struct CountingSandbox {
        runs: AtomicUsize,
    }

    impl CountingSandbox {
        fn new() -> Self {
            Self {
                runs: AtomicUsize::new(0),
            }
        }
    }

    impl Sandbox for CountingSandbox {
        fn run(&self, _script: &str) -> Result<ExecutionResult, ValidationError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(ExecutionResult::Success {
                value: json!(1),
                stdout: String::new(),
            })
        }
    }

    #[test]
    fn test_parse_request_ok() {
        let script = parse_request(r#"{"script": "def main():\n    return 1\n"}"#).unwrap();
        assert!(script.starts_with("def main"));
    }

    #[test]
    fn test_parse_request_not_json() {
        let err = parse_request("script=1").unwrap_err();
        assert_eq!(err.to_string(), "Request must be JSON");
    }

    #[test]
    fn test_parse_request_missing_script() {
        let err = parse_request(r#"{"code": "x"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Missing 'script' field in request body");
    }

    #[test]
    fn test_parse_request_blank_or_wrong_type() {
        for body in [r#"{"script": "   "}"#, r#"{"script": 42}"#, r#"{"script": null}"#] {
            let err = parse_request(body).unwrap_err();
            assert_eq!(err.to_string(), "Script must be a non-empty string");
        }
    }

    #[test]
    fn test_missing_entry_point_never_runs() {
        let sandbox = CountingSandbox::new();
        let err = execute(&Validator::default(), &sandbox, "x = 1\n").unwrap_err();
        assert!(matches!(err, ExecuteError::Rejected(_)));
        assert_eq!(err.to_string(), "missing entry point");
        assert_eq!(sandbox.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_denied_import_never_runs() {
        let sandbox = CountingSandbox::new();
        let script = "import subprocess\n\ndef main():\n    return subprocess.run(['id'])\n";
        let err = execute(&Validator::default(), &sandbox, script).unwrap_err();
        assert!(matches!(err, ExecuteError::Rejected(_)));
        assert_eq!(sandbox.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_script_is_caller_error() {
        let sandbox = CountingSandbox::new();
        let err = execute(&Validator::default(), &sandbox, "  \n").unwrap_err();
        assert!(matches!(err, ExecuteError::InvalidRequest(_)));
        assert_eq!(sandbox.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_valid_script_runs_once() {
        let sandbox = CountingSandbox::new();
        let result = execute(&Validator::default(), &sandbox, "def main():\n    return 1\n");
        assert!(result.unwrap().is_success());
        assert_eq!(sandbox.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_respond_success() {
        let response = respond(Ok(ExecutionResult::Success {
            value: json!([1, 2]),
            stdout: "hi\n".to_string(),
        }));
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.body, json!({"result": [1, 2], "stdout": "hi\n"}));
    }

    #[test]
    fn test_respond_script_failure_is_bad_request() {
        let response = respond(Ok(ExecutionResult::failure(
            FailureKind::TimedOut,
            "execution timed out",
            "",
        )));
        assert_eq!(response.status.code(), 400);
        assert_eq!(
            response.body,
            json!({"error": "execution timed out", "stdout": ""})
        );
    }

    #[test]
    fn test_respond_host_failure_is_internal() {
        let response = respond(Ok(ExecutionResult::failure(
            FailureKind::Host,
            "sandbox error: boom",
            "",
        )));
        assert_eq!(response.status, Status::Internal);
        assert_eq!(response.status.code(), 500);
    }

    #[test]
    fn test_respond_rejection() {
        let response = respond(Err(ExecuteError::Rejected(ValidationError {
            reason: "missing entry point".to_string(),
        })));
        assert_eq!(response.status, Status::BadRequest);
        assert_eq!(response.body, json!({"error": "missing entry point"}));
    }

    #[test]
    fn test_health() {
        assert_eq!(health()["status"], "healthy");
    }
}
