//! The wrapper program run inside the child, and the parser for its one-line reply.

use super::{ExecutionResult, FailureKind};
use crate::validator::ENTRY_POINT;
use std::path::Path;
use std::time::Duration;

pub const SCRIPT_FILE: &str = "user_script.py";
pub const HARNESS_FILE: &str = "wrapper.py";
const SCRIPT_MODULE: &str = "user_script";

pub const PARSE_FAILURE: &str = "failed to parse execution result";

const TEMPLATE: &str = r#"import contextlib
import io
import json
import os
import signal
import sys


def _on_alarm(signum, frame):
    raise TimeoutError("Script execution timed out")


signal.signal(signal.SIGALRM, _on_alarm)
signal.alarm(__ALARM_SECS__)

_workdir = __WORKDIR__
os.chdir(_workdir)
sys.path.insert(0, _workdir)
_captured = io.StringIO()

try:
    with contextlib.redirect_stdout(_captured):
        import __MODULE__ as _user

        _entry = getattr(_user, "__ENTRY__", None)
        if _entry is None:
            raise ValueError("No __ENTRY__() function found")
        _result = _entry()
    signal.alarm(0)
    _line = json.dumps({"success": True, "result": _result, "stdout": _captured.getvalue()})
except BaseException as e:
    signal.alarm(0)
    _line = json.dumps({"success": False, "error": str(e), "stdout": _captured.getvalue()})

sys.stdout.write(_line + "\n")
sys.stdout.flush()
"#;

/// Render the harness for a script living in `workdir`.
pub fn render(workdir: &Path, alarm: Duration) -> String {
    // A JSON string literal is also a valid Python string literal.
    let workdir = serde_json::Value::String(workdir.display().to_string()).to_string();
    TEMPLATE
        .replace("__ALARM_SECS__", &alarm.as_secs().max(1).to_string())
        .replace("__WORKDIR__", &workdir)
        .replace("__MODULE__", SCRIPT_MODULE)
        .replace("__ENTRY__", ENTRY_POINT)
}

/// Parse the harness's stdout. Anything but exactly one conforming JSON object
/// is a parse failure carrying the raw output.
pub fn parse_output(raw: &str) -> ExecutionResult {
    parse_line(raw)
        .unwrap_or_else(|| ExecutionResult::failure(FailureKind::MalformedOutput, PARSE_FAILURE, raw))
}

fn parse_line(raw: &str) -> Option<ExecutionResult> {
    let line = raw.strip_suffix('\n').unwrap_or(raw);
    if line.is_empty() || line.contains('\n') {
        return None;
    }

    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let mut object = match value {
        serde_json::Value::Object(object) => object,
        _ => return None,
    };

    let success = object.get("success")?.as_bool()?;
    let stdout = object.get("stdout")?.as_str()?.to_string();

    if success {
        let value = object.remove("result")?;
        Some(ExecutionResult::Success { value, stdout })
    } else {
        let error = object.get("error")?.as_str()?.to_string();
        Some(ExecutionResult::failure(FailureKind::Script, error, stdout))
    }
}
