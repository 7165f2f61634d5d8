//! Long-lived Python interpreter backing one tool session.
//!
//! A small driver script reads one JSON request per line from stdin, runs the
//! code in a namespace that lives as long as the process, and answers with one
//! marked JSON line on stdout. Anything else the cell manages to print to the
//! real stdout (child processes, C extensions) is passed through as output.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::ToolOutput;
use crate::error::ToolError;

const REPLY_MARKER: &str = "\u{1e}bench-infer-reply ";

const DRIVER: &str = r#"
import contextlib, io, json, sys, traceback
_requests = sys.stdin
_reply = sys.stdout
sys.stdin = io.StringIO("")
_namespace = {"__name__": "__main__", "__builtins__": __builtins__}
for _line in iter(_requests.readline, ""):
    _code = json.loads(_line)["code"]
    _out, _err, _status = io.StringIO(), io.StringIO(), 0
    with contextlib.redirect_stdout(_out), contextlib.redirect_stderr(_err):
        try:
            exec(compile(_code, "<cell>", "exec"), _namespace)
        except SystemExit as _exit:
            _status = _exit.code if isinstance(_exit.code, int) else (0 if _exit.code is None else 1)
        except BaseException:
            traceback.print_exc()
            _status = 1
    _reply.write("\x1ebench-infer-reply " + json.dumps({"stdout": _out.getvalue(), "stderr": _err.getvalue(), "exit_code": _status}) + "\n")
    _reply.flush()
"#;

#[derive(Serialize)]
struct CellRequest<'a> {
    code: &'a str,
}

#[derive(Deserialize)]
struct CellReply {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

/// Result of one cell.
#[derive(Debug)]
pub(crate) enum CellResult {
    /// The interpreter answered and keeps its state.
    Completed(ToolOutput),
    /// The interpreter died while running the cell; its state is gone.
    Exited(ToolOutput),
}

#[derive(Debug)]
pub(crate) struct PythonKernel {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl PythonKernel {
    pub(crate) fn spawn(interpreter: &str, workdir: &Path) -> Result<Self, ToolError> {
        let spawn_error = |message: String| ToolError::Spawn {
            interpreter: interpreter.to_string(),
            message,
        };
        let mut child = Command::new(interpreter)
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout not captured".to_string()))?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Sends one cell and waits for its reply. Not cancel-safe: a kernel whose
    /// `run` future was dropped must be discarded.
    pub(crate) async fn run(&mut self, code: &str) -> Result<CellResult, ToolError> {
        let mut request = serde_json::to_string(&CellRequest { code })
            .map_err(|e| ToolError::Session(e.to_string()))?;
        request.push('\n');

        let mut passthrough = String::new();
        if let Err(e) = self.send(&request).await {
            // Broken pipe means the interpreter is already gone.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e.into());
            }
            return Ok(self.exited(passthrough).await);
        }

        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line).await? == 0 {
                return Ok(self.exited(passthrough).await);
            }
            match line.strip_prefix(REPLY_MARKER) {
                Some(json) => {
                    let reply: CellReply = serde_json::from_str(json.trim_end())
                        .map_err(|e| ToolError::Session(format!("unreadable kernel reply: {e}")))?;
                    passthrough.push_str(&reply.stdout);
                    return Ok(CellResult::Completed(ToolOutput {
                        stdout: passthrough,
                        stderr: reply.stderr,
                        exit_code: reply.exit_code,
                    }));
                }
                None => passthrough.push_str(&line),
            }
        }
    }

    async fn send(&mut self, request: &str) -> std::io::Result<()> {
        self.stdin.write_all(request.as_bytes()).await?;
        self.stdin.flush().await
    }

    async fn exited(&mut self, stdout: String) -> CellResult {
        let exit_code = match self.child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(_) => -1,
        };
        CellResult::Exited(ToolOutput {
            stdout,
            stderr: "Python interpreter exited; variables from earlier cells are lost.".to_string(),
            exit_code: if exit_code == 0 { 1 } else { exit_code },
        })
    }
}
