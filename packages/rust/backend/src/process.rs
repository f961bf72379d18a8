//! One external process per invocation, bounded by a timeout.
//!
//! stdout and stderr are drained concurrently with the wait so a chatty child
//! can never block on a full pipe. On timeout the child is killed and reaped
//! before [`run`] returns.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::InvokeFailure;

/// How many trailing stderr characters are kept for diagnostics.
const STDERR_TAIL_CHARS: usize = 200;

/// Fully resolved command line for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute (may be a wrapper such as `powershell`).
    pub program: PathBuf,
    /// Arguments, including the prompt when it is passed on argv.
    pub args: Vec<String>,
    /// Text written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

/// Captured output of a child that exited successfully.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Spawn `spec`, wait at most `timeout`, and classify the result.
pub async fn run(spec: &LaunchSpec, timeout: Duration) -> Result<ProcessOutput, InvokeFailure> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => InvokeFailure::ExecutableNotFound {
            program: spec.program.display().to_string(),
        },
        _ => InvokeFailure::Spawn {
            message: format!("{}: {e}", spec.program.display()),
        },
    })?;
    debug!(program = %spec.program.display(), pid = child.id(), "spawned backend process");

    let mut stdout_task = tokio::spawn(read_all(child.stdout.take()));
    let mut stderr_task = tokio::spawn(read_all(child.stderr.take()));

    if let (Some(input), Some(mut writer)) = (spec.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = writer.write_all(input.as_bytes()).await {
                debug!(error = %e, "backend closed stdin early");
            }
            // Dropping the writer closes the pipe so the child sees EOF.
            let _ = writer.shutdown().await;
        });
    }

    // The deadline covers draining the pipes too: a grandchild can keep
    // stdout open after the direct child has exited.
    let finished = tokio::time::timeout(timeout, async {
        let status = child.wait().await?;
        let (stdout, stderr) = tokio::join!(&mut stdout_task, &mut stderr_task);
        Ok::<_, std::io::Error>((status, stdout.unwrap_or_default(), stderr.unwrap_or_default()))
    })
    .await;

    let (status, stdout, stderr) = match finished {
        Ok(Ok((status, stdout, stderr))) => (status, decode(stdout), decode(stderr)),
        Ok(Err(e)) => {
            stdout_task.abort();
            stderr_task.abort();
            return Err(InvokeFailure::Spawn {
                message: format!("wait failed: {e}"),
            });
        }
        Err(_) => {
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed-out backend process");
                }
            }
            stdout_task.abort();
            stderr_task.abort();
            return Err(InvokeFailure::TimedOut { after: timeout });
        }
    };

    if !status.success() {
        return Err(InvokeFailure::NonZeroExit {
            code: status.code().unwrap_or(-1),
            stderr_tail: kanjigen_shared::escaped_tail(&stderr, STDERR_TAIL_CHARS),
        });
    }

    Ok(ProcessOutput { stdout, stderr })
}

async fn read_all<R: AsyncRead + Unpin>(stream: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        if let Err(e) = stream.read_to_end(&mut buf).await {
            debug!(error = %e, "error reading backend output");
        }
    }
    buf
}

fn decode(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}
