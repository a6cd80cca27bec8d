//! Shell execution in a session workspace.

use super::SandboxExecutor;
use crate::tools::ToolError;
use serde::Serialize;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Exit code reported for commands killed by SIGKILL.
pub const KILLED_EXIT_CODE: i32 = 128 + 9;

/// How long to keep collecting output after the shell is gone. Background
/// children can hold the pipes open indefinitely.
const OUTPUT_DRAIN: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 8192;

/// Receives output chunks as they arrive.
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Options for [`SandboxExecutor::run_bash`].
#[derive(Clone, Default)]
pub struct BashOptions {
    pub cancel: Option<CancellationToken>,
    pub timeout: Option<Duration>,
    pub on_output: Option<OutputSink>,
}

impl std::fmt::Debug for BashOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BashOptions")
            .field("cancel", &self.cancel)
            .field("timeout", &self.timeout)
            .field("on_output", &self.on_output.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BashResult {
    pub ok: bool,
    pub exit_code: i32,
    pub output: String,
    pub cancelled: bool,
    pub timed_out: bool,
}

impl BashResult {
    fn spawn_failure(message: String) -> Self {
        Self {
            ok: false,
            exit_code: -1,
            output: message,
            cancelled: false,
            timed_out: false,
        }
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

/// Collected output with a byte cap.
struct Output {
    buffer: Vec<u8>,
    cap: usize,
    truncated: bool,
    sink: Option<OutputSink>,
}

impl Output {
    fn push(&mut self, chunk: &[u8]) {
        if let Some(sink) = &self.sink {
            sink(&String::from_utf8_lossy(chunk));
        }
        let room = self.cap.saturating_sub(self.buffer.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn finish(self) -> String {
        let mut output = String::from_utf8_lossy(&self.buffer).into_owned();
        if self.truncated {
            output.push_str(&format!("\n[output truncated at {} bytes]", self.cap));
        }
        output
    }
}

impl SandboxExecutor {
    /// Run `command` with `sh -c` in the session workspace.
    ///
    /// Failures to start the shell are reported in the result with exit code
    /// `-1`. Only an invalid session id is an `Err`.
    pub async fn run_bash(
        &self,
        session_id: &str,
        command: &str,
        options: BashOptions,
    ) -> Result<BashResult, ToolError> {
        let workspace = self.workspace(session_id)?;
        if let Err(e) = tokio::fs::create_dir_all(&workspace).await {
            return Ok(BashResult::spawn_failure(format!(
                "failed to create workspace {}: {e}",
                workspace.display()
            )));
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(session_id, error = %e, "failed to spawn shell");
                return Ok(BashResult::spawn_failure(format!("failed to spawn shell: {e}")));
            }
        };
        debug!(session_id, pid = ?child.id(), command, "spawned shell");

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone()));
        }
        drop(tx);

        let mut output = Output {
            buffer: Vec::new(),
            cap: self.config.max_output_bytes,
            truncated: false,
            sink: options.on_output,
        };
        let cancel = options.cancel.unwrap_or_default();
        let deadline = tokio::time::sleep(options.timeout.unwrap_or(self.config.bash_timeout()));
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                Some(chunk) = rx.recv() => output.push(&chunk),
                status = child.wait() => break Outcome::Exited(status),
                _ = cancel.cancelled() => break Outcome::Cancelled,
                _ = &mut deadline => break Outcome::TimedOut,
            }
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            kill_group(&mut child).await;
        }

        // Pick up whatever the pipes still hold.
        let _ = tokio::time::timeout(OUTPUT_DRAIN, async {
            while let Some(chunk) = rx.recv().await {
                output.push(&chunk);
            }
        })
        .await;

        let output = output.finish();
        let result = match outcome {
            Outcome::Exited(Ok(status)) => {
                let exit_code = exit_code(status);
                BashResult {
                    ok: exit_code == 0,
                    exit_code,
                    output,
                    cancelled: false,
                    timed_out: false,
                }
            }
            Outcome::Exited(Err(e)) => BashResult::spawn_failure(format!("wait failed: {e}")),
            Outcome::Cancelled => BashResult {
                ok: false,
                exit_code: KILLED_EXIT_CODE,
                output,
                cancelled: true,
                timed_out: false,
            },
            Outcome::TimedOut => BashResult {
                ok: false,
                exit_code: KILLED_EXIT_CODE,
                output,
                cancelled: false,
                timed_out: true,
            },
        };

        if result.cancelled || result.timed_out {
            info!(session_id, cancelled = result.cancelled, "killed shell");
        }
        debug!(session_id, exit_code = result.exit_code, "shell finished");
        Ok(result)
    }
}

/// Forward one pipe's bytes. Chunks always end on a UTF-8 character
/// boundary so streamed deltas never split a multibyte character.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut pending = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let ready = complete_prefix(&pending);
                if ready == 0 {
                    continue;
                }
                let rest = pending.split_off(ready);
                if tx.send(std::mem::replace(&mut pending, rest)).is_err() {
                    return;
                }
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(pending);
    }
}

/// Length of the longest prefix of `bytes` that does not end inside a
/// multibyte UTF-8 sequence.
fn complete_prefix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for i in (len.saturating_sub(3)..len).rev() {
        let width = match bytes[i] {
            0x80..=0xbf => continue,
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return len,
        };
        return if len - i < width { i } else { len };
    }
    len
}

/// SIGKILL the shell's whole process group, then reap it.
async fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!(pid, error = %e, "killpg failed");
        }
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "kill failed");
    }
    let _ = child.wait().await;
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
