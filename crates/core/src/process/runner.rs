//! Spawn, supervise and reap one external process.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::{ExecutionError, ProcessOutput, ProcessSpec};

/// Bytes of stdout or stderr retained per stream (the tail is kept).
///
/// Reconstruction tools log for hours; only the end is useful for diagnosis.
const MAX_TAIL_BYTES: usize = 64 * 1024;

/// Run `spec` to completion or until its timeout expires.
///
/// The child is placed in a new process group. Whatever happens (normal
/// exit, timeout, or the returned future being dropped) the whole group is
/// killed before this returns, so helpers forked by the executable never
/// outlive the attempt.
pub async fn run_process(spec: &ProcessSpec) -> Result<ProcessOutput, ExecutionError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &spec.working_directory {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(ExecutionError::Launch)?;
    let mut group = ProcessGroupGuard::new(child.id());

    tracing::debug!(
        program = %spec.program.display(),
        pid = child.id(),
        timeout_secs = spec.timeout.as_secs(),
        "Process started",
    );

    let stdout_task = tokio::spawn(read_tail(child.stdout.take()));
    let stderr_task = tokio::spawn(read_tail(child.stderr.take()));

    match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            // Background descendants may still hold the pipes open.
            group.leader_reaped();
            drop(group);

            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();

            Ok(ProcessOutput {
                exit_code: status.code(),
                signal: exit_signal(&status),
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                duration_ms,
            })
        }
        Ok(Err(e)) => {
            drop(group);
            stdout_task.abort();
            stderr_task.abort();
            Err(ExecutionError::Io(e))
        }
        Err(_elapsed) => {
            tracing::warn!(
                program = %spec.program.display(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Process exceeded its timeout, killing process group",
            );
            drop(group);
            // SIGKILL the leader (already dead if the group kill landed) and reap it.
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(ExecutionError::Timeout {
                seconds: spec.timeout.as_secs(),
            })
        }
    }
}

/// Read a stream to EOF, keeping at most [`MAX_TAIL_BYTES`] from its end.
async fn read_tail<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut tail = Vec::new();
    let Some(mut reader) = handle else {
        return tail;
    };

    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > 2 * MAX_TAIL_BYTES {
                    let excess = tail.len() - MAX_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
    if tail.len() > MAX_TAIL_BYTES {
        let excess = tail.len() - MAX_TAIL_BYTES;
        tail.drain(..excess);
    }
    tail
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

// ---------------------------------------------------------------------------
// Process group guard
// ---------------------------------------------------------------------------

/// Sends SIGKILL to a whole process group when dropped.
struct ProcessGroupGuard {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<i32>,
    #[cfg_attr(not(unix), allow(dead_code))]
    leader_reaped: bool,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()),
            leader_reaped: false,
        }
    }

    /// The leader has been waited on, so its pid may be recycled.
    fn leader_reaped(&mut self) {
        self.leader_reaped = true;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            // A pid is never handed out while a group with that id still has
            // members. So once the leader is reaped, a live process with pid
            // `pgid` means the id was recycled and the group is not ours.
            // SAFETY: getpgid and killpg have no memory-safety preconditions.
            if self.leader_reaped && unsafe { libc::getpgid(pgid) } != -1 {
                tracing::debug!(pgid, "Process group id was recycled, not signalling it");
                return;
            }
            // ESRCH (group already gone) is the common case after a clean exit.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}
