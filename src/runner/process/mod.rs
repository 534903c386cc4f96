//! Subprocess execution for replayed compiler commands.
//!
//! Compilers can write more to stdout/stderr than a pipe buffer holds. Both
//! pipes are therefore drained on their own threads while the caller blocks on
//! the child's exit, and the threads are joined before the exit status is
//! inspected. Only stderr is kept; it is what a failing compiler explains
//! itself on.

use std::{
    io::{self, Read},
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
};
use tracing::debug;

/// Exit status and captured output of a finished child.
#[derive(Debug)]
pub struct ProcessOutput {
    /// How the child exited.
    pub status: ExitStatus,
    /// Everything the child wrote to stderr.
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Captured stderr as lossy UTF-8, trimmed.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_owned()
    }
}

/// Run `program` with `args` in `cwd`, capturing its stderr.
///
/// Stdout is drained and discarded. A non-zero exit is reported through
/// [`ProcessOutput::status`], not as an error.
///
/// # Errors
///
/// Returns an [`io::Error`] when the process cannot be spawned or waited on,
/// or when its pipes are unavailable.
pub fn run_process(program: &Path, args: &[String], cwd: &Path) -> io::Result<ProcessOutput> {
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    wait_draining_output(child)
}

/// Read `pipe` to EOF on its own thread.
fn spawn_drain<R>(mut pipe: R, stream_name: &'static str) -> JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(err) = pipe.read_to_end(&mut buffer) {
            debug!(
                "reading compiler {stream_name} failed after {} bytes: {err}",
                buffer.len()
            );
        }
        buffer
    })
}

fn join_drain(handle: JoinHandle<Vec<u8>>, stream_name: &str) -> Vec<u8> {
    handle.join().unwrap_or_else(|err| {
        tracing::warn!("{stream_name} drain thread panicked: {err:?}");
        Vec::new()
    })
}

fn wait_draining_output(mut child: Child) -> io::Result<ProcessOutput> {
    let Some(stdout_pipe) = child.stdout.take() else {
        terminate_child(&mut child, "stdout pipe unavailable");
        return Err(io::Error::other("child process missing stdout pipe"));
    };
    let Some(stderr_pipe) = child.stderr.take() else {
        terminate_child(&mut child, "stderr pipe unavailable");
        return Err(io::Error::other("child process missing stderr pipe"));
    };

    let out_handle = spawn_drain(stdout_pipe, "stdout");
    let err_handle = spawn_drain(stderr_pipe, "stderr");

    let waited = child.wait();
    let stdout_bytes = join_drain(out_handle, "stdout");
    let stderr_bytes = join_drain(err_handle, "stderr");
    debug!(
        stdout = stdout_bytes.len(),
        stderr = stderr_bytes.len(),
        "compiler output drained"
    );
    Ok(ProcessOutput {
        status: waited?,
        stderr: stderr_bytes,
    })
}

fn terminate_child(child: &mut Child, context: &str) {
    if let Err(err) = child.kill() {
        debug!("failed to kill child after {context}: {err}");
    }
    if let Err(err) = child.wait() {
        debug!("failed to reap child after {context}: {err}");
    }
}
