//! Scoped external process execution with captured streams and a deadline

use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for stream EOF once the child is gone. Grandchildren
/// that inherited the pipes can keep them open past that.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Exited on its own with a code
    Exited(i32),
    /// Ended by a signal it did not send itself
    Signaled,
    /// Killed after the deadline elapsed
    TimedOut,
}

/// Output from a finished process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ProcessStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Kills and reaps the child unless it was already waited on
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            log::debug!("kill of pid {} failed: {e}", self.child.id());
        }
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.kill();
        }
    }
}

/// Run a command to completion or until `timeout` elapses
///
/// A timeout too large to represent as a deadline means no deadline. Both output streams are drained on their own threads so the child never
/// stalls on a full pipe. On timeout the child is killed and whatever it had
/// written so far is still returned.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> io::Result<ProcessOutput> {
    let started = Instant::now();
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut guard = ChildGuard {
        child,
        reaped: false,
    };
    let stdout_reader = spawn_reader(guard.child.stdout.take());
    let stderr_reader = spawn_reader(guard.child.stderr.take());

    let deadline = started.checked_add(timeout);
    let status = loop {
        if let Some(exit) = guard.child.try_wait()? {
            guard.reaped = true;
            break match exit.code() {
                Some(code) => ProcessStatus::Exited(code),
                None => ProcessStatus::Signaled,
            };
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log::debug!("pid {} exceeded {timeout:?}, killing", guard.child.id());
            guard.kill();
            break ProcessStatus::TimedOut;
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(ProcessOutput {
        status,
        stdout: join_reader(stdout_reader),
        stderr: join_reader(stderr_reader),
        elapsed: started.elapsed(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> Option<Receiver<Vec<u8>>> {
    stream.map(|mut stream| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = stream.read_to_end(&mut buf) {
                log::debug!("stream read failed: {e}");
            }
            let _ = tx.send(buf);
        });
        rx
    })
}

fn join_reader(reader: Option<Receiver<Vec<u8>>>) -> Vec<u8> {
    let Some(rx) = reader else {
        return Vec::new();
    };
    match rx.recv_timeout(DRAIN_GRACE) {
        Ok(buf) => buf,
        Err(_) => {
            log::warn!("output stream still open {DRAIN_GRACE:?} after exit, dropping it");
            Vec::new()
        }
    }
}
