//! Handle on a running routing daemon
//!
//! The handle owns the child process and the threads draining its output
//! into the log. `ensure_stopped` is idempotent: the first call stops the
//! process (or notices it is already gone) and releases the handle, later
//! calls do nothing.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read};
use std::process::Child;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Grace period used when a handle is dropped without being stopped
const DROP_GRACE: Duration = Duration::from_secs(1);

/// How `ensure_stopped` found the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Was running and has been stopped
    Stopped,
    /// Had already exited (or could not be signalled)
    AlreadyExited,
    /// Handle was already released by an earlier call
    Released,
}

#[derive(Debug)]
pub struct RoutingProcess {
    label: String,
    child: Option<Child>,
    drains: Vec<JoinHandle<()>>,
}

fn drain<R>(reader: R, label: String, stream: &'static str) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(line) => info!(daemon = %label, stream, "{}", line),
                Err(_) => break,
            }
        }
    })
}

impl RoutingProcess {
    /// Take ownership of a spawned child and start draining its output
    pub fn adopt(mut child: Child, label: &str) -> Self {
        let mut drains = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drains.push(drain(stdout, label.to_string(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(drain(stderr, label.to_string(), "stderr"));
        }

        info!(daemon = %label, pid = child.id(), "Routing daemon started");
        Self {
            label: label.to_string(),
            child: Some(child),
            drains,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// True while the handle is held and the process has not exited
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Stop the process if it is still running and release the handle
    ///
    /// Sends SIGTERM, waits up to `grace`, then kills. A process that is
    /// already gone is logged and reported, never treated as an error.
    pub fn ensure_stopped(&mut self, grace: Duration) -> StopOutcome {
        let Some(mut child) = self.child.take() else {
            return StopOutcome::Released;
        };

        let outcome = match child.try_wait() {
            Ok(Some(status)) => {
                warn!(daemon = %self.label, %status, "Routing daemon already exited");
                StopOutcome::AlreadyExited
            }
            Ok(None) => self.terminate(&mut child, grace),
            Err(e) => {
                warn!(daemon = %self.label, error = %e, "Cannot poll routing daemon, treating as stopped");
                let _ = child.kill();
                let _ = child.wait();
                StopOutcome::AlreadyExited
            }
        };

        // Output still buffered in the pipes ends up in the log
        for handle in self.drains.drain(..) {
            if handle.join().is_err() {
                warn!(daemon = %self.label, "Output drain thread panicked");
            }
        }

        outcome
    }

    fn terminate(&self, child: &mut Child, grace: Duration) -> StopOutcome {
        let pid = Pid::from_raw(child.id() as i32);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                warn!(daemon = %self.label, "Routing daemon vanished before SIGTERM");
                let _ = child.wait();
                return StopOutcome::AlreadyExited;
            }
            Err(e) => warn!(daemon = %self.label, error = %e, "Failed to send SIGTERM"),
        }

        let deadline = Instant::now() + grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!(daemon = %self.label, %status, "Routing daemon stopped");
                    return StopOutcome::Stopped;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                Ok(None) => break,
                Err(e) => {
                    warn!(daemon = %self.label, error = %e, "Lost track of routing daemon");
                    return StopOutcome::AlreadyExited;
                }
            }
        }

        warn!(
            daemon = %self.label,
            grace_ms = grace.as_millis() as u64,
            "Routing daemon ignored SIGTERM, killing"
        );
        let _ = child.kill();
        // Reap so no zombie is left behind
        let _ = child.wait();
        StopOutcome::Stopped
    }
}

impl Drop for RoutingProcess {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.ensure_stopped(DROP_GRACE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn(script: &str) -> Child {
        Command::new("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_stop_running_process() {
        let mut process = RoutingProcess::adopt(spawn("exec sleep 30"), "r1");
        assert!(process.is_running());
        assert!(process.id().is_some());

        let start = Instant::now();
        assert_eq!(
            process.ensure_stopped(Duration::from_secs(5)),
            StopOutcome::Stopped
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(process.id().is_none());
    }

    #[test]
    fn test_already_exited() {
        let mut process = RoutingProcess::adopt(spawn("echo starting; echo oops >&2"), "r1");
        thread::sleep(Duration::from_millis(200));

        assert!(!process.is_running());
        assert_eq!(
            process.ensure_stopped(Duration::from_secs(1)),
            StopOutcome::AlreadyExited
        );
    }

    #[test]
    fn test_double_stop_is_noop() {
        let mut process = RoutingProcess::adopt(spawn("exec sleep 30"), "r1");
        assert_eq!(
            process.ensure_stopped(Duration::from_secs(5)),
            StopOutcome::Stopped
        );
        assert_eq!(
            process.ensure_stopped(Duration::from_secs(5)),
            StopOutcome::Released
        );
        assert!(!process.is_running());
    }

    #[test]
    fn test_kill_after_grace() {
        let mut process =
            RoutingProcess::adopt(spawn("trap '' TERM; exec sleep 30"), "r1");
        thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        assert_eq!(
            process.ensure_stopped(Duration::from_millis(200)),
            StopOutcome::Stopped
        );
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_drop_stops_process() {
        let process = RoutingProcess::adopt(spawn("exec sleep 30"), "r1");
        let pid = Pid::from_raw(process.id().unwrap() as i32);
        drop(process);

        assert_eq!(kill(pid, None), Err(Errno::ESRCH));
    }
}
