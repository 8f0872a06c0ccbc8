//! Child process tracking and reaping.
//!
//! Session processes are launched detached from any `std::process::Child`
//! handle. Their pids are registered here together with an exit callback and
//! reaped with `waitpid(WNOHANG)` whenever SIGCHLD is delivered.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Callback invoked with the exit status of a reaped process.
pub type ExitCallback = Box<dyn FnOnce(i32) + Send>;

/// Tracks child pids and runs their exit callbacks once reaped.
#[derive(Default)]
pub struct ProcessTracker {
    processes: Mutex<HashMap<i32, ExitCallback>>,
}

impl ProcessTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `pid`, invoking `on_exit` once it is reaped.
    pub fn add_process<F>(&self, pid: u32, on_exit: F)
    where
        F: FnOnce(i32) + Send + 'static,
    {
        let mut processes = self
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        processes.insert(pid as i32, Box::new(on_exit));
    }

    /// Number of pids still tracked.
    pub fn tracked_count(&self) -> usize {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Reaps every tracked pid that has exited. Returns the number reaped.
    ///
    /// Exit callbacks run after the tracker lock is released. Pids that are
    /// not our children (ECHILD) are dropped without a callback.
    pub fn notify_sigchld(&self) -> usize {
        let mut exited: Vec<(i32, i32, ExitCallback)> = Vec::new();
        {
            let mut processes = self
                .processes
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let pids: Vec<i32> = processes.keys().copied().collect();
            for pid in pids {
                match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::Exited(_, code)) => {
                        if let Some(cb) = processes.remove(&pid) {
                            exited.push((pid, code, cb));
                        }
                    }
                    Ok(WaitStatus::Signaled(_, signal, _)) => {
                        if let Some(cb) = processes.remove(&pid) {
                            exited.push((pid, 128 + signal as i32, cb));
                        }
                    }
                    Ok(_) => {}
                    Err(Errno::ECHILD) => {
                        tracing::debug!(pid, "Dropping tracked pid that is not a child");
                        processes.remove(&pid);
                    }
                    Err(e) => {
                        tracing::warn!(pid, error = %e, "waitpid failed");
                    }
                }
            }
        }

        let reaped = exited.len();
        for (pid, status, on_exit) in exited {
            tracing::debug!(pid, status, "Reaped child process");
            on_exit(status);
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn reap_until(tracker: &ProcessTracker, deadline: Duration) {
        let start = Instant::now();
        while tracker.tracked_count() > 0 && start.elapsed() < deadline {
            tracker.notify_sigchld();
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_reaps_exited_child_and_reports_code() {
        let child = Command::new("/bin/sh")
            .args(["-c", "exit 7"])
            .spawn()
            .unwrap();
        let pid = child.id();

        let tracker = ProcessTracker::new();
        let (tx, rx) = mpsc::channel();
        tracker.add_process(pid, move |status| {
            tx.send(status).unwrap();
        });

        reap_until(&tracker, Duration::from_secs(5));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn test_running_child_is_kept() {
        let mut child = Command::new("/bin/sleep").arg("5").spawn().unwrap();

        let tracker = ProcessTracker::new();
        tracker.add_process(child.id(), |_| {});
        assert_eq!(tracker.notify_sigchld(), 0);
        assert_eq!(tracker.tracked_count(), 1);

        child.kill().unwrap();
        reap_until(&tracker, Duration::from_secs(5));
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn test_non_child_pid_is_dropped() {
        let tracker = ProcessTracker::new();
        let called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = called.clone();
        // pid 1 is never our child
        tracker.add_process(1, move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        assert_eq!(tracker.notify_sigchld(), 0);
        assert_eq!(tracker.tracked_count(), 0);
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }
}
