//! PID file for detecting a running daemon.
//!
//! The PID file lives at `<data_dir>/rserver.pid`. Stale files (unparsable
//! or naming a dead process) are removed when read.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Path of the PID file inside `data_dir`.
pub fn get_pid_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join("rserver.pid")
}

/// Record the current process id.
pub fn write_pid_file(data_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(data_dir)?;
    let path = get_pid_file_path(data_dir);
    fs::write(&path, std::process::id().to_string())?;
    Ok(path)
}

/// Remove the PID file, ignoring a missing file.
pub fn remove_pid_file(data_dir: &Path) {
    let path = get_pid_file_path(data_dir);
    if let Err(e) = fs::remove_file(&path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove PID file");
        }
    }
}

/// PID of the running daemon, if any.
pub fn read_running_pid(data_dir: &Path) -> Option<u32> {
    let path = get_pid_file_path(data_dir);
    let text = fs::read_to_string(&path).ok()?;

    let pid: u32 = match text.trim().parse() {
        Ok(pid) => pid,
        Err(_) => {
            cleanup_stale_pid_file(&path);
            return None;
        }
    };

    if is_process_running(pid) {
        Some(pid)
    } else {
        cleanup_stale_pid_file(&path);
        None
    }
}

fn is_process_running(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks that the process exists; EPERM means it does.
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn cleanup_stale_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::debug!(path = %path.display(), error = %e, "Could not remove stale PID file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_own_pid() {
        let dir = tempdir().unwrap();
        let path = write_pid_file(dir.path()).unwrap();
        assert!(path.exists());
        assert_eq!(read_running_pid(dir.path()), Some(std::process::id()));

        remove_pid_file(dir.path());
        assert!(!path.exists());
        assert_eq!(read_running_pid(dir.path()), None);
    }

    #[test]
    fn test_invalid_pid_file_is_cleaned_up() {
        let dir = tempdir().unwrap();
        let path = get_pid_file_path(dir.path());
        fs::write(&path, "not-a-pid").unwrap();

        assert_eq!(read_running_pid(dir.path()), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_dead_pid_is_cleaned_up() {
        let dir = tempdir().unwrap();
        let path = get_pid_file_path(dir.path());
        // Above the default pid_max, so never a live process.
        fs::write(&path, "4194304").unwrap();

        assert_eq!(read_running_pid(dir.path()), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_missing_pid_file_is_quiet() {
        let dir = tempdir().unwrap();
        remove_pid_file(dir.path());
    }
}
