//! Shell environment capture.
//!
//! A terminal's environment is captured by the shell itself: once the user
//! has submitted a command line and the shell has been idle for a short
//! while, a one-line `env` dump into a private file is written to its
//! stdin. The dump is picked up on a later poll, parsed, and saved next to
//! the terminal's log so a restarted terminal starts with the variables the
//! user had before. Capture failures are never fatal; the terminal simply
//! restarts with the default environment.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Variable naming the file a terminal's shell dumps its environment into.
pub const CAPTURE_FILE_VAR: &str = "RSERVER_ENV_FILE";

/// Written to the shell's stdin to dump its environment. The leading space
/// keeps it out of shell history; the trailing `printf` erases the echoed
/// line so the prompt is redrawn in place.
pub const CAPTURE_COMMAND: &str =
    " env>\"$RSERVER_ENV_FILE\";printf '\\033[A\\033[2K\\r'\n";

/// How long the shell must sit idle after a submitted line before capturing.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(2);

/// How long to wait for the shell to produce its dump.
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Variables that belong to the running terminal and are not restored.
const VOLATILE_VARS: &[&str] = &[
    "TERM",
    "COLUMNS",
    "LINES",
    "SHLVL",
    "_",
    "OLDPWD",
    "PWD",
    CAPTURE_FILE_VAR,
];

#[derive(Debug)]
struct PendingCapture {
    path: PathBuf,
    started: Instant,
    last_len: Option<u64>,
}

/// Capture state for one shell.
#[derive(Debug)]
pub struct EnvCapture {
    interval: Duration,
    quiet_period: Duration,
    last_capture: Option<Instant>,
    submitted_at: Option<Instant>,
    pending: Option<PendingCapture>,
}

impl EnvCapture {
    /// Captures at most once per `interval`, after `quiet_period` of idle
    /// shell following a submitted command line.
    pub fn new(interval: Duration, quiet_period: Duration) -> Self {
        Self {
            interval,
            quiet_period,
            last_capture: None,
            submitted_at: None,
            pending: None,
        }
    }

    /// Whether the rate limit allows a capture now.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_capture {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }

    /// Whether a dump has been requested and not collected yet.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Records text written to the shell.
    ///
    /// A submitted line arms the next capture; anything else means the user
    /// is typing, which disarms it.
    pub fn on_input(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if text.ends_with(['\r', '\n']) {
            self.submitted_at = Some(Instant::now());
        } else {
            self.submitted_at = None;
        }
    }

    /// Starts a capture into `file` when one is armed, due, and the shell is
    /// idle with no input waiting. Returns the command to write to stdin.
    pub fn begin(&mut self, file: &Path, shell_busy: bool, input_waiting: bool) -> Option<&'static str> {
        let now = Instant::now();
        let submitted = self.submitted_at?;
        if self.pending.is_some()
            || shell_busy
            || input_waiting
            || now.duration_since(submitted) < self.quiet_period
            || !self.is_due(now)
        {
            return None;
        }

        if let Err(e) = remove_if_exists(file) {
            tracing::trace!(file = %file.display(), error = %e, "Could not clear previous environment dump");
        }
        self.submitted_at = None;
        self.last_capture = Some(now);
        self.pending = Some(PendingCapture {
            path: file.to_path_buf(),
            started: now,
            last_len: None,
        });
        Some(CAPTURE_COMMAND)
    }

    /// Collects the shell's dump once it is complete.
    ///
    /// A dump counts as complete when its size is unchanged between two
    /// polls. The file is removed after it is read.
    pub fn collect(&mut self) -> Option<Vec<(String, String)>> {
        let pending = self.pending.as_mut()?;
        let len = match fs::metadata(&pending.path) {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::trace!(error = %e, "Environment dump unreadable");
                None
            }
        };

        let stable = matches!((len, pending.last_len), (Some(now), Some(before)) if now > 0 && now == before);
        if !stable {
            if pending.started.elapsed() >= CAPTURE_TIMEOUT {
                tracing::debug!(file = %pending.path.display(), "Shell did not dump its environment, giving up");
                let _ = remove_if_exists(&pending.path);
                self.pending = None;
            } else {
                pending.last_len = len;
            }
            return None;
        }

        let path = pending.path.clone();
        self.pending = None;
        let result = fs::read(&path);
        let _ = remove_if_exists(&path);
        match result {
            Ok(raw) => Some(parse_env_dump(&String::from_utf8_lossy(&raw))),
            Err(e) => {
                tracing::trace!(error = %e, "Environment capture skipped");
                None
            }
        }
    }
}

/// Parses the output of `env`, minus volatile variables.
///
/// Lines that do not start a `NAME=` assignment continue the previous
/// value, which is how multi-line values appear in the dump.
pub fn parse_env_dump(dump: &str) -> Vec<(String, String)> {
    let mut entries: Vec<(String, String)> = Vec::new();
    for line in dump.lines() {
        match line.split_once('=') {
            Some((name, value)) if is_var_name(name) => {
                entries.push((name.to_string(), value.to_string()));
            }
            _ => {
                if let Some((_, value)) = entries.last_mut() {
                    value.push('\n');
                    value.push_str(line);
                }
            }
        }
    }
    entries.retain(|(name, _)| !VOLATILE_VARS.contains(&name.as_str()));
    entries
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Overlays `saved` onto `base`; saved values win.
pub fn merge_environment(
    base: &[(String, String)],
    saved: &[(String, String)],
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = base
        .iter()
        .filter(|(k, _)| !saved.iter().any(|(s, _)| s == k))
        .cloned()
        .collect();
    merged.extend(saved.iter().cloned());
    merged
}
