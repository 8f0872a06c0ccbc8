//! Child process supervision.
//!
//! A [`ProcessSupervisor`] starts the OS process behind a console process and
//! hands back a [`RunningProcess`]: an operations handle for writing input,
//! signalling and resizing, plus a stream of [`ProcessEvent`]s produced by
//! background I/O threads. The owning console process drains that stream on
//! every poll, so all state changes happen on the polling side.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

/// Buffer size for reading child output.
const READ_BUFFER_SIZE: usize = 4096;

/// How long exit reporting waits for the reader to drain remaining output.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Default interval between subprocess/cwd checks.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Shell used for command strings.
const COMMAND_SHELL: &str = "/bin/sh";

/// Something that happened to a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Output from stdout (and stderr, which is interleaved).
    Output(String),
    /// The process exited with this status.
    Exit(i32),
    /// Whether the process has child processes changed.
    HasSubprocs(bool),
    /// The process' working directory changed.
    Cwd(PathBuf),
}

/// Operations on a running process.
pub trait ProcessOperations: Send {
    /// Writes text to the process' stdin.
    fn write_to_stdin(&mut self, text: &str) -> io::Result<()>;

    /// Sends ^C through the terminal, reaching the foreground job.
    fn pty_interrupt(&mut self) -> io::Result<()>;

    /// Resizes the terminal.
    fn pty_set_size(&mut self, cols: u16, rows: u16) -> io::Result<()>;

    /// Sends SIGINT to the process itself.
    fn interrupt(&mut self) -> io::Result<()>;

    /// Terminates the process.
    fn terminate(&mut self) -> io::Result<()>;

    /// OS process id, when known.
    fn pid(&self) -> Option<u32>;
}

/// A started process.
pub struct RunningProcess {
    /// Operations handle.
    pub operations: Box<dyn ProcessOperations>,
    /// Events from the process' I/O threads.
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

/// How to start a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Variables added to (or replacing) the server's environment.
    pub environment: Vec<(String, String)>,
    /// Working directory; the server's when unset.
    pub working_dir: Option<PathBuf>,
    /// Run under a pseudoterminal rather than pipes.
    pub pseudoterminal: bool,
    /// Terminal width.
    pub cols: u16,
    /// Terminal height.
    pub rows: u16,
    /// The terminal echoes and renders escape sequences itself.
    pub smart_terminal: bool,
    /// Shell for interactive terminals.
    pub shell_path: PathBuf,
    /// Arguments passed to the shell.
    pub shell_args: Vec<String>,
    /// Report changes in whether the process has children.
    pub report_has_subprocs: bool,
    /// Report working directory changes.
    pub track_cwd: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            environment: Vec::new(),
            working_dir: None,
            pseudoterminal: false,
            cols: 80,
            rows: 25,
            smart_terminal: false,
            shell_path: PathBuf::from(COMMAND_SHELL),
            shell_args: Vec::new(),
            report_has_subprocs: false,
            track_cwd: false,
        }
    }
}

impl ProcessOptions {
    /// Sets an environment variable, replacing an existing entry.
    pub fn set_env(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.environment.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.environment.push((name.to_string(), value)),
        }
    }

    /// Value of an environment variable set in these options.
    pub fn env(&self, name: &str) -> Option<&str> {
        self.environment
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Starts child processes for console processes.
pub trait ProcessSupervisor: Send + Sync {
    /// Runs `command` through `/bin/sh -c`.
    fn run_command(&self, command: &str, options: &ProcessOptions) -> io::Result<RunningProcess>;

    /// Runs `program` with an explicit argument vector.
    fn run_program(
        &self,
        program: &str,
        args: &[String],
        options: &ProcessOptions,
    ) -> io::Result<RunningProcess>;

    /// Runs an interactive shell under a pseudoterminal.
    fn run_terminal(&self, options: &ProcessOptions) -> io::Result<RunningProcess>;
}

/// Supervisor backed by portable-pty for terminals and pipes otherwise.
#[derive(Debug, Clone)]
pub struct PtySupervisor {
    monitor_interval: Duration,
}

impl PtySupervisor {
    /// Creates a supervisor checking subprocesses and cwd every `monitor_interval`.
    pub fn new(monitor_interval: Duration) -> Self {
        Self { monitor_interval }
    }

    fn spawn_pty(&self, mut cmd: CommandBuilder, options: &ProcessOptions) -> io::Result<RunningProcess> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_error)?;

        for (key, value) in &options.environment {
            cmd.env(key, value);
        }
        if let Some(dir) = &options.working_dir {
            cmd.cwd(dir);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(pty_error)?;
        // our copy of the slave must close so the reader sees EOF on exit
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let writer = pair.master.take_writer().map_err(pty_error)?;
        let reader = pair.master.try_clone_reader().map_err(pty_error)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        spawn_reader(reader, tx.clone(), done_tx)?;

        let exited = Arc::new(AtomicBool::new(false));
        {
            let tx = tx.clone();
            let exited = Arc::clone(&exited);
            thread::Builder::new()
                .name("console-wait".to_string())
                .spawn(move || {
                    let code = match child.wait() {
                        Ok(status) => status.exit_code() as i32,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to wait for terminal process");
                            -1
                        }
                    };
                    exited.store(true, Ordering::SeqCst);
                    let _ = done_rx.recv_timeout(READER_DRAIN_TIMEOUT);
                    let _ = tx.send(ProcessEvent::Exit(code));
                })?;
        }

        if let Some(pid) = pid {
            if options.report_has_subprocs || options.track_cwd {
                spawn_monitor(
                    pid,
                    options.report_has_subprocs,
                    options.track_cwd,
                    tx,
                    exited,
                    self.monitor_interval,
                )?;
            }
        }

        tracing::debug!(pid = ?pid, cols = options.cols, rows = options.rows, "Spawned pty process");
        Ok(RunningProcess {
            operations: Box::new(PtyOperations {
                master: pair.master,
                writer,
                killer,
                pid,
            }),
            events: rx,
        })
    }

    fn spawn_piped(&self, mut cmd: Command, options: &ProcessOptions) -> io::Result<RunningProcess> {
        cmd.envs(options.environment.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let stdin = child.stdin.take();

        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(Box::new(stdout), tx.clone(), done_tx.clone())?;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(Box::new(stderr), tx.clone(), done_tx.clone())?;
        }
        drop(done_tx);

        thread::Builder::new()
            .name("console-wait".to_string())
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => exit_status_code(&status),
                    Err(e) => {
                        tracing::warn!(error = %e, pid, "Failed to wait for process");
                        -1
                    }
                };
                let _ = done_rx.recv_timeout(READER_DRAIN_TIMEOUT);
                let _ = tx.send(ProcessEvent::Exit(code));
            })?;

        tracing::debug!(pid, "Spawned piped process");
        Ok(RunningProcess {
            operations: Box::new(PipeOperations { stdin, pid }),
            events: rx,
        })
    }
}

impl Default for PtySupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_MONITOR_INTERVAL)
    }
}

impl ProcessSupervisor for PtySupervisor {
    fn run_command(&self, command: &str, options: &ProcessOptions) -> io::Result<RunningProcess> {
        if options.pseudoterminal {
            let mut cmd = CommandBuilder::new(COMMAND_SHELL);
            cmd.args(["-c", command]);
            self.spawn_pty(cmd, options)
        } else {
            let mut cmd = Command::new(COMMAND_SHELL);
            cmd.arg("-c").arg(command);
            self.spawn_piped(cmd, options)
        }
    }

    fn run_program(
        &self,
        program: &str,
        args: &[String],
        options: &ProcessOptions,
    ) -> io::Result<RunningProcess> {
        if options.pseudoterminal {
            let mut cmd = CommandBuilder::new(program);
            cmd.args(args);
            self.spawn_pty(cmd, options)
        } else {
            let mut cmd = Command::new(program);
            cmd.args(args);
            self.spawn_piped(cmd, options)
        }
    }

    fn run_terminal(&self, options: &ProcessOptions) -> io::Result<RunningProcess> {
        let mut cmd = CommandBuilder::new(&options.shell_path);
        cmd.args(&options.shell_args);
        self.spawn_pty(cmd, options)
    }
}

struct PtyOperations {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl ProcessOperations for PtyOperations {
    fn write_to_stdin(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()
    }

    fn pty_interrupt(&mut self) -> io::Result<()> {
        self.writer.write_all(&[0x03])?;
        self.writer.flush()
    }

    fn pty_set_size(&mut self, cols: u16, rows: u16) -> io::Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_error)
    }

    fn interrupt(&mut self) -> io::Result<()> {
        match self.pid {
            Some(pid) => signal_process(pid, Signal::SIGINT),
            None => self.pty_interrupt(),
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.killer.kill()
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

struct PipeOperations {
    stdin: Option<ChildStdin>,
    pid: u32,
}

impl ProcessOperations for PipeOperations {
    fn write_to_stdin(&mut self, text: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed"))?;
        stdin.write_all(text.as_bytes())?;
        stdin.flush()
    }

    fn pty_interrupt(&mut self) -> io::Result<()> {
        signal_process(self.pid, Signal::SIGINT)
    }

    fn pty_set_size(&mut self, _cols: u16, _rows: u16) -> io::Result<()> {
        Ok(())
    }

    fn interrupt(&mut self) -> io::Result<()> {
        signal_process(self.pid, Signal::SIGINT)
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.stdin = None;
        signal_process(self.pid, Signal::SIGTERM)
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}

fn signal_process(pid: u32, signal: Signal) -> io::Result<()> {
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from(e)),
    }
}

fn pty_error(e: anyhow::Error) -> io::Error {
    io::Error::other(e.to_string())
}

fn exit_status_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    done: std::sync::mpsc::Sender<()>,
) -> io::Result<()> {
    thread::Builder::new()
        .name("console-read".to_string())
        .spawn(move || {
            // dropped on return, which tells the waiter the output is drained
            let _done = done;
            let mut decoder = Utf8Decoder::default();
            let mut buffer = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = decoder.decode(&buffer[..n]);
                        if !text.is_empty() && tx.send(ProcessEvent::Output(text)).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO is how a pty reports that the child side closed
                        tracing::trace!(error = %e, "Console reader finished");
                        break;
                    }
                }
            }
            let rest = decoder.finish();
            if !rest.is_empty() {
                let _ = tx.send(ProcessEvent::Output(rest));
            }
        })?;
    Ok(())
}

fn spawn_monitor(
    pid: u32,
    report_has_subprocs: bool,
    track_cwd: bool,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    exited: Arc<AtomicBool>,
    interval: Duration,
) -> io::Result<()> {
    thread::Builder::new()
        .name("console-monitor".to_string())
        .spawn(move || {
            let mut last_subprocs = None;
            let mut last_cwd: Option<PathBuf> = None;
            while !exited.load(Ordering::SeqCst) {
                if report_has_subprocs {
                    let has = has_child_processes(pid);
                    if last_subprocs != Some(has) {
                        last_subprocs = Some(has);
                        if tx.send(ProcessEvent::HasSubprocs(has)).is_err() {
                            return;
                        }
                    }
                }
                if track_cwd {
                    if let Ok(cwd) = process_cwd(pid) {
                        if last_cwd.as_ref() != Some(&cwd) {
                            last_cwd = Some(cwd.clone());
                            if tx.send(ProcessEvent::Cwd(cwd)).is_err() {
                                return;
                            }
                        }
                    }
                }
                thread::sleep(interval);
            }
        })?;
    Ok(())
}

/// Whether any process has `pid` as its parent.
#[cfg(target_os = "linux")]
pub fn has_child_processes(pid: u32) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return false;
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
        })
        .filter_map(|e| std::fs::read_to_string(e.path().join("stat")).ok())
        .any(|stat| parent_pid(&stat) == Some(pid))
}

/// Whether any process has `pid` as its parent.
#[cfg(not(target_os = "linux"))]
pub fn has_child_processes(_pid: u32) -> bool {
    false
}

/// Parent pid from the contents of `/proc/<pid>/stat`.
pub fn parent_pid(stat: &str) -> Option<u32> {
    // the command name may contain spaces and parentheses
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}

/// Working directory of `pid`.
#[cfg(target_os = "linux")]
pub fn process_cwd(pid: u32) -> io::Result<PathBuf> {
    std::fs::read_link(format!("/proc/{pid}/cwd"))
}

/// Working directory of `pid`.
#[cfg(not(target_os = "linux"))]
pub fn process_cwd(_pid: u32) -> io::Result<PathBuf> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "cwd tracking requires /proc",
    ))
}

/// Decodes a byte stream as UTF-8, holding back an incomplete trailing
/// sequence until the next read.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
