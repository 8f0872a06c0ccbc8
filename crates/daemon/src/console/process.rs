//! Live console processes.
//!
//! A [`ConsoleProcess`] binds one [`ConsoleProcessInfo`] to the OS process
//! started for it. Its state is split across two locks, always taken in
//! this order: `info` (metadata, also read by RPC handlers) and `io` (the
//! input queue and the running process, also touched by websocket input).
//!
//! The process never runs on its own. The scheduler calls [`poll`], which
//! drains the events produced by the supervisor's I/O threads (output, exit,
//! subprocess and cwd changes) and then writes queued input, applies a
//! pending resize and captures the shell environment.
//!
//! [`poll`]: ConsoleProcess::poll

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use protocol::ClientEvent;
use regex::Regex;
use tokio::sync::mpsc::error::TryRecvError;

use super::env_capture::{merge_environment, EnvCapture, CAPTURE_FILE_VAR, DEFAULT_QUIET_PERIOD};
use super::info::{AutoClose, ChannelMode, ConsoleProcessInfo, InteractionMode, ShellType};
use super::input::{Input, InputQueue};
use super::storage::{trim_leading_lines, ConsoleStorage};
use super::supervisor::{ProcessEvent, ProcessOperations, ProcessOptions, ProcessSupervisor, RunningProcess};
use super::transport::{Transport, Transports};
use super::ConsoleError;
use crate::config::TerminalConfig;
use crate::events::ClientEventSink;

/// Interrupts sent without the process exiting before it is considered hung.
pub const MAX_INTERRUPTS: u32 = 3;

const ALT_BUFFER_ON: &str = "\x1b[?1049h";
const ALT_BUFFER_OFF: &str = "\x1b[?1049l";

static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\x08]").expect("control character pattern is valid"));

/// A partial line ending in a non-word character followed by spaces.
static PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)[\W_]( +)$").expect("prompt pattern is valid"));

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("ANSI escape pattern is valid")
});

/// Removes ANSI escape sequences from terminal output.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Terminal settings shared by every console process.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleSettings {
    pub default_shell: PathBuf,
    pub custom_shell: Option<PathBuf>,
    pub max_output_lines: usize,
    pub auto_close: AutoClose,
    pub input_flush_threshold: usize,
    pub track_env: bool,
    pub env_capture_interval: Duration,
    /// Idle time after a submitted line before the environment is captured.
    pub env_capture_quiet_period: Duration,
}

impl ConsoleSettings {
    pub fn from_config(config: &TerminalConfig) -> Self {
        Self {
            default_shell: PathBuf::from(&config.default_shell),
            custom_shell: config.custom_shell.as_ref().map(PathBuf::from),
            max_output_lines: config.max_output_lines,
            auto_close: config.auto_close,
            input_flush_threshold: config.input_flush_threshold,
            track_env: config.track_env,
            env_capture_interval: Duration::from_secs(config.env_capture_interval_secs),
            env_capture_quiet_period: DEFAULT_QUIET_PERIOD,
        }
    }

    /// Shell binary for a terminal of `shell_type`.
    ///
    /// Shells that do not exist on this platform fall back to the default.
    pub fn shell_path(&self, shell_type: ShellType) -> PathBuf {
        let lookup = |name: &str| which::which(name).ok();
        match shell_type {
            ShellType::PosixBash => lookup("bash"),
            ShellType::PosixZsh => lookup("zsh"),
            ShellType::Custom => self.custom_shell.clone(),
            _ => None,
        }
        .unwrap_or_else(|| self.default_shell.clone())
    }
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            default_shell: PathBuf::from("/bin/sh"),
            custom_shell: None,
            max_output_lines: super::info::DEFAULT_MAX_OUTPUT_LINES,
            auto_close: AutoClose::Always,
            input_flush_threshold: super::input::DEFAULT_FLUSH_THRESHOLD,
            track_env: false,
            env_capture_interval: Duration::from_secs(15),
            env_capture_quiet_period: DEFAULT_QUIET_PERIOD,
        }
    }
}

/// Collaborators shared by every console process.
pub struct ConsoleServices {
    pub supervisor: Arc<dyn ProcessSupervisor>,
    pub storage: ConsoleStorage,
    pub events: Arc<dyn ClientEventSink>,
    pub transports: Transports,
    pub settings: ConsoleSettings,
}

/// What a console process runs when started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnMode {
    /// A command line run through `/bin/sh -c`.
    Command(String),
    /// A program with an explicit argument vector.
    Program { program: String, args: Vec<String> },
    /// An interactive shell.
    Terminal,
}

/// Reply of a prompt handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResponse {
    /// Let the client answer the prompt.
    NotHandled,
    /// Answer the prompt with this input.
    Input(Input),
    /// Terminate the process.
    Cancel,
}

/// Inspects prompts before they are forwarded to the client.
pub type PromptHandler = Box<dyn Fn(&str) -> PromptResponse + Send + Sync>;

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Nothing is running.
    Idle,
    /// The process is running.
    Running,
    /// The process exited during this poll.
    Exited(i32),
    /// The process ignored repeated interrupts; input is no longer written.
    Unresponsive,
}

struct IoState {
    queue: InputQueue,
    running: Option<RunningProcess>,
    env_capture: EnvCapture,
    pending_resize: Option<(u16, u16)>,
}

/// A console process: a terminal tab or a modal command.
pub struct ConsoleProcess {
    handle: String,
    services: Arc<ConsoleServices>,
    spawn: Option<SpawnMode>,
    options: ProcessOptions,
    info: Mutex<ConsoleProcessInfo>,
    io: Mutex<IoState>,
    interrupt_count: AtomicU32,
    interrupt_child: AtomicBool,
    pid: AtomicU32,
    transport: RwLock<Arc<dyn Transport>>,
    prompt_handler: RwLock<Option<PromptHandler>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConsoleProcess {
    /// Creates a process that is not yet started.
    ///
    /// `spawn` is `None` for entries restored from the index whose command is
    /// not known; such a process can be inspected but not started. A handle
    /// is generated when `info` has none. Interactive processes and
    /// terminals run under a pseudoterminal.
    pub fn new(
        services: Arc<ConsoleServices>,
        spawn: Option<SpawnMode>,
        mut options: ProcessOptions,
        mut info: ConsoleProcessInfo,
    ) -> Arc<Self> {
        if info.handle.is_empty() {
            info.handle = uuid::Uuid::new_v4().simple().to_string();
        }

        let terminal = matches!(spawn, Some(SpawnMode::Terminal));
        if terminal {
            options.smart_terminal = true;
        }
        if terminal || info.is_terminal() || info.interaction_mode != InteractionMode::Never {
            options.pseudoterminal = true;
        }
        if info.is_terminal() {
            options.report_has_subprocs = true;
            options.track_cwd = true;
        }
        options.cols = info.cols;
        options.rows = info.rows;

        let (transport, channel_id) = services.transports.negotiate(&info.handle);
        info.channel_mode = transport.mode();
        info.channel_id = channel_id;

        let settings = &services.settings;
        let io = IoState {
            queue: InputQueue::new(settings.input_flush_threshold),
            running: None,
            env_capture: new_env_capture(settings),
            pending_resize: None,
        };

        Arc::new(Self {
            handle: info.handle.clone(),
            spawn,
            options,
            info: Mutex::new(info),
            io: Mutex::new(io),
            interrupt_count: AtomicU32::new(0),
            interrupt_child: AtomicBool::new(false),
            pid: AtomicU32::new(0),
            transport: RwLock::new(transport),
            prompt_handler: RwLock::new(None),
            services,
        })
    }

    /// Stable handle of the process slot.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// A copy of the current metadata.
    pub fn info(&self) -> ConsoleProcessInfo {
        lock(&self.info).clone()
    }

    /// Spawn mode, if the process can be started.
    pub fn spawn_mode(&self) -> Option<&SpawnMode> {
        self.spawn.as_ref()
    }

    pub fn caption(&self) -> String {
        lock(&self.info).caption.clone()
    }

    /// Renames the process. Caption uniqueness is the table's concern.
    pub fn set_caption(&self, caption: &str) {
        lock(&self.info).caption = caption.to_string();
    }

    pub fn title(&self) -> String {
        lock(&self.info).title.clone()
    }

    pub fn set_title(&self, title: &str) {
        lock(&self.info).title = title.to_string();
    }

    pub fn terminal_sequence(&self) -> i32 {
        lock(&self.info).terminal_sequence
    }

    pub fn is_terminal(&self) -> bool {
        lock(&self.info).is_terminal()
    }

    pub fn is_started(&self) -> bool {
        lock(&self.info).started
    }

    pub fn is_zombie(&self) -> bool {
        lock(&self.info).zombie
    }

    pub fn set_zombie(&self) {
        let mut info = lock(&self.info);
        info.zombie = true;
        info.started = false;
        info.has_child_procs = false;
    }

    pub fn exit_code(&self) -> Option<i32> {
        lock(&self.info).exit_code
    }

    pub fn allow_restart(&self) -> bool {
        lock(&self.info).allow_restart
    }

    /// Whether the shell has child processes.
    pub fn is_busy(&self) -> bool {
        lock(&self.info).has_child_procs
    }

    /// Clears the busy flag; restored entries have no live children.
    pub fn set_not_busy(&self) {
        lock(&self.info).has_child_procs = false;
    }

    pub fn was_restarted(&self) -> bool {
        lock(&self.info).restarted
    }

    pub fn set_restarted(&self, restarted: bool) {
        lock(&self.info).restarted = restarted;
    }

    pub fn channel_mode(&self) -> ChannelMode {
        lock(&self.info).channel_mode
    }

    /// OS pid of the running process.
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Installs a handler consulted before prompts reach the client.
    pub fn set_prompt_handler(&self, handler: PromptHandler) {
        *self
            .prompt_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Starts the OS process. Does nothing when already started or a zombie.
    pub fn start(&self) -> Result<(), ConsoleError> {
        let mut info = lock(&self.info);
        if info.started || info.zombie {
            return Ok(());
        }
        let spawn = self
            .spawn
            .as_ref()
            .ok_or_else(|| ConsoleError::NotRestartable(self.handle.clone()))?;

        let mut options = self.options.clone();
        options.cols = info.cols;
        options.rows = info.rows;
        if info.is_terminal() && info.track_env {
            match self.services.storage.load_env(&self.handle) {
                Ok(saved) if !saved.is_empty() => {
                    tracing::debug!(handle = %self.handle, vars = saved.len(), "Restoring saved shell environment");
                    options.environment = merge_environment(&options.environment, &saved);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(handle = %self.handle, error = %e, "Ignoring unreadable saved environment"),
            }
            let dump = self.services.storage.env_dump_path(&self.handle);
            options.set_env(CAPTURE_FILE_VAR, dump.to_string_lossy());
        }
        if options.pseudoterminal {
            let term = if options.smart_terminal {
                "xterm-256color"
            } else {
                "dumb"
            };
            options.set_env("TERM", term);
        }

        let supervisor = &self.services.supervisor;
        let running = match spawn {
            SpawnMode::Command(command) => supervisor.run_command(command, &options),
            SpawnMode::Program { program, args } => supervisor.run_program(program, args, &options),
            SpawnMode::Terminal => supervisor.run_terminal(&options),
        }
        .map_err(|source| ConsoleError::Spawn {
            handle: self.handle.clone(),
            source,
        })?;

        self.pid
            .store(running.operations.pid().unwrap_or(0), Ordering::SeqCst);
        self.interrupt_count.store(0, Ordering::SeqCst);
        self.interrupt_child.store(false, Ordering::SeqCst);

        let mut io = lock(&self.io);
        io.running = Some(running);
        io.pending_resize = None;
        io.env_capture = new_env_capture(&self.services.settings);
        drop(io);

        info.started = true;
        info.exit_code = None;
        tracing::info!(
            handle = %self.handle,
            caption = %info.caption,
            pid = ?self.pid(),
            channel = %info.channel_mode,
            "Console process started"
        );
        Ok(())
    }

    /// Queues input for the next poll.
    pub fn enque_input(&self, input: Input) {
        lock(&self.io).queue.enque(input);
    }

    /// Writes input typed into a websocket terminal straight to the process.
    pub fn on_received_input(&self, text: &str) {
        let echo = {
            let mut io = lock(&self.io);
            let IoState {
                queue,
                running,
                env_capture,
                ..
            } = &mut *io;
            queue.enque(Input::text(text, false));
            match running.as_mut() {
                Some(running) => {
                    let inputs = queue.drain_ready();
                    for input in &inputs {
                        env_capture.on_input(&input.text);
                    }
                    write_inputs(
                        running.operations.as_mut(),
                        inputs,
                        self.options.smart_terminal,
                        &self.handle,
                    )
                }
                // applied once the process starts
                None => return,
            }
        };
        self.append_echo(&echo);
    }

    /// Sends SIGINT to the process.
    pub fn interrupt(&self) {
        let count = self.interrupt_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut io = lock(&self.io);
        if let Some(running) = io.running.as_mut() {
            if let Err(e) = running.operations.interrupt() {
                tracing::warn!(handle = %self.handle, error = %e, "Failed to interrupt process");
            }
        }
        if count == MAX_INTERRUPTS {
            tracing::warn!(
                handle = %self.handle,
                interrupts = count,
                "Process is not responding to interrupts, no longer writing input"
            );
        }
    }

    /// Requests a terminal-level ^C at the next poll.
    pub fn interrupt_child(&self) {
        self.interrupt_child.store(true, Ordering::SeqCst);
    }

    /// Records a new terminal size, applied at the next poll.
    pub fn resize(&self, cols: u16, rows: u16) {
        {
            let mut info = lock(&self.info);
            info.cols = cols;
            info.rows = rows;
        }
        lock(&self.io).pending_resize = Some((cols, rows));
    }

    /// Terminates the running process, if any.
    pub fn terminate(&self) {
        let mut io = lock(&self.io);
        if let Some(running) = io.running.as_mut() {
            if let Err(e) = running.operations.terminate() {
                tracing::warn!(handle = %self.handle, error = %e, "Failed to terminate process");
            }
        }
    }

    /// Switches output delivery to RPC events.
    pub fn use_rpc(&self) {
        let rpc = self.services.transports.rpc();
        {
            let mut info = lock(&self.info);
            info.channel_mode = ChannelMode::Rpc;
            info.channel_id.clear();
        }
        *self.transport.write().unwrap_or_else(PoisonError::into_inner) = rpc;
        tracing::debug!(handle = %self.handle, "Console process downgraded to RPC channel");
    }

    /// Marks a restartable process as not started so it restarts on resume.
    pub fn on_suspend(&self) {
        let mut info = lock(&self.info);
        if info.started && info.allow_restart {
            info.started = false;
        }
    }

    /// Saved output: the log of a terminal or the buffer of a modal process.
    pub fn saved_buffer(&self) -> String {
        let info = lock(&self.info);
        if !info.is_terminal() {
            return info.output_buffer.buffered_output();
        }
        drop(info);
        self.services
            .storage
            .read_log(&self.handle)
            .unwrap_or_else(|e| {
                tracing::warn!(handle = %self.handle, error = %e, "Failed to read terminal log");
                String::new()
            })
    }

    /// Chunk `chunk` of the saved output and whether more follow.
    pub fn saved_buffer_chunk(&self, chunk: usize) -> Result<(String, bool), ConsoleError> {
        let info = lock(&self.info);
        if !info.is_terminal() {
            let buffer = if chunk == 0 {
                info.output_buffer.buffered_output()
            } else {
                String::new()
            };
            return Ok((buffer, false));
        }
        drop(info);
        Ok(self.services.storage.log_chunk(&self.handle, chunk)?)
    }

    /// Number of lines of saved output.
    pub fn buffer_line_count(&self) -> usize {
        self.saved_buffer().lines().count()
    }

    /// Erases the saved output, or all of it but the last line.
    pub fn delete_log_file(&self, last_line_only: bool) -> Result<(), ConsoleError> {
        let mut info = lock(&self.info);
        if !info.is_terminal() {
            if last_line_only {
                info.output_buffer.keep_last_line();
            } else {
                info.output_buffer.clear();
            }
            return Ok(());
        }
        drop(info);
        Ok(self.services.storage.delete_log(&self.handle, last_line_only)?)
    }

    /// Deletes the saved shell environment.
    pub fn delete_env_file(&self) -> Result<(), ConsoleError> {
        Ok(self.services.storage.delete_env(&self.handle)?)
    }

    /// Processes pending events and writes queued input.
    pub fn poll(&self) -> PollStatus {
        let mut events = Vec::new();
        let mut disconnected = false;
        {
            let mut io = lock(&self.io);
            let Some(running) = io.running.as_mut() else {
                return PollStatus::Idle;
            };
            loop {
                match running.events.try_recv() {
                    Ok(event) => events.push(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }
        }

        for event in events {
            match event {
                ProcessEvent::Output(text) => self.on_stdout(&text),
                ProcessEvent::Exit(code) => {
                    self.on_exit(code);
                    return PollStatus::Exited(code);
                }
                ProcessEvent::HasSubprocs(has) => self.on_has_subprocs(has),
                ProcessEvent::Cwd(cwd) => self.on_report_cwd(cwd),
            }
        }

        if disconnected {
            tracing::warn!(handle = %self.handle, "Process event stream closed without an exit status");
            self.on_exit(-1);
            return PollStatus::Exited(-1);
        }

        if self.on_continue() {
            PollStatus::Running
        } else {
            PollStatus::Unresponsive
        }
    }

    fn on_continue(&self) -> bool {
        if self.interrupt_count.load(Ordering::SeqCst) >= MAX_INTERRUPTS {
            return false;
        }

        let (busy, track_env) = {
            let info = lock(&self.info);
            (info.has_child_procs, info.track_env && info.is_terminal())
        };

        let dump_path = track_env.then(|| self.services.storage.env_dump_path(&self.handle));
        let mut captured = None;
        let echo = {
            let mut io = lock(&self.io);
            let IoState {
                queue,
                running,
                env_capture,
                pending_resize,
            } = &mut *io;
            let Some(running) = running.as_mut() else {
                return true;
            };
            let ops = running.operations.as_mut();

            if self.interrupt_child.swap(false, Ordering::SeqCst) {
                if let Err(e) = ops.pty_interrupt() {
                    tracing::warn!(handle = %self.handle, error = %e, "Failed to interrupt child");
                }
            }

            let inputs = queue.drain_ready();
            for input in &inputs {
                env_capture.on_input(&input.text);
            }
            let echo = write_inputs(ops, inputs, self.options.smart_terminal, &self.handle);

            if let Some(dump_path) = &dump_path {
                if let Some(command) = env_capture.begin(dump_path, busy, !queue.is_empty()) {
                    tracing::trace!(handle = %self.handle, "Capturing shell environment");
                    if let Err(e) = ops.write_to_stdin(command) {
                        tracing::debug!(handle = %self.handle, error = %e, "Failed to request environment dump");
                    }
                }
                captured = env_capture.collect();
            }

            if let Some((cols, rows)) = pending_resize.take() {
                if let Err(e) = ops.pty_set_size(cols, rows) {
                    tracing::warn!(handle = %self.handle, error = %e, "Failed to resize terminal");
                }
            }

            if let Some(pid) = ops.pid() {
                self.pid.store(pid, Ordering::SeqCst);
            }
            echo
        };

        if let Some(env) = captured {
            if let Err(e) = self.services.storage.save_env(&self.handle, &env) {
                tracing::debug!(handle = %self.handle, error = %e, "Failed to save shell environment");
            }
        }
        self.append_echo(&echo);
        true
    }

    fn on_stdout(&self, output: &str) {
        if self.options.smart_terminal {
            self.enque_output(output, false);
            return;
        }

        let posix = output.replace("\r\n", "\n");
        if posix.ends_with('\n') {
            self.enque_output(&posix, false);
            return;
        }

        match posix.rfind(|c: char| c == '\n' || c == '\x0c') {
            Some(pos) => {
                self.enque_output(&posix[..=pos], false);
                self.maybe_console_prompt(&posix[pos + 1..]);
            }
            None => self.maybe_console_prompt(&posix),
        }
    }

    fn maybe_console_prompt(&self, output: &str) {
        if output.is_empty() {
            return;
        }
        if CONTROL_CHARS.is_match(output) || !PROMPT.is_match(output) {
            self.enque_output(output, false);
        } else {
            self.handle_console_prompt(output);
        }
    }

    fn handle_console_prompt(&self, prompt: &str) {
        let response = self
            .prompt_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(PromptResponse::NotHandled, |handler| handler(prompt));

        match response {
            PromptResponse::NotHandled => {
                self.services
                    .events
                    .enque_client_event(ClientEvent::ConsoleProcessPrompt {
                        handle: self.handle.clone(),
                        prompt: prompt.to_string(),
                    });
            }
            PromptResponse::Input(input) if !input.is_empty() => self.enque_input(input),
            PromptResponse::Input(_) | PromptResponse::Cancel => {
                tracing::debug!(handle = %self.handle, "Prompt handler cancelled the process");
                self.terminate();
            }
        }
    }

    fn enque_output(&self, output: &str, error: bool) {
        if output.is_empty() {
            return;
        }
        let max_lines = {
            let mut info = lock(&self.info);
            track_alt_buffer(&mut info, output);
            self.append_to_output_buffer(&mut info, output);
            info.max_output_lines
        };

        // the client only shows so much; the full output stays in the buffer
        let trimmed = trim_leading_lines(max_lines, output);
        let transport = Arc::clone(&self.transport.read().unwrap_or_else(PoisonError::into_inner));
        transport.deliver(&self.handle, trimmed, error);
    }

    fn append_echo(&self, echo: &str) {
        if !echo.is_empty() {
            let mut info = lock(&self.info);
            self.append_to_output_buffer(&mut info, echo);
        }
    }

    fn append_to_output_buffer(&self, info: &mut ConsoleProcessInfo, text: &str) {
        if !info.is_terminal() {
            info.output_buffer.push_str(text);
            return;
        }
        if let Err(e) = self.services.storage.append_log(&self.handle, text) {
            tracing::warn!(handle = %self.handle, error = %e, "Failed to append to terminal log");
        }
    }

    fn on_exit(&self, exit_code: i32) {
        {
            let mut io = lock(&self.io);
            io.running = None;
            io.pending_resize = None;
        }
        self.pid.store(0, Ordering::SeqCst);

        let zombie = {
            let mut info = lock(&self.info);
            info.exit_code = Some(exit_code);
            info.has_child_procs = false;
            info.started = false;
            if info.is_terminal() && info.auto_close.keeps_zombie(exit_code) {
                info.zombie = true;
            }
            info.zombie
        };

        tracing::info!(handle = %self.handle, exit_code, zombie, "Console process exited");
        self.services
            .events
            .enque_client_event(ClientEvent::ConsoleProcessExit {
                handle: self.handle.clone(),
                exit_code,
            });
    }

    fn on_has_subprocs(&self, has_subprocs: bool) {
        let changed = {
            let mut info = lock(&self.info);
            let changed = info.has_child_procs != has_subprocs;
            info.has_child_procs = has_subprocs;
            changed
        };
        if changed {
            self.services
                .events
                .enque_client_event(ClientEvent::TerminalSubprocs {
                    handle: self.handle.clone(),
                    subprocs: has_subprocs,
                });
        }
    }

    fn on_report_cwd(&self, cwd: PathBuf) {
        {
            let mut info = lock(&self.info);
            if info.cwd == cwd {
                return;
            }
            info.cwd = cwd.clone();
        }
        self.services
            .events
            .enque_client_event(ClientEvent::TerminalCwd {
                handle: self.handle.clone(),
                cwd: cwd.display().to_string(),
            });
    }
}

/// Writes inputs to the process, returning the text to echo into the buffer.
fn new_env_capture(settings: &ConsoleSettings) -> EnvCapture {
    EnvCapture::new(settings.env_capture_interval, settings.env_capture_quiet_period)
}

fn write_inputs(
    ops: &mut dyn ProcessOperations,
    inputs: Vec<Input>,
    smart_terminal: bool,
    handle: &str,
) -> String {
    let mut echo = String::new();
    for input in inputs {
        if input.interrupt {
            if let Err(e) = ops.pty_interrupt() {
                tracing::warn!(handle, error = %e, "Failed to send interrupt");
            }
            if input.echo_input {
                echo.push_str("^C");
            }
            continue;
        }
        if input.text.is_empty() {
            continue;
        }

        if let Err(e) = ops.write_to_stdin(&input.text) {
            tracing::warn!(handle, error = %e, "Failed to write to stdin");
        }
        // smart terminals echo through the pty
        if !smart_terminal {
            if input.echo_input {
                echo.push_str(&input.text);
            } else {
                echo.push('\n');
            }
        }
    }
    echo
}

fn track_alt_buffer(info: &mut ConsoleProcessInfo, output: &str) {
    match (output.rfind(ALT_BUFFER_ON), output.rfind(ALT_BUFFER_OFF)) {
        (Some(on), Some(off)) => info.alt_buffer_active = on > off,
        (Some(_), None) => info.alt_buffer_active = true,
        (None, Some(_)) => info.alt_buffer_active = false,
        (None, None) => {}
    }
}
