//! Serializable console process metadata.
//!
//! A [`ConsoleProcessInfo`] is the part of a console process that survives a
//! server restart: identity, display settings, exit state and, for modal
//! (non-terminal) processes, the tail of their output. It is written to the
//! console index as one element of a JSON array.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Terminal sequence of a process that is not a terminal tab.
pub const NO_TERMINAL: i32 = 0;

/// Lines of output pushed to the client per event by default.
pub const DEFAULT_MAX_OUTPUT_LINES: usize = 500;

/// Characters retained in memory for modal processes.
pub const OUTPUT_BUFFER_SIZE: usize = 8192;

/// Default terminal width.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal height.
pub const DEFAULT_ROWS: u16 = 25;

/// Shell run by a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShellType {
    /// The user's default shell.
    #[default]
    Default,
    /// 32-bit Windows command prompt.
    Cmd32,
    /// 64-bit Windows command prompt.
    Cmd64,
    /// 32-bit Windows PowerShell.
    Ps32,
    /// 64-bit Windows PowerShell.
    Ps64,
    /// PowerShell Core.
    PsCore,
    /// Git for Windows bash.
    GitBash,
    /// Bash under WSL.
    WslBash,
    /// Bash.
    PosixBash,
    /// Zsh.
    PosixZsh,
    /// A user-configured shell.
    Custom,
    /// No shell; the process runs a command or program directly.
    NoShell,
}

impl ShellType {
    /// Whether a restarted terminal of this type can usefully redisplay the
    /// previous session's output.
    pub fn is_reloadable(self) -> bool {
        !matches!(
            self,
            ShellType::Cmd32 | ShellType::Cmd64 | ShellType::Ps32 | ShellType::Ps64 | ShellType::PsCore
        )
    }

    /// Name reported in terminal context listings.
    pub fn name(self) -> &'static str {
        match self {
            ShellType::Default => "Default",
            ShellType::Cmd32 => "Command Prompt (32-bit)",
            ShellType::Cmd64 => "Command Prompt",
            ShellType::Ps32 => "Windows PowerShell (32-bit)",
            ShellType::Ps64 => "Windows PowerShell",
            ShellType::PsCore => "PowerShell Core",
            ShellType::GitBash => "Git Bash",
            ShellType::WslBash => "Bash (WSL)",
            ShellType::PosixBash => "Bash",
            ShellType::PosixZsh => "Zsh",
            ShellType::Custom => "Custom",
            ShellType::NoShell => "User command",
        }
    }
}

/// Transport carrying terminal I/O to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// Output is queued as client events and input arrives over JSON-RPC.
    #[default]
    Rpc,
    /// Output and input flow over a websocket connection.
    Websocket,
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelMode::Rpc => write!(f, "rpc"),
            ChannelMode::Websocket => write!(f, "websocket"),
        }
    }
}

/// Whether a process may prompt the user for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Never interactive.
    #[default]
    Never,
    /// May prompt (e.g. for a password).
    Possible,
    /// Always interactive.
    Always,
}

/// What happens to a terminal whose process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutoClose {
    /// Close the terminal whatever the exit code.
    #[default]
    Always,
    /// Keep the terminal as a zombie so its output stays visible.
    Never,
    /// Close on exit code 0, keep as a zombie otherwise.
    CleanExit,
}

impl AutoClose {
    /// Whether a process exiting with `exit_code` becomes a zombie.
    pub fn keeps_zombie(self, exit_code: i32) -> bool {
        match self {
            AutoClose::Always => false,
            AutoClose::Never => true,
            AutoClose::CleanExit => exit_code != 0,
        }
    }
}

/// Fixed-size character ring holding recent modal output.
///
/// The ring starts with a newline so that [`buffered_output`] can always
/// skip to the first complete line, even after the oldest characters have
/// been overwritten.
///
/// [`buffered_output`]: OutputBuffer::buffered_output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    chars: VecDeque<char>,
    capacity: usize,
}

impl OutputBuffer {
    /// Creates an empty ring of `capacity` characters.
    pub fn new(capacity: usize) -> Self {
        let mut chars = VecDeque::with_capacity(capacity);
        chars.push_back('\n');
        Self {
            chars,
            capacity: capacity.max(1),
        }
    }

    /// Appends text, dropping the oldest characters when full.
    pub fn push_str(&mut self, text: &str) {
        for c in text.chars() {
            if self.chars.len() == self.capacity {
                self.chars.pop_front();
            }
            self.chars.push_back(c);
        }
    }

    /// Retained output starting at the first complete line.
    ///
    /// Empty when a single line has overflowed the ring.
    pub fn buffered_output(&self) -> String {
        match self.chars.iter().position(|&c| c == '\n') {
            Some(pos) => self.chars.iter().skip(pos + 1).collect(),
            None => String::new(),
        }
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.chars.clear();
        self.chars.push_back('\n');
    }

    /// Keeps only the last line of output.
    pub fn keep_last_line(&mut self) {
        let output = self.buffered_output();
        let last = match output.trim_end_matches('\n').rfind('\n') {
            Some(pos) => output[pos + 1..].to_string(),
            None => output,
        };
        self.clear();
        self.push_str(&last);
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(OUTPUT_BUFFER_SIZE)
    }
}

impl Serialize for OutputBuffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.buffered_output())
    }
}

impl<'de> Deserialize<'de> for OutputBuffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        let mut buffer = OutputBuffer::default();
        buffer.push_str(&text);
        Ok(buffer)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_output_lines() -> usize {
    DEFAULT_MAX_OUTPUT_LINES
}

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

/// Persistent state of one console process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleProcessInfo {
    /// Stable identifier of the terminal slot.
    #[serde(default)]
    pub handle: String,
    /// User-visible name, unique among tracked processes.
    #[serde(default)]
    pub caption: String,
    /// Title reported by the shell.
    #[serde(default)]
    pub title: String,
    /// Runs in a modal dialog rather than a terminal tab.
    #[serde(default)]
    pub dialog: bool,
    /// Bring the process to the front when it produces output.
    #[serde(default)]
    pub show_on_output: bool,
    /// Whether the process may prompt.
    #[serde(default)]
    pub interaction_mode: InteractionMode,
    /// Cap on lines per output event.
    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,
    /// Recent modal output; terminals keep theirs in a log file instead.
    #[serde(default, rename = "buffered_output")]
    pub output_buffer: OutputBuffer,
    /// Exit status once the process has exited.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Display index of a terminal tab, [`NO_TERMINAL`] otherwise.
    #[serde(default)]
    pub terminal_sequence: i32,
    /// Whether the slot may be restarted after the process exits.
    #[serde(default)]
    pub allow_restart: bool,
    /// Whether an OS process is running for this slot.
    #[serde(default)]
    pub started: bool,
    /// Whether the shell has child processes (the terminal is busy).
    #[serde(default = "default_true", alias = "childProcs")]
    pub has_child_procs: bool,
    /// Shell run by a terminal.
    #[serde(default)]
    pub shell_type: ShellType,
    /// Transport in use.
    #[serde(default)]
    pub channel_mode: ChannelMode,
    /// Transport-specific address, e.g. the websocket URL.
    #[serde(default)]
    pub channel_id: String,
    /// Whether the terminal is showing its alternate screen buffer.
    #[serde(default)]
    pub alt_buffer_active: bool,
    /// Last reported working directory.
    #[serde(default)]
    pub cwd: PathBuf,
    /// Terminal width.
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// Terminal height.
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Exited but retained so its output remains visible.
    #[serde(default)]
    pub zombie: bool,
    /// Capture and restore the shell environment across restarts.
    #[serde(default)]
    pub track_env: bool,
    /// Exit policy.
    #[serde(default)]
    pub auto_close: AutoClose,
    /// Set on a process created to replace an exited one in the same slot.
    #[serde(default)]
    pub restarted: bool,
}

impl Default for ConsoleProcessInfo {
    fn default() -> Self {
        Self {
            handle: String::new(),
            caption: String::new(),
            title: String::new(),
            dialog: false,
            show_on_output: false,
            interaction_mode: InteractionMode::Never,
            max_output_lines: DEFAULT_MAX_OUTPUT_LINES,
            output_buffer: OutputBuffer::default(),
            exit_code: None,
            terminal_sequence: NO_TERMINAL,
            allow_restart: false,
            started: false,
            has_child_procs: true,
            shell_type: ShellType::Default,
            channel_mode: ChannelMode::Rpc,
            channel_id: String::new(),
            alt_buffer_active: false,
            cwd: PathBuf::new(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            zombie: false,
            track_env: false,
            auto_close: AutoClose::Always,
            restarted: false,
        }
    }
}

impl ConsoleProcessInfo {
    /// Info for a new terminal tab.
    pub fn terminal(caption: impl Into<String>, terminal_sequence: i32) -> Self {
        Self {
            caption: caption.into(),
            terminal_sequence,
            allow_restart: true,
            interaction_mode: InteractionMode::Always,
            ..Default::default()
        }
    }

    /// Whether this is a terminal tab rather than a modal process.
    pub fn is_terminal(&self) -> bool {
        self.terminal_sequence != NO_TERMINAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_buffer_skips_partial_first_line() {
        let mut buffer = OutputBuffer::new(10);
        buffer.push_str("abc\ndef\n");
        assert_eq!(buffer.buffered_output(), "abc\ndef\n");

        // overflow so the ring starts mid-line
        buffer.push_str("gh\n");
        assert_eq!(buffer.buffered_output(), "def\ngh\n");
    }

    #[test]
    fn test_output_buffer_single_line_overflow_is_empty() {
        let mut buffer = OutputBuffer::new(4);
        buffer.push_str("abcdefgh");
        assert_eq!(buffer.buffered_output(), "");
    }

    #[test]
    fn test_output_buffer_keep_last_line() {
        let mut buffer = OutputBuffer::default();
        buffer.push_str("one\ntwo\nthree\n");
        buffer.keep_last_line();
        assert_eq!(buffer.buffered_output(), "three\n");

        buffer.clear();
        assert_eq!(buffer.buffered_output(), "");
    }

    #[test]
    fn test_reloadable_shells() {
        assert!(ShellType::PosixBash.is_reloadable());
        assert!(ShellType::Default.is_reloadable());
        assert!(!ShellType::Cmd64.is_reloadable());
        assert!(!ShellType::PsCore.is_reloadable());
    }

    #[test]
    fn test_auto_close_policy() {
        assert!(!AutoClose::Always.keeps_zombie(1));
        assert!(AutoClose::Never.keeps_zombie(0));
        assert!(AutoClose::CleanExit.keeps_zombie(2));
        assert!(!AutoClose::CleanExit.keeps_zombie(0));
    }

    #[test]
    fn test_info_json_round_trip_keeps_output_and_restarted() {
        let mut info = ConsoleProcessInfo::terminal("Terminal 1", 1);
        info.handle = "abc".to_string();
        info.output_buffer.push_str("hello\n");
        info.exit_code = Some(3);
        info.restarted = true;

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains(r#""buffered_output":"hello\n""#));
        assert!(json.contains(r#""restarted":true"#));

        let parsed: ConsoleProcessInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.handle, "abc");
        assert_eq!(parsed.output_buffer.buffered_output(), "hello\n");
        assert_eq!(parsed.exit_code, Some(3));
        assert!(parsed.restarted);
    }

    #[test]
    fn test_legacy_json_defaults() {
        let json = r#"{"handle":"h1","caption":"Build","dialog":false,
                       "buffered_output":"done\n","exit_code":null,"childProcs":false}"#;
        let info: ConsoleProcessInfo = serde_json::from_str(json).unwrap();

        assert_eq!(info.max_output_lines, DEFAULT_MAX_OUTPUT_LINES);
        assert_eq!(info.interaction_mode, InteractionMode::Never);
        assert_eq!(info.terminal_sequence, NO_TERMINAL);
        assert!(!info.show_on_output);
        assert!(!info.has_child_procs);
        assert!(!info.is_terminal());
        assert_eq!(info.output_buffer.buffered_output(), "done\n");
    }
}
