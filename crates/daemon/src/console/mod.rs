//! Console processes and terminals.
//!
//! This module contains:
//! - Sequenced input queue ([`input`])
//! - Persistent process metadata and the modal output ring ([`info`])
//! - Terminal logs, saved environments and the table index ([`storage`])
//! - Shell environment capture ([`env_capture`])
//! - Child process supervision over pipes or a pseudoterminal ([`supervisor`])
//! - RPC and websocket output transports ([`transport`])
//! - The live process wrapper ([`process`]) and its registry ([`table`])
//! - The recurring poll task ([`scheduler`])

pub mod env_capture;
pub mod info;
pub mod input;
pub mod process;
pub mod scheduler;
pub mod storage;
pub mod supervisor;
pub mod table;
pub mod transport;

use std::io;

use thiserror::Error;

pub use info::{
    AutoClose, ChannelMode, ConsoleProcessInfo, InteractionMode, OutputBuffer, ShellType,
    NO_TERMINAL,
};
pub use input::{Input, InputQueue, FLUSH_SEQUENCE, IGNORE_SEQUENCE};
pub use process::{
    strip_ansi, ConsoleProcess, ConsoleServices, ConsoleSettings, PollStatus, PromptHandler,
    PromptResponse, SpawnMode,
};
pub use scheduler::run_poll_loop;
pub use storage::ConsoleStorage;
pub use supervisor::{ProcessOptions, ProcessSupervisor, PtySupervisor};
pub use table::{ConsoleProcessTable, TerminalContext};
pub use transport::{InputHandler, Transport, Transports, WebsocketChannel};

/// Errors from console process operations.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("unknown console process handle: {0}")]
    UnknownHandle(String),

    #[error("Unknown terminal '{0}'")]
    UnknownTerminal(String),

    #[error("caption already in use: {0}")]
    DuplicateCaption(String),

    #[error("invalid buffer chunk requested: {0}")]
    InvalidChunk(i64),

    #[error("Terminal is not running and cannot accept input")]
    NotRunning,

    #[error("console process {0} cannot be restarted")]
    NotRestartable(String),

    #[error("failed to start console process {handle}: {source}")]
    Spawn {
        handle: String,
        #[source]
        source: io::Error,
    },

    #[error("console storage error: {0}")]
    Io(#[from] io::Error),

    #[error("console index error: {0}")]
    Index(#[from] serde_json::Error),
}

impl ConsoleError {
    /// Whether the error was caused by the caller's arguments.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            ConsoleError::UnknownHandle(_)
                | ConsoleError::UnknownTerminal(_)
                | ConsoleError::DuplicateCaption(_)
                | ConsoleError::InvalidChunk(_)
                | ConsoleError::NotRunning
                | ConsoleError::NotRestartable(_)
        )
    }
}
