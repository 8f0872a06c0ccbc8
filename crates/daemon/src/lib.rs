//! # rserver Daemon Library
//!
//! This crate provides the server side of rserver: it launches user
//! sessions on demand and hosts the terminals and console processes those
//! sessions show in the browser.
//!
//! ## Overview
//!
//! - **Session Launching**: Collapse duplicate launch requests, build the
//!   session command line and environment, spawn and reap session processes
//! - **Console Processes**: Run terminals and modal commands under a
//!   pseudoterminal or pipes, with sequenced input and persisted output
//! - **Transports**: Deliver output as queued client events or over a
//!   per-terminal websocket
//! - **RPC**: Newline-delimited JSON-RPC over a Unix socket
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Daemon Orchestrator                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │   Session    │  │ Console Process  │  │   Client Event   │  │
//! │  │   Manager    │  │      Table       │  │      Queue       │  │
//! │  └──────────────┘  └──────────────────┘  └──────────────────┘  │
//! │                                                                  │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                      RPC Router                            │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │                                                                  │
//! │  ┌───────────────────┐  ┌───────────────────────────────────┐  │
//! │  │  RPC Unix Socket  │  │       Terminal Websocket          │  │
//! │  └───────────────────┘  └───────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let orchestrator = DaemonOrchestrator::new(config).await?;
//!     orchestrator.start().await?;
//!
//!     // Serving until a shutdown signal...
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`events`]: Client event queue
//! - [`session`]: Session launch management and process tracking
//! - [`console`]: Console processes, terminals and their persistence
//! - [`rpc`]: JSON-RPC socket server and client
//! - [`router`]: JSON-RPC method dispatch
//! - [`orchestrator`]: Main daemon coordinator

pub mod config;
pub mod console;
pub mod events;
pub mod orchestrator;
pub mod router;
pub mod rpc;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export event types for convenience
pub use events::{ClientEventQueue, ClientEventSink};

// Re-export session types for convenience
pub use session::{
    LaunchError, LaunchRequest, ProcessTracker, SessionContext, SessionLaunchProfile,
    SessionManager, SessionScope,
};

// Re-export console types for convenience
pub use console::{
    ConsoleError, ConsoleProcess, ConsoleProcessInfo, ConsoleProcessTable, WebsocketChannel,
};

// Re-export RPC types for convenience
pub use router::{RouterError, RouterResult, RpcRouter};
pub use rpc::{RpcClient, RpcError, RpcServer};

// Re-export orchestrator types for convenience
pub use orchestrator::{DaemonOrchestrator, OrchestratorEvent, OrchestratorState};
