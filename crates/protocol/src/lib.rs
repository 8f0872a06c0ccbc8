//! # rserver Protocol Library
//!
//! Wire types shared by the rserver daemon and its clients.
//!
//! ## Overview
//!
//! - **JSON-RPC envelopes**: [`JsonRpcRequest`], [`JsonRpcResponse`] and
//!   [`JsonRpcError`], with typed positional parameter extraction
//! - **Client events**: [`ClientEvent`], the fire-and-forget notifications
//!   pushed to the browser (terminal output, prompts, exits, cwd changes)
//! - **Terminal payloads**: [`WriteStdinInput`] and [`BufferChunk`]
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{JsonRpcRequest, JsonRpcResponse};
//! use serde_json::json;
//!
//! let request = JsonRpcRequest::new("process_set_size", vec![json!("h1"), json!(120), json!(40)]);
//! assert_eq!(request.param_str(0).unwrap(), "h1");
//! assert_eq!(request.param_i64(1).unwrap(), 120);
//!
//! let response = JsonRpcResponse::success(request.id.clone(), json!(true));
//! assert!(response.error.is_none());
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request, response and event definitions
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    BufferChunk, ClientEvent, ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    QueuedEvent, WriteStdinInput, PROTOCOL_VERSION,
};
