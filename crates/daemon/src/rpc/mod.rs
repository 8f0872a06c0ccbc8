//! Local JSON-RPC endpoint for the rserver daemon.
//!
//! Requests and responses are [`protocol::JsonRpcRequest`] and
//! [`protocol::JsonRpcResponse`] objects, one per line, over a Unix Domain
//! Socket. The browser-facing HTTP layer and the `rserver` CLI both talk to
//! the daemon through this socket.
//!
//! ## Socket Path
//!
//! Unless configured explicitly:
//! - Primary: `$XDG_RUNTIME_DIR/rserver/rserver.sock`
//! - Fallback: `/tmp/rserver-$UID/rserver.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::rpc::{RpcClient, get_socket_path};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = RpcClient::connect(&get_socket_path()).await?;
//!     let terminals = client.call("terminal_list", vec![]).await?;
//!     println!("{terminals}");
//!     let _ = client.call("process_set_size", vec![json!("h1"), json!(120), json!(40)]).await;
//!     Ok(())
//! }
//! ```

mod client;
pub mod pidfile;
mod server;

pub use client::RpcClient;
pub use pidfile::{get_pid_file_path, read_running_pid, remove_pid_file, write_pid_file};
pub use server::{RpcConnection, RpcError, RpcServer};

use std::path::PathBuf;

/// Get the default socket path for the RPC endpoint.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/rserver/rserver.sock`
/// 2. Otherwise: `/tmp/rserver-$UID/rserver.sock`
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("rserver").join("rserver.sock")
    } else {
        let uid = std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0);

        PathBuf::from(format!("/tmp/rserver-{}", uid)).join("rserver.sock")
    }
}

#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/rserver-unsupported/rserver.sock")
}
