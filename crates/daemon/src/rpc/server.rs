//! RPC server accepting newline-delimited JSON-RPC over a Unix socket.

use std::io;
use std::path::Path;

use protocol::{JsonRpcRequest, JsonRpcResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// A server that listens for RPC connections on a Unix Domain Socket.
pub struct RpcServer {
    listener: UnixListener,
}

impl RpcServer {
    /// Bind the server to the specified socket path.
    ///
    /// Missing parent directories are created and a stale socket file at
    /// `path` is removed first.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        Ok(Self { listener })
    }

    /// Accept a new incoming connection.
    pub async fn accept(&self) -> Result<RpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(RpcConnection::new(stream))
    }
}

/// A connection to an RPC client.
pub struct RpcConnection {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
}

impl RpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Read the next request from the client.
    ///
    /// Returns `None` if the client has disconnected. A line that is not a
    /// valid request yields [`RpcError::Json`]; the line is consumed, so the
    /// caller may answer with a parse error and keep reading.
    pub async fn read_request(&mut self) -> Result<Option<JsonRpcRequest>, RpcError> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                return Ok(None);
            }
            if !line.trim().is_empty() {
                break;
            }
        }

        let request = serde_json::from_str(line.trim())?;
        Ok(Some(request))
    }

    /// Send a response to the client.
    pub async fn send_response(&mut self, response: &JsonRpcResponse) -> Result<(), RpcError> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// Errors that can occur during RPC communication.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The daemon answered with an error object.
    #[error("rpc error {code}: {message}")]
    Remote { code: i32, message: String },
}
