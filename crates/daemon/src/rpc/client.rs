//! RPC client for talking to a running daemon.

use std::io;
use std::path::Path;
use std::time::Duration;

use protocol::{JsonRpcRequest, JsonRpcResponse};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::server::RpcError;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// A client for the daemon's JSON-RPC socket.
pub struct RpcClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    timeout: Duration,
    next_id: u64,
}

impl RpcClient {
    /// Connect to the daemon at the specified socket path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established, which
    /// usually means the daemon is not running.
    pub async fn connect(path: &Path) -> Result<Self, RpcError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(
            stream,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        ))
    }

    /// Connect to the daemon with a custom timeout.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, RpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| {
                RpcError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection timed out",
                ))
            })??;

        Ok(Self::from_stream(stream, timeout))
    }

    fn from_stream(stream: UnixStream, timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
            next_id: 1,
        }
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Call `method` with positional `params` and return its result.
    ///
    /// An error object in the response becomes [`RpcError::Remote`].
    pub async fn call(&mut self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.next_id;
        self.next_id += 1;
        let request = JsonRpcRequest::new(method, params).with_id(Value::from(id));
        let response = self.send(&request).await?;

        if let Some(error) = response.error {
            return Err(RpcError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send a raw request and wait for the response.
    pub async fn send(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        tokio::time::timeout(self.timeout, self.send_internal(request))
            .await
            .map_err(|_| {
                RpcError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "operation timed out",
                ))
            })?
    }

    async fn send_internal(
        &mut self,
        request: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, RpcError> {
        let mut json = serde_json::to_string(request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Err(RpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "daemon closed connection",
            )));
        }

        Ok(serde_json::from_str(line.trim())?)
    }
}
