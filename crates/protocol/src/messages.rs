//! Protocol message definitions for rserver.
//!
//! Requests arrive as JSON-RPC objects with positional `params` and optional
//! named `kwparams`. Responses carry either a `result` or an `error`. Server
//! initiated notifications are modelled as [`ClientEvent`]s which are queued
//! and fetched by the browser.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

// ============================================================================
// JSON-RPC
// ============================================================================

/// A JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Method name, e.g. `process_write_stdin`.
    pub method: String,
    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<Value>,
    /// Named parameters.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwparams: Map<String, Value>,
    /// Caller supplied correlation id, echoed in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a request with positional parameters and no id.
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            kwparams: Map::new(),
            id: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_id(mut self, id: Value) -> Self {
        self.id = Some(id);
        self
    }

    /// Parse a request from its JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Raw positional parameter.
    pub fn param(&self, index: usize) -> Result<&Value> {
        self.params
            .get(index)
            .ok_or(ProtocolError::MissingParam { index })
    }

    /// Positional string parameter.
    pub fn param_str(&self, index: usize) -> Result<&str> {
        self.param(index)?
            .as_str()
            .ok_or(ProtocolError::InvalidParam {
                index,
                expected: "a string",
            })
    }

    /// Positional integer parameter.
    pub fn param_i64(&self, index: usize) -> Result<i64> {
        self.param(index)?
            .as_i64()
            .ok_or(ProtocolError::InvalidParam {
                index,
                expected: "an integer",
            })
    }

    /// Positional boolean parameter.
    pub fn param_bool(&self, index: usize) -> Result<bool> {
        self.param(index)?
            .as_bool()
            .ok_or(ProtocolError::InvalidParam {
                index,
                expected: "a boolean",
            })
    }

    /// Positional parameter decoded into a typed object.
    pub fn param_as<T: for<'de> Deserialize<'de>>(&self, index: usize) -> Result<T> {
        let value = self.param(index)?.clone();
        serde_json::from_value(value).map_err(|_| ProtocolError::InvalidParam {
            index,
            expected: "an object of the expected shape",
        })
    }

    /// Optional positional parameter: absent or `null` yields `None`.
    pub fn opt_param_as<T: for<'de> Deserialize<'de>>(&self, index: usize) -> Result<Option<T>> {
        match self.params.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.param_as(index).map(Some),
        }
    }

    /// Named integer parameter, if present and integral.
    pub fn kwparam_i64(&self, name: &str) -> Option<i64> {
        self.kwparams.get(name).and_then(Value::as_i64)
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code, see [`ErrorCode`].
    pub code: i32,
    /// Human-readable summary.
    pub message: String,
}

impl JsonRpcError {
    /// Build an error from a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_i32(),
            message: message.into(),
        }
    }
}

/// A JSON-RPC response: exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Successful result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Echo of the request id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcResponse {
    /// Successful response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Failed response.
    pub fn failure(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Error codes for common error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Request text was not valid JSON.
    ParseError,
    /// Method name is not registered.
    MethodNotFound,
    /// Unknown handle, bad chunk index, duplicate caption or malformed params.
    InvalidArgument,
    /// Spawn, signal or I/O failure on the server.
    InternalError,
}

impl ErrorCode {
    /// Numeric code placed on the wire.
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidArgument => -32602,
            ErrorCode::InternalError => -32603,
        }
    }
}

// ============================================================================
// Terminal payloads
// ============================================================================

/// Object parameter of `process_write_stdin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WriteStdinInput {
    /// Ordering sequence; `-1` means "apply immediately", `-2` flushes.
    pub sequence: i32,
    /// Send an interrupt (^C) instead of text.
    pub interrupt: bool,
    /// Text to write.
    pub text: String,
    /// Echo the input into the output buffer.
    pub echo_input: bool,
}

/// Result of `process_get_buffer_chunk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferChunk {
    /// Chunk contents.
    pub chunk: String,
    /// Index of the chunk that was requested.
    pub chunk_number: i32,
    /// Whether a further chunk exists.
    pub more_available: bool,
}

// ============================================================================
// Client events
// ============================================================================

/// Notifications pushed to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Output produced by a console process.
    ConsoleProcessOutput {
        /// Process handle.
        handle: String,
        /// Output text, trimmed to the client line limit.
        output: String,
        /// Whether the text came from an error stream.
        error: bool,
    },
    /// A shell prompt was detected in non-terminal output.
    ConsoleProcessPrompt {
        /// Process handle.
        handle: String,
        /// The prompt text.
        prompt: String,
    },
    /// A console process exited.
    ConsoleProcessExit {
        /// Process handle.
        handle: String,
        /// Exit status.
        exit_code: i32,
    },
    /// The shell gained or lost child processes.
    TerminalSubprocs {
        /// Process handle.
        handle: String,
        /// Whether the shell has child processes.
        subprocs: bool,
    },
    /// The shell's working directory changed.
    TerminalCwd {
        /// Process handle.
        handle: String,
        /// New working directory.
        cwd: String,
    },
    /// Ask the client to open a terminal with the given caption.
    CreateNamedTerminal {
        /// Terminal caption.
        id: String,
    },
    /// Ask the client to clear a terminal's display.
    ClearTerminal {
        /// Terminal caption.
        id: String,
    },
    /// Ask the client to focus a terminal.
    ActivateTerminal {
        /// Terminal caption.
        id: String,
    },
}

impl ClientEvent {
    /// Process handle the event refers to, if it is a per-process event.
    pub fn handle(&self) -> Option<&str> {
        match self {
            ClientEvent::ConsoleProcessOutput { handle, .. }
            | ClientEvent::ConsoleProcessPrompt { handle, .. }
            | ClientEvent::ConsoleProcessExit { handle, .. }
            | ClientEvent::TerminalSubprocs { handle, .. }
            | ClientEvent::TerminalCwd { handle, .. } => Some(handle),
            ClientEvent::CreateNamedTerminal { .. }
            | ClientEvent::ClearTerminal { .. }
            | ClientEvent::ActivateTerminal { .. } => None,
        }
    }
}

/// A client event tagged with its position in the server's event queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedEvent {
    /// Monotonically increasing event id.
    pub id: u64,
    /// The event itself.
    pub event: ClientEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_from_json_defaults() {
        let req = JsonRpcRequest::from_json(r#"{"method":"process_test_exists"}"#).unwrap();
        assert_eq!(req.method, "process_test_exists");
        assert!(req.params.is_empty());
        assert!(req.kwparams.is_empty());
        assert!(req.id.is_none());
    }

    #[test]
    fn test_request_typed_params() {
        let req = JsonRpcRequest::new(
            "process_erase_buffer",
            vec![json!("h1"), json!(true), json!(-3)],
        );
        assert_eq!(req.param_str(0).unwrap(), "h1");
        assert!(req.param_bool(1).unwrap());
        assert_eq!(req.param_i64(2).unwrap(), -3);
    }

    #[test]
    fn test_request_missing_and_invalid_params() {
        let req = JsonRpcRequest::new("process_start", vec![json!(42)]);
        assert!(matches!(
            req.param_str(0),
            Err(ProtocolError::InvalidParam { index: 0, .. })
        ));
        assert!(matches!(
            req.param_str(1),
            Err(ProtocolError::MissingParam { index: 1 })
        ));
    }

    #[test]
    fn test_write_stdin_param_tolerates_missing_fields() {
        let req = JsonRpcRequest::new(
            "process_write_stdin",
            vec![json!("h1"), json!({"sequence": 4, "text": "ls\n"})],
        );
        let input: WriteStdinInput = req.param_as(1).unwrap();
        assert_eq!(input.sequence, 4);
        assert_eq!(input.text, "ls\n");
        assert!(!input.interrupt);
        assert!(!input.echo_input);
    }

    #[test]
    fn test_opt_param_null_is_none() {
        let req = JsonRpcRequest::new("launch_session", vec![json!("alice"), Value::Null]);
        let value: Option<String> = req.opt_param_as(1).unwrap();
        assert!(value.is_none());
        let value: Option<String> = req.opt_param_as(5).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_kwparam_i64() {
        let req = JsonRpcRequest::from_json(
            r#"{"method":"client_init","kwparams":{"restore_workspace":1,"name":"x"}}"#,
        )
        .unwrap();
        assert_eq!(req.kwparam_i64("restore_workspace"), Some(1));
        assert_eq!(req.kwparam_i64("name"), None);
        assert_eq!(req.kwparam_i64("run_rprofile"), None);
    }

    #[test]
    fn test_response_shape() {
        let ok = JsonRpcResponse::success(Some(json!(7)), json!(true));
        let text = serde_json::to_string(&ok).unwrap();
        assert_eq!(text, r#"{"result":true,"id":7}"#);

        let err = JsonRpcResponse::failure(
            None,
            JsonRpcError::new(ErrorCode::InvalidArgument, "unknown handle"),
        );
        assert!(err.is_error());
        let text = serde_json::to_string(&err).unwrap();
        assert_eq!(text, r#"{"error":{"code":-32602,"message":"unknown handle"}}"#);
    }

    #[test]
    fn test_client_event_wire_format() {
        let event = ClientEvent::ConsoleProcessExit {
            handle: "h1".to_string(),
            exit_code: 3,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "console_process_exit", "data": {"handle": "h1", "exit_code": 3}})
        );
        let back: ClientEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_client_event_handle() {
        let output = ClientEvent::ConsoleProcessOutput {
            handle: "abc".to_string(),
            output: "hi\n".to_string(),
            error: false,
        };
        assert_eq!(output.handle(), Some("abc"));

        let clear = ClientEvent::ClearTerminal {
            id: "Terminal 1".to_string(),
        };
        assert_eq!(clear.handle(), None);
    }
}
