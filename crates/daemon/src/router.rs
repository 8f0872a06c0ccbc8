//! JSON-RPC method dispatch.
//!
//! [`RpcRouter`] receives decoded [`JsonRpcRequest`]s from the RPC socket and
//! routes them to the console process table or the session manager by
//! method name. Every failure is turned into a JSON-RPC error object; no
//! error escapes to the connection loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use protocol::{
    BufferChunk, ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ProtocolError,
    WriteStdinInput,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::console::{ConsoleError, ConsoleProcessInfo, ConsoleProcessTable, Input};
use crate::events::ClientEventQueue;
use crate::session::{
    LaunchError, LaunchRequest, SessionContext, SessionManager, SessionScope, WORKBENCH_RSTUDIO,
};

/// Result type for router operations.
pub type RouterResult = Result<Value, RouterError>;

/// Errors that can occur while handling a request.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Missing or mistyped parameters.
    #[error("invalid params: {0}")]
    Params(#[from] ProtocolError),

    /// Console process error.
    #[error("{0}")]
    Console(#[from] ConsoleError),

    /// Session launch error.
    #[error("{0}")]
    Launch(#[from] LaunchError),

    /// No handler is registered for the method.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// A result could not be serialized.
    #[error("internal error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The blocking worker running the request failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Stable JSON-RPC error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            RouterError::Params(_) => ErrorCode::InvalidArgument,
            RouterError::Console(e) if e.is_invalid_argument() => ErrorCode::InvalidArgument,
            RouterError::Console(_) => ErrorCode::InternalError,
            RouterError::Launch(_) => ErrorCode::InternalError,
            RouterError::MethodNotFound(_) => ErrorCode::MethodNotFound,
            RouterError::Serialize(_) | RouterError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Convert the error to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        JsonRpcError::new(self.code(), self.to_string())
    }
}

/// Daemon status returned by `server_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub console_processes: usize,
    pub terminals: usize,
    pub pending_launches: usize,
    pub launch_count: u64,
    pub tracked_sessions: usize,
    pub websocket: Option<String>,
    pub latest_event_id: u64,
}

/// Routes JSON-RPC requests to the console table and session manager.
pub struct RpcRouter {
    table: Arc<ConsoleProcessTable>,
    sessions: Arc<SessionManager>,
    events: Arc<ClientEventQueue>,
    started_at: Instant,
}

impl RpcRouter {
    /// Create a router over the daemon's components.
    pub fn new(
        table: Arc<ConsoleProcessTable>,
        sessions: Arc<SessionManager>,
        events: Arc<ClientEventQueue>,
    ) -> Self {
        Self {
            table,
            sessions,
            events,
            started_at: Instant::now(),
        }
    }

    /// Handle a request on the blocking pool and build its response.
    ///
    /// Console and launch operations spawn processes and write to disk, so
    /// they never run on the async worker threads.
    pub async fn handle(self: &Arc<Self>, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let router = Arc::clone(self);
        let result = tokio::task::spawn_blocking(move || router.route(&request))
            .await
            .unwrap_or_else(|e| Err(RouterError::Internal(e.to_string())));
        Self::respond(id, result)
    }

    /// Pair a result with the request id.
    pub fn respond(id: Option<Value>, result: RouterResult) -> JsonRpcResponse {
        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::failure(id, e.to_rpc_error()),
        }
    }

    /// Dispatch a request by method name.
    pub fn route(&self, request: &JsonRpcRequest) -> RouterResult {
        debug!(method = %request.method, params = request.params.len(), "Routing request");

        let result = match request.method.as_str() {
            // Console processes
            "process_start" => self.process_start(request),
            "process_interrupt" => self.process_interrupt(request),
            "process_interrupt_child" => self.process_interrupt_child(request),
            "process_reap" => self.process_reap(request),
            "process_write_stdin" => self.process_write_stdin(request),
            "process_set_size" => self.process_set_size(request),
            "process_set_caption" => self.process_set_caption(request),
            "process_set_title" => self.process_set_title(request),
            "process_erase_buffer" => self.process_erase_buffer(request),
            "process_get_buffer_chunk" => self.process_get_buffer_chunk(request),
            "process_get_buffer" => self.process_get_buffer(request),
            "process_use_rpc" => self.process_use_rpc(request),
            "process_test_exists" => self.process_test_exists(request),
            "process_notify_visible" => self.process_notify_visible(request),
            "process_set_zombie" => self.process_set_zombie(request),
            "start_terminal" => self.start_terminal(request),
            "get_events" => self.get_events(request),

            // Sessions
            "launch_session" => self.launch_session(request),
            "session_connected" => self.session_connected(request),
            "server_status" => self.server_status(),

            // Terminal helpers
            "terminal_list" => Ok(json!(self.table.terminal_list())),
            "terminal_create" => self.terminal_create(request),
            "terminal_context" => self.terminal_context(request),
            "terminal_buffer" => self.terminal_buffer(request),
            "terminal_busy" => self.terminal_busy(request),
            "terminal_running" => self.terminal_running(request),
            "terminal_kill" => self.terminal_kill(request),
            "terminal_visible" => Ok(json!(self.table.terminal_visible())),
            "terminal_clear" => self.terminal_clear(request),
            "terminal_send" => self.terminal_send(request),
            "terminal_activate" => self.terminal_activate(request),

            other => Err(RouterError::MethodNotFound(other.to_string())),
        };

        if let Err(e) = &result {
            warn!(method = %request.method, error = %e, "Request failed");
        }
        result
    }

    // =========================================================================
    // Console process handlers
    // =========================================================================

    fn process_start(&self, req: &JsonRpcRequest) -> RouterResult {
        let proc = self.table.get(req.param_str(0)?)?;
        proc.start()?;
        self.table.save()?;
        Ok(Value::Null)
    }

    fn process_interrupt(&self, req: &JsonRpcRequest) -> RouterResult {
        self.table.get(req.param_str(0)?)?.interrupt();
        Ok(Value::Null)
    }

    fn process_interrupt_child(&self, req: &JsonRpcRequest) -> RouterResult {
        self.table.get(req.param_str(0)?)?.interrupt_child();
        Ok(Value::Null)
    }

    fn process_reap(&self, req: &JsonRpcRequest) -> RouterResult {
        let handle = req.param_str(0)?;
        if !self.table.reap(handle) {
            return Err(ConsoleError::UnknownHandle(handle.to_string()).into());
        }
        Ok(Value::Null)
    }

    fn process_write_stdin(&self, req: &JsonRpcRequest) -> RouterResult {
        let proc = self.table.get(req.param_str(0)?)?;
        let input: WriteStdinInput = req.param_as(1)?;
        proc.enque_input(Input::from(input));
        Ok(Value::Null)
    }

    fn process_set_size(&self, req: &JsonRpcRequest) -> RouterResult {
        let proc = self.table.get(req.param_str(0)?)?;
        let cols = dimension(req, 1)?;
        let rows = dimension(req, 2)?;
        proc.resize(cols, rows);
        Ok(Value::Null)
    }

    fn process_set_caption(&self, req: &JsonRpcRequest) -> RouterResult {
        let renamed = self.table.set_caption(req.param_str(0)?, req.param_str(1)?)?;
        Ok(json!(renamed))
    }

    fn process_set_title(&self, req: &JsonRpcRequest) -> RouterResult {
        let proc = self.table.get(req.param_str(0)?)?;
        proc.set_title(req.param_str(1)?);
        self.table.save()?;
        Ok(Value::Null)
    }

    fn process_erase_buffer(&self, req: &JsonRpcRequest) -> RouterResult {
        let proc = self.table.get(req.param_str(0)?)?;
        let last_line_only = req.opt_param_as::<bool>(1)?.unwrap_or(false);
        proc.delete_log_file(last_line_only)?;
        Ok(Value::Null)
    }

    fn process_get_buffer_chunk(&self, req: &JsonRpcRequest) -> RouterResult {
        let proc = self.table.get(req.param_str(0)?)?;
        let requested = req.param_i64(1)?;
        let index = usize::try_from(requested)
            .ok()
            .filter(|_| requested <= i64::from(i32::MAX))
            .ok_or(ConsoleError::InvalidChunk(requested))?;
        let (chunk, more_available) = proc.saved_buffer_chunk(index)?;
        Ok(serde_json::to_value(BufferChunk {
            chunk,
            chunk_number: requested as i32,
            more_available,
        })?)
    }

    fn process_get_buffer(&self, req: &JsonRpcRequest) -> RouterResult {
        let proc = self.table.get(req.param_str(0)?)?;
        let strip = req.opt_param_as::<bool>(1)?.unwrap_or(false);
        let mut chunk = proc.saved_buffer();
        if strip {
            chunk = crate::console::strip_ansi(&chunk);
        }
        Ok(serde_json::to_value(BufferChunk {
            chunk,
            chunk_number: 0,
            more_available: false,
        })?)
    }

    fn process_use_rpc(&self, req: &JsonRpcRequest) -> RouterResult {
        self.table.get(req.param_str(0)?)?.use_rpc();
        Ok(Value::Null)
    }

    fn process_test_exists(&self, req: &JsonRpcRequest) -> RouterResult {
        let exists = self.table.find_by_handle(req.param_str(0)?).is_some();
        Ok(json!(exists))
    }

    fn process_notify_visible(&self, req: &JsonRpcRequest) -> RouterResult {
        let handle: Option<String> = req.opt_param_as(0)?;
        self.table.set_visible(handle.as_deref())?;
        Ok(Value::Null)
    }

    fn process_set_zombie(&self, req: &JsonRpcRequest) -> RouterResult {
        self.table.get(req.param_str(0)?)?.set_zombie();
        self.table.save()?;
        Ok(Value::Null)
    }

    fn start_terminal(&self, req: &JsonRpcRequest) -> RouterResult {
        let info: ConsoleProcessInfo = req.param_as(0)?;
        let proc = self.table.start_terminal(info)?;
        Ok(serde_json::to_value(proc.info())?)
    }

    fn get_events(&self, req: &JsonRpcRequest) -> RouterResult {
        let last_id = req.opt_param_as::<u64>(0)?.unwrap_or(0);
        Ok(serde_json::to_value(self.events.events_since(last_id))?)
    }

    // =========================================================================
    // Session handlers
    // =========================================================================

    fn launch_session(&self, req: &JsonRpcRequest) -> RouterResult {
        let username = req.param_str(0)?;
        let mut scope: SessionScope = req.opt_param_as(1)?.unwrap_or_default();
        if scope.workbench.is_empty() {
            scope.workbench = WORKBENCH_RSTUDIO.to_string();
        }
        let request: LaunchRequest = req.opt_param_as(2)?.unwrap_or_default();
        let environment: Vec<(String, String)> = req
            .opt_param_as::<BTreeMap<String, String>>(3)?
            .unwrap_or_default()
            .into_iter()
            .collect();
        let open_file: Option<String> = req.opt_param_as(4)?;

        let context = SessionContext::new(username, scope);
        let launched = self.sessions.launch_session(
            &context,
            &request,
            &environment,
            open_file.as_deref(),
        )?;
        Ok(json!({ "launched": launched }))
    }

    fn session_connected(&self, req: &JsonRpcRequest) -> RouterResult {
        let username = req.param_str(0)?;
        let session_id = req.param_str(1)?;
        let success = req.opt_param_as::<bool>(2)?.unwrap_or(true);
        let error_msg: String = req.opt_param_as(3)?.unwrap_or_default();
        self.sessions
            .remove_pending_session_launch(username, session_id, success, &error_msg);
        Ok(Value::Null)
    }

    fn server_status(&self) -> RouterResult {
        let status = ServerStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            console_processes: self.table.len(),
            terminals: self.table.terminal_list().len(),
            pending_launches: self.sessions.pending_launch_count(),
            launch_count: self.sessions.launch_count(),
            tracked_sessions: self.sessions.process_tracker().tracked_count(),
            websocket: self
                .table
                .services()
                .transports
                .websocket()
                .map(|ws| ws.local_addr().to_string()),
            latest_event_id: self.events.latest_id(),
        };
        Ok(serde_json::to_value(status)?)
    }

    // =========================================================================
    // Terminal helpers
    // =========================================================================

    fn terminal_create(&self, req: &JsonRpcRequest) -> RouterResult {
        let caption: Option<String> = req.opt_param_as(0)?;
        Ok(json!(self.table.terminal_create(caption.as_deref())?))
    }

    fn terminal_context(&self, req: &JsonRpcRequest) -> RouterResult {
        Ok(serde_json::to_value(
            self.table.terminal_context(req.param_str(0)?)?,
        )?)
    }

    fn terminal_buffer(&self, req: &JsonRpcRequest) -> RouterResult {
        let strip = req.opt_param_as::<bool>(1)?.unwrap_or(false);
        Ok(json!(self.table.terminal_buffer(req.param_str(0)?, strip)?))
    }

    fn terminal_busy(&self, req: &JsonRpcRequest) -> RouterResult {
        let captions: Vec<String> = req.param_as(0)?;
        Ok(json!(self.table.terminal_busy(&captions)))
    }

    fn terminal_running(&self, req: &JsonRpcRequest) -> RouterResult {
        let captions: Vec<String> = req.param_as(0)?;
        Ok(json!(self.table.terminal_running(&captions)))
    }

    fn terminal_kill(&self, req: &JsonRpcRequest) -> RouterResult {
        let captions: Vec<String> = req.param_as(0)?;
        self.table.terminal_kill(&captions)?;
        Ok(Value::Null)
    }

    fn terminal_clear(&self, req: &JsonRpcRequest) -> RouterResult {
        self.table.terminal_clear(req.param_str(0)?)?;
        Ok(Value::Null)
    }

    fn terminal_send(&self, req: &JsonRpcRequest) -> RouterResult {
        self.table.terminal_send(req.param_str(0)?, req.param_str(1)?)?;
        Ok(Value::Null)
    }

    fn terminal_activate(&self, req: &JsonRpcRequest) -> RouterResult {
        let caption: Option<String> = req.opt_param_as(0)?;
        let show = req.opt_param_as::<bool>(1)?.unwrap_or(true);
        self.table.terminal_activate(caption.as_deref(), show)?;
        Ok(Value::Null)
    }
}

/// Positive terminal dimension at `index`.
fn dimension(req: &JsonRpcRequest, index: usize) -> Result<u16, ProtocolError> {
    let value = req.param_i64(index)?;
    u16::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or(ProtocolError::InvalidParam {
            index,
            expected: "a positive terminal dimension",
        })
}
