//! Daemon orchestrator for wiring together all components.
//!
//! [`DaemonOrchestrator`] owns the client event queue, the session manager,
//! the console process table and its transports, and the JSON-RPC router.
//! Starting it restores saved terminals and spawns the background tasks: the
//! RPC accept loop, the terminal websocket, the console poll loop, SIGCHLD
//! forwarding and stale launch cleanup.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{ErrorCode, JsonRpcError, JsonRpcResponse};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::console::{
    run_poll_loop, ConsoleProcessTable, ConsoleServices, ConsoleSettings, ConsoleStorage,
    PtySupervisor, Transports, WebsocketChannel,
};
use crate::events::ClientEventQueue;
use crate::router::RpcRouter;
use crate::rpc::{self, RpcConnection, RpcError, RpcServer};
use crate::session::SessionManager;

/// Interval between sweeps of launches that never connected.
const STALE_LAUNCH_SWEEP_INTERVAL_SECS: u64 = 60;

/// Time allowed for background tasks to finish after cancellation.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, initializing components.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// Saved terminals were restored from the console index.
    TerminalsRestored { count: usize },
    /// Error occurred.
    Error { message: String },
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Events waiting to be fetched by the browser.
    events: Arc<ClientEventQueue>,
    /// Session launch manager.
    session_manager: Arc<SessionManager>,
    /// Console processes and terminals.
    table: Arc<ConsoleProcessTable>,
    /// JSON-RPC dispatch.
    router: Arc<RpcRouter>,
    /// Terminal websocket, absent when disabled or its bind failed.
    websocket: Option<Arc<WebsocketChannel>>,
    /// Path of the JSON-RPC socket.
    socket_path: PathBuf,
    /// Background tasks.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl DaemonOrchestrator {
    /// Creates a new daemon orchestrator.
    ///
    /// Binds the terminal websocket when enabled. A failed bind is logged
    /// and every terminal then uses the RPC channel.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let socket_path = config
            .server
            .rpc_socket
            .clone()
            .unwrap_or_else(rpc::get_socket_path);

        let events = Arc::new(ClientEventQueue::new());

        let websocket = if config.terminal.websocket_enabled {
            match WebsocketChannel::bind(&config.terminal.websocket_bind).await {
                Ok(channel) => Some(Arc::new(channel)),
                Err(e) => {
                    warn!(
                        bind = %config.terminal.websocket_bind,
                        error = %e,
                        "Failed to bind terminal websocket, terminals will use RPC"
                    );
                    None
                }
            }
        } else {
            None
        };

        let storage = ConsoleStorage::new(
            config.console_dir(),
            config.terminal.buffer_lines,
            config.terminal.buffer_chunk_size,
        );
        storage.ensure_dir().with_context(|| {
            format!(
                "Failed to create console directory: {}",
                storage.dir().display()
            )
        })?;

        let services = Arc::new(ConsoleServices {
            supervisor: Arc::new(PtySupervisor::default()),
            storage,
            events: events.clone(),
            transports: Transports::new(events.clone(), websocket.clone()),
            settings: ConsoleSettings::from_config(&config.terminal),
        });
        let table = Arc::new(ConsoleProcessTable::new(services));

        let session_manager = Arc::new(SessionManager::new(
            config.launch.clone(),
            socket_path.clone(),
        ));

        let router = Arc::new(RpcRouter::new(
            Arc::clone(&table),
            Arc::clone(&session_manager),
            Arc::clone(&events),
        ));

        let (event_tx, _) = broadcast::channel(256);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            events,
            session_manager,
            table,
            router,
            websocket,
            socket_path,
            tasks: Mutex::new(Vec::new()),
            shutdown_token: CancellationToken::new(),
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Starts the daemon orchestrator.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting daemon orchestrator...");

        let table = Arc::clone(&self.table);
        let restored = tokio::task::spawn_blocking(move || table.load())
            .await
            .context("Console restore task failed")?
            .context("Failed to read console index")?;
        if restored > 0 {
            info!(count = restored, "Restored console processes");
            self.emit_event(OrchestratorEvent::TerminalsRestored { count: restored });
        }

        if let Err(e) = rpc::write_pid_file(&self.config.server.data_dir) {
            warn!(error = %e, "Failed to write PID file");
        }

        let server = RpcServer::bind(&self.socket_path).await.with_context(|| {
            format!(
                "Failed to bind RPC socket: {}",
                self.socket_path.display()
            )
        })?;
        info!(path = %self.socket_path.display(), "RPC socket listening");

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(Self::accept_loop(
            server,
            Arc::clone(&self.router),
            self.shutdown_token.clone(),
        )));

        if let Some(websocket) = &self.websocket {
            let channel = Arc::clone(websocket);
            let handler = Arc::clone(&self.table);
            let cancel = self.shutdown_token.clone();
            let event_tx = self.event_tx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = channel.serve(handler, cancel).await {
                    error!(error = %e, "Terminal websocket failed");
                    let _ = event_tx.send(OrchestratorEvent::Error {
                        message: format!("terminal websocket failed: {e}"),
                    });
                }
            }));
        }

        tasks.push(tokio::spawn(run_poll_loop(
            Arc::clone(&self.table),
            Duration::from_millis(self.config.terminal.poll_interval_ms),
            self.shutdown_token.clone(),
        )));

        match Self::sigchld_loop(
            Arc::clone(&self.session_manager),
            self.shutdown_token.clone(),
        ) {
            Ok(task) => tasks.push(task),
            Err(e) => warn!(error = %e, "Failed to install SIGCHLD handler, sessions will not be reaped"),
        }

        tasks.push(tokio::spawn(Self::stale_launch_loop(
            Arc::clone(&self.session_manager),
            self.shutdown_token.clone(),
        )));

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tasks);

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Running;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!("Daemon orchestrator started successfully");
        Ok(())
    }

    /// Accepts RPC connections until shutdown.
    async fn accept_loop(server: RpcServer, router: Arc<RpcRouter>, shutdown_token: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    debug!("RPC accept loop received shutdown signal");
                    break;
                }
                accepted = server.accept() => match accepted {
                    Ok(conn) => {
                        let router = Arc::clone(&router);
                        let cancel = shutdown_token.child_token();
                        tokio::spawn(Self::serve_connection(conn, router, cancel));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept RPC connection"),
                },
            }
        }
    }

    /// Answers requests on one connection until it closes.
    async fn serve_connection(
        mut conn: RpcConnection,
        router: Arc<RpcRouter>,
        cancel: CancellationToken,
    ) {
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = conn.read_request() => request,
            };

            let response = match request {
                Ok(Some(request)) => router.handle(request).await,
                Ok(None) => break,
                Err(RpcError::Json(e)) => {
                    debug!(error = %e, "Malformed RPC request");
                    JsonRpcResponse::failure(
                        None,
                        JsonRpcError::new(ErrorCode::ParseError, format!("parse error: {e}")),
                    )
                }
                Err(e) => {
                    debug!(error = %e, "RPC connection failed");
                    break;
                }
            };

            if let Err(e) = conn.send_response(&response).await {
                debug!(error = %e, "Failed to send RPC response");
                break;
            }
        }
    }

    /// Forwards SIGCHLD to the session manager's process tracker.
    fn sigchld_loop(
        session_manager: Arc<SessionManager>,
        shutdown_token: CancellationToken,
    ) -> std::io::Result<JoinHandle<()>> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigchld = signal(SignalKind::child())?;
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    received = sigchld.recv() => {
                        if received.is_none() {
                            break;
                        }
                        let reaped = session_manager.notify_sigchld();
                        if reaped > 0 {
                            debug!(reaped, "Reaped session processes");
                        }
                    }
                }
            }
        }))
    }

    /// Periodically evicts launches that never connected.
    async fn stale_launch_loop(session_manager: Arc<SessionManager>, shutdown_token: CancellationToken) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(STALE_LAUNCH_SWEEP_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = session_manager.clean_stale_pending_launches();
                    if removed > 0 {
                        info!(removed, "Evicted stale pending launches");
                    }
                }
            }
        }
    }

    /// Stops the daemon orchestrator.
    ///
    /// Restartable terminals are saved so the next start restores them; every
    /// running console process is then terminated.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Running {
                debug!("Orchestrator not running, nothing to stop");
                return Ok(());
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping daemon orchestrator...");

        self.shutdown_token.cancel();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await.is_err() {
                warn!("Background task did not stop in time");
            }
        }

        let table = Arc::clone(&self.table);
        let saved = tokio::task::spawn_blocking(move || {
            let saved = table.save_at_shutdown(true);
            table.terminate_all();
            saved
        })
        .await
        .context("Console shutdown task failed")?;
        if let Err(e) = saved {
            warn!(error = %e, "Error saving console processes");
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!(error = %e, "Could not remove RPC socket");
        }
        rpc::remove_pid_file(&self.config.server.data_dir);

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Stopped;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Daemon orchestrator stopped");
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the session manager.
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    /// Returns the console process table.
    pub fn table(&self) -> &Arc<ConsoleProcessTable> {
        &self.table
    }

    /// Returns the client event queue.
    pub fn events(&self) -> &Arc<ClientEventQueue> {
        &self.events
    }

    /// Returns the RPC router.
    pub fn router(&self) -> &Arc<RpcRouter> {
        &self.router
    }

    /// Returns the path of the RPC socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns the terminal websocket address, if listening.
    pub fn websocket_addr(&self) -> Option<std::net::SocketAddr> {
        self.websocket.as_ref().map(|ws| ws.local_addr())
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}
