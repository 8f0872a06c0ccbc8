//! Output transports.
//!
//! Terminal output reaches the browser either as queued
//! `console_process_output` client events ([`RpcTransport`]) or pushed over a
//! per-terminal websocket ([`WebsocketChannel`]). A console process only sees
//! the [`Transport`] trait; [`Transports`] decides which one a new process
//! gets and hands out the RPC fallback when a client downgrades.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use protocol::ClientEvent;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::info::ChannelMode;
use crate::events::ClientEventSink;

/// Path prefix clients connect to, followed by the process handle.
pub const TERMINAL_PATH_PREFIX: &str = "/terminal/";

/// Output frames queued per websocket connection before frames are dropped.
pub const DEFAULT_CONNECTION_QUEUE: usize = 256;

/// Carries console process output to the client.
pub trait Transport: Send + Sync {
    /// Channel mode this transport implements.
    fn mode(&self) -> ChannelMode;

    /// Delivers output for `handle`. Returns false when the output could not
    /// be delivered; it remains available from the saved buffer.
    fn deliver(&self, handle: &str, output: &str, error: bool) -> bool;
}

/// Delivers output as queued client events.
pub struct RpcTransport {
    events: Arc<dyn ClientEventSink>,
}

impl RpcTransport {
    pub fn new(events: Arc<dyn ClientEventSink>) -> Self {
        Self { events }
    }
}

impl Transport for RpcTransport {
    fn mode(&self) -> ChannelMode {
        ChannelMode::Rpc
    }

    fn deliver(&self, handle: &str, output: &str, error: bool) -> bool {
        self.events.enque_client_event(ClientEvent::ConsoleProcessOutput {
            handle: handle.to_string(),
            output: output.to_string(),
            error,
        });
        true
    }
}

/// Receives input arriving over websocket connections.
pub trait InputHandler: Send + Sync {
    /// Whether a connection for `handle` should be accepted.
    fn accepts(&self, handle: &str) -> bool;

    /// Handles text typed into the terminal.
    fn on_input(&self, handle: &str, input: &str);
}

/// Websocket listener and the per-terminal connections it has accepted.
pub struct WebsocketChannel {
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    connections: DashMap<String, mpsc::Sender<String>>,
    queue_capacity: usize,
}

impl WebsocketChannel {
    /// Binds the listener. Connections are accepted once [`serve`] runs.
    ///
    /// [`serve`]: WebsocketChannel::serve
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Terminal websocket listening");
        Ok(Self {
            local_addr,
            listener: Mutex::new(Some(listener)),
            connections: DashMap::new(),
            queue_capacity: DEFAULT_CONNECTION_QUEUE,
        })
    }

    /// Overrides the per-connection output queue size.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL a client uses to attach to `handle`.
    pub fn channel_id(&self, handle: &str) -> String {
        format!("ws://{}{}{}", self.local_addr, TERMINAL_PATH_PREFIX, handle)
    }

    /// Whether a client is attached to `handle`.
    pub fn is_connected(&self, handle: &str) -> bool {
        self.connections.contains_key(handle)
    }

    /// Number of attached clients.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Accepts connections until `cancel` fires.
    pub async fn serve(
        self: Arc<Self>,
        handler: Arc<dyn InputHandler>,
        cancel: CancellationToken,
    ) -> io::Result<()> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| io::Error::other("websocket channel is already serving"))?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "Websocket connection accepted");
                        let channel = Arc::clone(&self);
                        let handler = Arc::clone(&handler);
                        let cancel = cancel.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = channel.handle_connection(stream, handler, cancel).await {
                                tracing::debug!(peer = %peer, error = %e, "Websocket connection ended with error");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to accept websocket connection"),
                },
            }
        }

        tracing::debug!("Terminal websocket stopped");
        Ok(())
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        handler: Arc<dyn InputHandler>,
        cancel: CancellationToken,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let mut path = String::new();
        let mut ws = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                path = req.uri().path().to_string();
                Ok(resp)
            },
        )
        .await?;

        let handle = match path.strip_prefix(TERMINAL_PATH_PREFIX) {
            Some(handle) if !handle.is_empty() && handler.accepts(handle) => handle.to_string(),
            _ => {
                tracing::debug!(path = %path, "Rejecting websocket for unknown terminal");
                ws.close(None).await?;
                return Ok(());
            }
        };

        let (tx, mut rx) = mpsc::channel::<String>(self.queue_capacity);
        if self.connections.insert(handle.clone(), tx.clone()).is_some() {
            tracing::debug!(handle = %handle, "Replaced existing websocket connection");
        }
        tracing::info!(handle = %handle, "Terminal websocket attached");

        let (mut sink, mut source) = ws.split();
        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break Ok(());
                }
                outgoing = rx.recv() => match outgoing {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                },
                incoming = source.next() => match incoming {
                    Some(Ok(Message::Text(text))) => handler.on_input(&handle, &text),
                    Some(Ok(Message::Binary(bytes))) => {
                        handler.on_input(&handle, &String::from_utf8_lossy(&bytes));
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e),
                },
            }
        };

        // a newer connection for the same handle may have replaced ours
        self.connections
            .remove_if(&handle, |_, sender| sender.same_channel(&tx));
        tracing::info!(handle = %handle, "Terminal websocket detached");
        result
    }
}

impl Transport for WebsocketChannel {
    fn mode(&self) -> ChannelMode {
        ChannelMode::Websocket
    }

    fn deliver(&self, handle: &str, output: &str, _error: bool) -> bool {
        let result = match self.connections.get(handle) {
            Some(sender) => sender.try_send(output.to_string()),
            None => {
                tracing::trace!(handle, "No websocket attached, output kept in buffer");
                return false;
            }
        };

        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(handle, bytes = output.len(), "Websocket output queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.connections.remove(handle);
                false
            }
        }
    }
}

/// The transports available to new console processes.
#[derive(Clone)]
pub struct Transports {
    rpc: Arc<RpcTransport>,
    websocket: Option<Arc<WebsocketChannel>>,
}

impl Transports {
    /// RPC only, or RPC plus a bound websocket channel.
    pub fn new(events: Arc<dyn ClientEventSink>, websocket: Option<Arc<WebsocketChannel>>) -> Self {
        Self {
            rpc: Arc::new(RpcTransport::new(events)),
            websocket,
        }
    }

    /// Picks the transport for a new process: the websocket when one is
    /// bound, RPC otherwise. Returns the transport and its channel id.
    pub fn negotiate(&self, handle: &str) -> (Arc<dyn Transport>, String) {
        match &self.websocket {
            Some(channel) => {
                let id = channel.channel_id(handle);
                (Arc::clone(channel) as Arc<dyn Transport>, id)
            }
            None => (self.rpc(), String::new()),
        }
    }

    /// Transport for `mode`, falling back to RPC when no websocket is bound.
    pub fn for_mode(&self, mode: ChannelMode, handle: &str) -> (Arc<dyn Transport>, String) {
        match mode {
            ChannelMode::Websocket => self.negotiate(handle),
            ChannelMode::Rpc => (self.rpc(), String::new()),
        }
    }

    /// The RPC transport.
    pub fn rpc(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.rpc) as Arc<dyn Transport>
    }

    /// The websocket channel, if bound.
    pub fn websocket(&self) -> Option<&Arc<WebsocketChannel>> {
        self.websocket.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ClientEventQueue;
    use std::time::Duration;

    struct EchoHandler {
        received: Mutex<Vec<(String, String)>>,
    }

    impl InputHandler for EchoHandler {
        fn accepts(&self, handle: &str) -> bool {
            handle == "h1"
        }

        fn on_input(&self, handle: &str, input: &str) {
            self.received
                .lock()
                .unwrap()
                .push((handle.to_string(), input.to_string()));
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[test]
    fn test_rpc_transport_queues_output_event() {
        let queue = Arc::new(ClientEventQueue::new());
        let transport = RpcTransport::new(queue.clone());
        assert!(transport.deliver("h1", "hello\n", false));

        let events = queue.events_since(0);
        assert_eq!(
            events[0].event,
            ClientEvent::ConsoleProcessOutput {
                handle: "h1".to_string(),
                output: "hello\n".to_string(),
                error: false,
            }
        );
    }

    #[tokio::test]
    async fn test_negotiate_prefers_websocket() {
        let queue = Arc::new(ClientEventQueue::new());
        let rpc_only = Transports::new(queue.clone(), None);
        let (transport, id) = rpc_only.negotiate("h1");
        assert_eq!(transport.mode(), ChannelMode::Rpc);
        assert!(id.is_empty());

        let channel = Arc::new(WebsocketChannel::bind("127.0.0.1:0").await.unwrap());
        let both = Transports::new(queue, Some(channel.clone()));
        let (transport, id) = both.negotiate("h1");
        assert_eq!(transport.mode(), ChannelMode::Websocket);
        assert_eq!(id, format!("ws://{}/terminal/h1", channel.local_addr()));
        assert_eq!(both.for_mode(ChannelMode::Rpc, "h1").0.mode(), ChannelMode::Rpc);
    }

    #[tokio::test]
    async fn test_deliver_without_connection_is_not_delivered() {
        let channel = WebsocketChannel::bind("127.0.0.1:0").await.unwrap();
        assert!(!channel.deliver("h1", "lost", false));
    }

    #[tokio::test]
    async fn test_websocket_round_trip() {
        let channel = Arc::new(WebsocketChannel::bind("127.0.0.1:0").await.unwrap());
        let handler = Arc::new(EchoHandler {
            received: Mutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();
        let server = tokio::spawn(channel.clone().serve(handler.clone(), cancel.clone()));

        let url = channel.channel_id("h1");
        let (mut client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        wait_for(|| channel.is_connected("h1")).await;

        client.send(Message::Text("ls\n".to_string())).await.unwrap();
        wait_for(|| !handler.received.lock().unwrap().is_empty()).await;
        assert_eq!(
            handler.received.lock().unwrap()[0],
            ("h1".to_string(), "ls\n".to_string())
        );

        assert!(channel.deliver("h1", "output", false));
        let frame = client.next().await.unwrap().unwrap();
        assert_eq!(frame, Message::Text("output".to_string()));

        client.close(None).await.unwrap();
        wait_for(|| !channel.is_connected("h1")).await;

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_terminal_is_rejected() {
        let channel = Arc::new(WebsocketChannel::bind("127.0.0.1:0").await.unwrap());
        let handler = Arc::new(EchoHandler {
            received: Mutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();
        tokio::spawn(channel.clone().serve(handler, cancel.clone()));

        let (mut client, _) = tokio_tungstenite::connect_async(channel.channel_id("nope"))
            .await
            .unwrap();
        let next = client.next().await;
        assert!(matches!(next, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
        assert_eq!(channel.connection_count(), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_full_queue_drops_frames() {
        let channel = Arc::new(
            WebsocketChannel::bind("127.0.0.1:0")
                .await
                .unwrap()
                .with_queue_capacity(1),
        );
        let (tx, _rx) = mpsc::channel(1);
        channel.connections.insert("h1".to_string(), tx);

        assert!(channel.deliver("h1", "first", false));
        assert!(!channel.deliver("h1", "second", false));
    }
}
