//! Transport session
//!
//! A `Session` owns at most one WebSocket connection to a broker, optionally
//! wrapped in mutual TLS. It knows nothing about routing: it connects, sends
//! frames, hands out the inbound frame sequence and disconnects. Every state
//! transition is logged and published on a watch channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::time::timeout;
use tokio_tungstenite::{WebSocketStream, client_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::transport::message::Frame;
use crate::transport::tls::{self, TlsSettings};
use crate::utils::{Error, Result};

/// Byte stream a WebSocket runs over: plain TCP or TLS over TCP.
pub trait BrokerIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> BrokerIo for T {}

type BrokerSocket = WebSocketStream<Box<dyn BrokerIo>>;
type FrameSink = SplitSink<BrokerSocket, WsMessage>;
type FrameSource = SplitStream<BrokerSocket>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where the broker lives and how to secure the connection to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// `None` means a plaintext connection.
    pub tls: Option<TlsSettings>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
        }
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        let scheme = if self.tls.is_some() { "wss" } else { "ws" };
        format!("{scheme}://{}/", self.address())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Bounds the whole connect handshake, from TCP to `connack`.
    pub connect_timeout: Duration,
    /// Bounds the goodbye on disconnect and how long callers wait for a
    /// dispatch loop to wind down.
    pub shutdown_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

/// Builds a unique client identifier such as `subscriber-6f1c…`.
pub fn generate_client_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

struct Connection {
    sink: FrameSink,
    shutdown: watch::Sender<bool>,
}

pub struct Session {
    endpoint: Endpoint,
    client_id: String,
    options: SessionOptions,
    state: Arc<watch::Sender<SessionState>>,
    connection: Mutex<Option<Connection>>,
    // inbound half of the current connection until someone takes it
    incoming: parking_lot::Mutex<Option<Incoming>>,
}

impl Session {
    pub fn new(endpoint: Endpoint, client_id: impl Into<String>, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            endpoint,
            client_id: client_id.into(),
            options,
            state: Arc::new(state),
            connection: Mutex::new(None),
            incoming: parking_lot::Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Watches state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Connects to the endpoint.
    ///
    /// Certificate problems and TLS handshake failures are `Auth` errors,
    /// everything else that goes wrong on the way is a `Connection` error and
    /// leaves the session `Failed`.
    pub async fn connect(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        // left over from a connection that failed underneath us
        if let Some(stale) = connection.take() {
            let _ = stale.shutdown.send(true);
        }
        self.incoming.lock().take();

        self.transition(SessionState::Connecting);
        let opened = match timeout(self.options.connect_timeout, self.open()).await {
            Ok(result) => result,
            Err(_) => Err(Error::connection(format!(
                "connecting to {} timed out after {:?}",
                self.endpoint.address(),
                self.options.connect_timeout
            ))),
        };

        let (sink, source) = match opened {
            Ok(halves) => halves,
            Err(e) => {
                let address = self.endpoint.address();
                warn!(client_id = %self.client_id, "Failed to connect to {address}: {e}");
                self.transition(SessionState::Failed);
                return Err(e);
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        *self.incoming.lock() = Some(Incoming {
            source,
            shutdown: shutdown_rx,
            state: self.state.clone(),
            client_id: self.client_id.clone(),
            done: false,
        });
        *connection = Some(Connection { sink, shutdown });
        self.transition(SessionState::Connected);
        info!(client_id = %self.client_id, "Connected to broker at {}", self.endpoint.url());

        Ok(())
    }

    async fn open(&self) -> Result<(FrameSink, FrameSource)> {
        // certificate problems surface before touching the network
        let tls_config = match &self.endpoint.tls {
            Some(settings) => Some(settings.client_config()?),
            None => None,
        };

        let address = self.endpoint.address();
        debug!("Opening TCP connection to {address}");
        let tcp = TcpStream::connect((self.endpoint.host.as_str(), self.endpoint.port))
            .await
            .map_err(|e| Error::connection(format!("failed to connect to {address}: {e}")))?;

        let io: Box<dyn BrokerIo> = match tls_config {
            Some(config) => Box::new(tls::handshake(config, &self.endpoint.host, tcp).await?),
            None => Box::new(tcp),
        };

        let (socket, _response) = client_async(self.endpoint.url(), io)
            .await
            .map_err(|e| {
                Error::connection(format!("WebSocket handshake with {address} failed: {e}"))
            })?;
        let (mut sink, mut source) = socket.split();

        let hello = Frame::Connect {
            client_id: self.client_id.clone(),
        }
        .encode()?;
        sink.send(WsMessage::Text(hello.into()))
            .await
            .map_err(|e| Error::connection(format!("failed to send connect frame: {e}")))?;

        loop {
            match source.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let frame = Frame::decode(&text)
                        .map_err(|e| Error::connection(format!("malformed connect reply: {e}")))?;
                    return match frame {
                        Frame::ConnAck {} => Ok((sink, source)),
                        Frame::Error { message } => Err(Error::connection(format!(
                            "broker refused connection: {message}"
                        ))),
                        other => Err(Error::connection(format!(
                            "expected connack, got {}",
                            other.kind()
                        ))),
                    };
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(Error::connection(
                        "broker closed the connection during connect",
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(Error::connection(format!(
                        "failed to read connect reply: {e}"
                    )));
                }
            }
        }
    }

    /// Writes one frame. Fails with `NotConnected` without writing anything
    /// unless the session is `Connected`.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let text = frame.encode()?;

        let mut connection = self.connection.lock().await;
        let Some(conn) = connection.as_mut() else {
            return Err(Error::NotConnected);
        };
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        debug!(client_id = %self.client_id, "-> {} frame", frame.kind());
        if let Err(e) = conn.sink.send(WsMessage::Text(text.into())).await {
            warn!(client_id = %self.client_id, "Failed to send {} frame: {e}", frame.kind());
            let _ = conn.shutdown.send(true);
            self.transition(SessionState::Failed);
            return Err(Error::connection(format!(
                "failed to send {} frame: {e}",
                frame.kind()
            )));
        }
        Ok(())
    }

    /// Takes the inbound frame sequence of the current connection.
    ///
    /// There is one sequence per connection; it can be taken again only
    /// after a fresh `connect()`.
    pub fn receive(&self) -> Result<Incoming> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.incoming.lock().take().ok_or(Error::ReceiverInUse)
    }

    /// Closes the connection. Calling it on a session that is not connected
    /// is a no-op.
    pub async fn disconnect(&self) {
        let mut connection = self.connection.lock().await;
        self.incoming.lock().take();

        if let Some(mut conn) = connection.take() {
            // wakes any pending receive() right away
            let _ = conn.shutdown.send(true);

            if self.is_connected() {
                let limit = self.options.shutdown_timeout;
                let farewell = async {
                    if let Ok(bye) = (Frame::Disconnect {}).encode() {
                        conn.sink.send(WsMessage::Text(bye.into())).await?;
                    }
                    conn.sink.close().await
                };
                match timeout(limit, farewell).await {
                    Ok(Ok(())) => debug!(client_id = %self.client_id, "Connection closed"),
                    Ok(Err(e)) => debug!(client_id = %self.client_id, "Close failed: {e}"),
                    Err(_) => warn!(client_id = %self.client_id, "Close timed out after {limit:?}"),
                }
            }
        }

        self.transition(SessionState::Disconnected);
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        log_transition(&self.client_id, previous, next);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Inbound frames of one connection.
///
/// `next()` blocks until a frame arrives and returns `None` once the session
/// disconnects or the connection is lost. Undecodable frames are logged and
/// skipped.
pub struct Incoming {
    source: FrameSource,
    shutdown: watch::Receiver<bool>,
    state: Arc<watch::Sender<SessionState>>,
    client_id: String,
    done: bool,
}

impl Incoming {
    pub async fn next(&mut self) -> Option<Frame> {
        if self.done {
            return None;
        }

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut self.shutdown) => {
                    self.done = true;
                    return None;
                }

                item = self.source.next() => match item {
                    Some(Ok(WsMessage::Text(text))) => match Frame::decode(&text) {
                        Ok(frame) => {
                            debug!(client_id = %self.client_id, "<- {} frame", frame.kind());
                            return Some(frame);
                        }
                        Err(e) => {
                            warn!(client_id = %self.client_id, "Skipping malformed frame: {e}");
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        self.lost("broker closed the connection");
                        return None;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.lost(&format!("read failed: {e}"));
                        return None;
                    }
                },
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send {
        futures::stream::unfold(self, |mut incoming| async move {
            incoming.next().await.map(|frame| (frame, incoming))
        })
    }

    fn lost(&mut self, reason: &str) {
        self.done = true;
        let shutdown = &self.shutdown;

        // checked under the state lock: a disconnect or a newer connection
        // raises this connection's shutdown signal before touching the state
        let failed = self.state.send_if_modified(|state| {
            if *shutdown.borrow() || *state != SessionState::Connected {
                return false;
            }
            *state = SessionState::Failed;
            true
        });

        if failed {
            warn!(client_id = %self.client_id, "Connection lost: {reason}");
            log_transition(&self.client_id, SessionState::Connected, SessionState::Failed);
        }
    }
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("client_id", &self.client_id)
            .field("done", &self.done)
            .finish()
    }
}

fn log_transition(client_id: &str, previous: SessionState, next: SessionState) {
    if previous != next {
        info!(client_id = %client_id, "Session {previous} -> {next}");
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // a dropped sender means the connection is gone as well
    let _ = shutdown.wait_for(|stop| *stop).await;
}
