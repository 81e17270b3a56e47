use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::events::Frame;
use super::socketio::{self, Packet};
use crate::error::NotifierError;

/// Opens live-update connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, access_token: &str) -> Result<Box<dyn Connection>, NotifierError>;
}

#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), NotifierError>;

    /// `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Result<Frame, NotifierError>>;

    async fn close(&mut self);
}

/// Socket.IO client over a websocket, as served by the portal backend.
pub struct WsTransport {
    url: String,
}

/// Upper bound for opening the socket and joining the namespace.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn open(&self, access_token: &str) -> Result<WsConnection, NotifierError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| NotifierError::Connect(e.to_string()))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| NotifierError::Connect(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| NotifierError::Connect(e.to_string()))?;

        let mut connection = WsConnection { stream };
        connection.join_namespace().await?;

        tracing::debug!(url = %self.url, "live-update socket open");
        Ok(connection)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, access_token: &str) -> Result<Box<dyn Connection>, NotifierError> {
        let connection = tokio::time::timeout(CONNECT_TIMEOUT, self.open(access_token))
            .await
            .map_err(|_| NotifierError::Connect("timed out".to_string()))??;
        Ok(Box::new(connection))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsConnection {
    /// Waits for the Engine.IO open packet, then joins the default namespace.
    async fn join_namespace(&mut self) -> Result<(), NotifierError> {
        let mut opened = false;

        loop {
            let packet = match self.next_packet().await {
                Some(packet) => packet.map_err(|e| NotifierError::Connect(e.to_string()))?,
                None => return Err(NotifierError::Connect("closed during handshake".to_string())),
            };

            match packet {
                Packet::Open(params) if !opened => {
                    tracing::trace!(%params, "engine.io open");
                    opened = true;
                    self.write(socketio::CONNECT.to_string()).await?;
                }
                Packet::Connected if opened => return Ok(()),
                Packet::ConnectError(message) => return Err(NotifierError::Connect(message)),
                Packet::Close => return Err(NotifierError::Connect("closed during handshake".to_string())),
                Packet::Ping => self.write(socketio::PONG.to_string()).await?,
                other => tracing::debug!(?other, "ignoring packet during handshake"),
            }
        }
    }

    async fn next_packet(&mut self) -> Option<Result<Packet, NotifierError>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(socketio::decode(&text)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(NotifierError::Protocol(e.to_string()))),
            }
        }
        None
    }

    async fn write(&mut self, text: String) -> Result<(), NotifierError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| NotifierError::Send(e.to_string()))
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: Frame) -> Result<(), NotifierError> {
        let text = socketio::encode_event(&frame)?;
        self.write(text).await
    }

    async fn recv(&mut self) -> Option<Result<Frame, NotifierError>> {
        loop {
            match self.next_packet().await? {
                Ok(Packet::Event(frame)) => return Some(Ok(frame)),
                Ok(Packet::Ping) => {
                    if let Err(e) = self.write(socketio::PONG.to_string()).await {
                        return Some(Err(e));
                    }
                }
                Ok(Packet::Close) => return None,
                Ok(Packet::ConnectError(message)) => {
                    return Some(Err(NotifierError::Protocol(message)))
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.write(socketio::DISCONNECT.to_string()).await {
            tracing::debug!("namespace disconnect: {}", e);
        }
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("socket close: {}", e);
        }
    }
}

/// In-process transport. Each successful `connect` hands the server side of
/// the connection to [`MemoryServer::accept`].
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
}

struct MemoryInner {
    failures_left: u32,
    attempts: u32,
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server end of one in-memory connection.
pub struct MemoryPeer {
    to_client: Option<mpsc::UnboundedSender<Frame>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

struct MemoryConnection {
    from_server: mpsc::UnboundedReceiver<Frame>,
    to_server: Option<mpsc::UnboundedSender<Frame>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let transport = Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                failures_left: 0,
                attempts: 0,
                accept_tx,
            })),
        };
        (transport, MemoryServer { accept_rx })
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next(&self, count: u32) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failures_left = count;
    }

    pub fn attempts(&self) -> u32 {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).attempts
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, _access_token: &str) -> Result<Box<dyn Connection>, NotifierError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.attempts += 1;

        if inner.failures_left > 0 {
            inner.failures_left -= 1;
            return Err(NotifierError::Connect("connection refused".to_string()));
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();

        inner
            .accept_tx
            .send(MemoryPeer {
                to_client: Some(to_client),
                from_client,
            })
            .map_err(|_| NotifierError::Connect("server gone".to_string()))?;

        Ok(Box::new(MemoryConnection {
            from_server,
            to_server: Some(to_server),
        }))
    }
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

impl MemoryPeer {
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Next frame from the client, `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Simulates a network drop.
    pub fn disconnect(&mut self) {
        self.to_client = None;
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, frame: Frame) -> Result<(), NotifierError> {
        let tx = self.to_server.as_ref().ok_or(NotifierError::Closed)?;
        tx.send(frame).map_err(|_| NotifierError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Frame, NotifierError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.to_server = None;
        self.from_server.close();
    }
}
