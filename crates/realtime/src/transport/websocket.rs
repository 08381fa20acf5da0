//! WebSocket transport using tokio-tungstenite

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use topup_protocol::{decode_server, encode_client, ClientEvent};

use super::{ReconnectPolicy, Transport, TransportEvent, TransportEvents};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a socket session ended.
enum SessionEnd {
    /// Closed by `close()`; never reconnect.
    Intentional,
    /// Dropped by the server or the network.
    Unexpected(String),
    /// Nobody is listening to transport events any more.
    OwnerGone,
}

/// WebSocket transport for the push server.
///
/// Cheap to clone; clones share the same socket.
#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<Inner>,
}

struct Inner {
    url: Url,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Flag to track if disconnect was intentional (vs unexpected close)
    intentional_disconnect: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn new(url: Url, connect_timeout: Duration, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                url,
                connect_timeout,
                policy,
                tx: Mutex::new(None),
                intentional_disconnect: AtomicBool::new(false),
                shutdown: Mutex::new(CancellationToken::new()),
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(config: &crate::config::RealtimeConfig) -> Self {
        Self::new(
            config.realtime_url.clone(),
            config.connect_timeout,
            config.reconnect,
        )
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }
}

impl Inner {
    async fn connect_socket(&self) -> Result<WsStream, TransportError> {
        match self.url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme '{}' in {}",
                    other, self.url
                )))
            }
        }

        let connect = connect_async(self.url.as_str());
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok((stream, _response))) => {
                tracing::info!("Connected to push server at {}", self.url);
                Ok(stream)
            }
            Ok(Err(e)) => Err(TransportError::Connect(e.to_string())),
            Err(_) => Err(TransportError::Timeout(self.connect_timeout)),
        }
    }

    fn set_sender(&self, sender: Option<mpsc::UnboundedSender<Message>>) {
        *self.tx.lock().unwrap_or_else(PoisonError::into_inner) = sender;
    }

    /// Make emits deliverable for the next session. Must run before the
    /// owner learns the socket is up.
    fn install_outbound(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.set_sender(Some(tx));
        rx
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one socket session until it closes.
    async fn run_session(
        &self,
        stream: WsStream,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        events: &TransportEvents,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        let write_handle = tokio::spawn(async move {
            while let Some(msg) = outbound.recv().await {
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let end = loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break SessionEnd::Intentional,
                msg = read.next() => msg,
            };

            match msg {
                Some(Ok(Message::Text(text))) => match decode_server(&text) {
                    Ok(frame) => {
                        tracing::trace!(event = %frame.event, "Frame received");
                        if events.send(TransportEvent::Frame(frame)).is_err() {
                            break SessionEnd::OwnerGone;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse server frame: {}", e);
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("Server closed connection");
                    if self.intentional_disconnect.load(Ordering::SeqCst) {
                        break SessionEnd::Intentional;
                    }
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "server closed connection".to_string());
                    break SessionEnd::Unexpected(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {}", e);
                    break SessionEnd::Unexpected(e.to_string());
                }
                None => break SessionEnd::Unexpected("stream ended".to_string()),
            }
        };

        // Dropping the only sender lets the writer flush and send Close
        self.set_sender(None);
        if matches!(end, SessionEnd::Intentional) {
            let _ = write_handle.await;
        } else {
            write_handle.abort();
        }
        end
    }

    /// Attempt to reconnect with exponential backoff.
    ///
    /// Returns a fresh stream, or `None` when attempts are exhausted or the
    /// transport was closed meanwhile.
    async fn reconnect_with_backoff(
        &self,
        events: &TransportEvents,
        shutdown: &CancellationToken,
    ) -> Option<(WsStream, u32)> {
        let mut backoff = self.policy.backoff();

        loop {
            let Some(delay) = backoff.next_delay_and_advance() else {
                tracing::error!("Max reconnection attempts reached, giving up");
                return None;
            };
            let attempt = backoff.attempts();
            tracing::info!(
                "Reconnection attempt {} of {}, waiting {}ms",
                attempt,
                self.policy.max_attempts,
                delay.as_millis()
            );
            if events
                .send(TransportEvent::Reconnecting { attempt })
                .is_err()
            {
                return None;
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Reconnection cancelled - intentional disconnect");
                    return None;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.connect_socket().await {
                Ok(stream) => return Some((stream, attempt)),
                Err(e) => {
                    tracing::warn!("Reconnection attempt {} failed: {}", attempt, e);
                    let _ = events.send(TransportEvent::ReconnectFailed {
                        error: e.to_string(),
                        exhausted: backoff.is_exhausted(),
                    });
                }
            }
        }
    }

    async fn drive(
        self: Arc<Self>,
        mut stream: WsStream,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        events: TransportEvents,
    ) {
        let shutdown = self.shutdown_token();

        loop {
            match self.run_session(stream, outbound, &events, &shutdown).await {
                SessionEnd::Intentional | SessionEnd::OwnerGone => return,
                SessionEnd::Unexpected(reason) => {
                    tracing::info!("Connection closed unexpectedly: {}", reason);
                    if events
                        .send(TransportEvent::Disconnected { reason })
                        .is_err()
                    {
                        return;
                    }
                }
            }

            match self.reconnect_with_backoff(&events, &shutdown).await {
                Some((next, attempt)) => {
                    outbound = self.install_outbound();
                    if events
                        .send(TransportEvent::Reconnected { attempt })
                        .is_err()
                    {
                        return;
                    }
                    stream = next;
                }
                None => return,
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, events: TransportEvents) -> Result<(), TransportError> {
        self.inner
            .intentional_disconnect
            .store(false, Ordering::SeqCst);
        *self
            .inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();

        let stream = match self.inner.connect_socket().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to connect to push server: {}", e);
                return Err(e);
            }
        };

        let outbound = self.inner.install_outbound();
        let handle = tokio::spawn(Arc::clone(&self.inner).drive(stream, outbound, events));
        if let Some(previous) = self
            .inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            previous.abort();
        }
        Ok(())
    }

    fn emit(&self, event: &ClientEvent) -> Result<(), TransportError> {
        let text = encode_client(event)?;
        let tx = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match tx {
            Some(tx) => tx
                .send(Message::Text(text))
                .map_err(|_| TransportError::NotConnected),
            None => Err(TransportError::NotConnected),
        }
    }

    async fn close(&self) {
        // Mark this as intentional to prevent reconnection attempts
        self.inner
            .intentional_disconnect
            .store(true, Ordering::SeqCst);
        self.inner.shutdown_token().cancel();

        let driver = self
            .inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
        self.inner.set_sender(None);
    }
}
