//! WebSocket transport client.
//!
//! This module provides a WebSocket-based [`TransportClient`] and
//! [`AuthProvider`] using tokio-tungstenite. One connection carries every
//! request; responses are matched to requests by ID and `Change` frames are
//! routed to the queue of the subscription they belong to.

use async_trait::async_trait;
use bytes::BytesMut;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidal_protocol::{codec, ChangeEvent, Filter, Frame, Query, PROTOCOL_VERSION};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::traits::{
    AuthError, AuthProvider, IdentityEvent, IdentityEventKind, Principal, Subscription,
    SubscriptionHandle, SubscriptionId, TransportClient, TransportError,
};

/// WebSocket client configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Server URL.
    pub url: String,
    /// Session token to resume, if any.
    pub token: Option<String>,
    /// Time allowed for any request to be answered.
    pub request_timeout: Duration,
    /// Per-subscription event queue capacity.
    pub event_buffer: usize,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            token: None,
            request_timeout: Duration::from_secs(10),
            event_buffer: 256,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Identity event broadcast capacity.
const IDENTITY_EVENT_CAPACITY: usize = 16;

type Pending = DashMap<u64, oneshot::Sender<Frame>>;
type Routes = DashMap<SubscriptionId, mpsc::Sender<ChangeEvent>>;
type Opening = DashMap<u64, mpsc::Sender<ChangeEvent>>;

/// A WebSocket connection to a Tidal sync server.
pub struct WebSocketClient {
    config: WebSocketConfig,
    connection_id: String,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: Arc<Pending>,
    routes: Arc<Routes>,
    opening: Arc<Opening>,
    next_id: AtomicU64,
    open: Arc<AtomicBool>,
    principal: watch::Sender<Option<Principal>>,
    identity: broadcast::Sender<IdentityEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WebSocketClient {
    /// Connect and complete the handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established, the
    /// server does not answer the handshake in time, or it speaks an
    /// incompatible protocol version.
    pub async fn connect(config: WebSocketConfig) -> Result<Self, TransportError> {
        let (stream, _) = connect_async(config.url.as_str()).await.map_err(|e| {
            error!("WebSocket connect failed: {}", e);
            TransportError::Other(format!("WebSocket connect failed: {}", e))
        })?;
        let (mut sink, mut source) = stream.split();

        let hello = codec::encode(&Frame::connect(PROTOCOL_VERSION.wire(), config.token.clone()))?;
        sink.send(Message::Binary(hello.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let mut read_buffer = BytesMut::with_capacity(4096);
        let connected = tokio::time::timeout(
            config.request_timeout,
            read_handshake(&mut source, &mut read_buffer),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        let (connection_id, principal) = match connected {
            Frame::Connected {
                connection_id,
                version,
                principal,
                ..
            } => {
                PROTOCOL_VERSION.accept(version)?;
                (connection_id, principal.map(Principal::from_email))
            }
            Frame::Error { message, code, .. } => {
                return Err(TransportError::Rejected { code, message })
            }
            other => {
                return Err(TransportError::UnexpectedResponse(format!(
                    "{:?}",
                    other.frame_type()
                )))
            }
        };

        info!(connection = %connection_id, url = %config.url, "Connected");

        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let routes: Arc<Routes> = Arc::new(DashMap::new());
        let opening: Arc<Opening> = Arc::new(DashMap::new());
        let open = Arc::new(AtomicBool::new(true));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (principal_tx, _) = watch::channel(principal);
        let (identity, _) = broadcast::channel(IDENTITY_EVENT_CAPACITY);

        let writer = {
            let open = Arc::clone(&open);
            tokio::spawn(async move {
                while let Some(frame) = outbound_rx.recv().await {
                    let data = match codec::encode(&frame) {
                        Ok(data) => data,
                        Err(e) => {
                            warn!(error = %e, "Dropping unencodable frame");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Binary(data.to_vec())).await {
                        warn!(error = %e, "WebSocket send failed");
                        break;
                    }
                }
                open.store(false, Ordering::SeqCst);
                // Best effort; the peer may already be gone.
                let _ = sink.close().await;
            })
        };

        let reader = {
            let pending = Arc::clone(&pending);
            let routes = Arc::clone(&routes);
            let opening = Arc::clone(&opening);
            let open = Arc::clone(&open);
            let outbound = outbound.clone();
            let max_message_size = config.max_message_size;
            tokio::spawn(async move {
                loop {
                    match source.next().await {
                        Some(Ok(Message::Binary(data))) => {
                            if data.len() > max_message_size {
                                warn!(
                                    "Message too large: {} bytes (max: {})",
                                    data.len(),
                                    max_message_size
                                );
                                continue;
                            }
                            read_buffer.extend_from_slice(&data);
                            loop {
                                match codec::decode_from(&mut read_buffer) {
                                    Ok(Some(frame)) => {
                                        dispatch(frame, &pending, &routes, &opening, &outbound)
                                            .await;
                                    }
                                    Ok(None) => break,
                                    Err(e @ codec::ProtocolError::FrameTooLarge(_)) => {
                                        // The length prefix is unusable, so frame boundaries are lost.
                                        warn!(error = %e, "Discarding read buffer");
                                        read_buffer.clear();
                                        break;
                                    }
                                    Err(e) => {
                                        warn!(error = %e, "Dropping undecodable frame");
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("WebSocket stream ended");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ping/pong are answered by tungstenite.
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            break;
                        }
                    }
                }
                open.store(false, Ordering::SeqCst);
                // Dropping senders fails outstanding requests and ends subscription queues.
                pending.clear();
                routes.clear();
                opening.clear();
            })
        };

        Ok(Self {
            config,
            connection_id,
            outbound,
            pending,
            routes,
            opening,
            next_id: AtomicU64::new(1),
            open,
            principal: principal_tx,
            identity,
            reader,
            writer,
        })
    }

    /// The server-assigned connection ID.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Check if the connection is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close the connection.
    pub fn disconnect(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
        self.pending.clear();
        self.routes.clear();
        self.opening.clear();
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request frame and wait for the frame answering it.
    async fn request(&self, id: u64, frame: Frame) -> Result<Frame, TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if self.outbound.send(frame).is_err() {
            self.pending.remove(&id);
            return Err(TransportError::ConnectionClosed);
        }

        let response = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => return Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&id);
                return Err(TransportError::Timeout);
            }
        };

        match response {
            Frame::Error { code, message, .. } => Err(TransportError::Rejected { code, message }),
            frame => Ok(frame),
        }
    }

    fn set_principal(&self, kind: IdentityEventKind, principal: Option<Principal>) {
        self.principal.send_replace(principal.clone());
        let _ = self.identity.send(IdentityEvent::new(kind, principal));
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Read frames until the server answers the `Connect` frame.
async fn read_handshake<S>(source: &mut S, buf: &mut BytesMut) -> Result<Frame, TransportError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    loop {
        if let Some(frame) = codec::decode_from(buf)? {
            return Ok(frame);
        }
        match source.next().await {
            Some(Ok(Message::Binary(data))) => buf.extend_from_slice(&data),
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::ConnectionClosed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(TransportError::Other(e.to_string())),
        }
    }
}

/// Route one inbound frame.
///
/// A `Subscribed` answer promotes the queue staged under its request ID
/// before any later `Change` frame is looked up.
async fn dispatch(
    frame: Frame,
    pending: &Pending,
    routes: &Routes,
    opening: &Opening,
    outbound: &mpsc::UnboundedSender<Frame>,
) {
    if let Frame::Subscribed { id, subscription } = &frame {
        if let Some((_, sender)) = opening.remove(id) {
            routes.insert(SubscriptionId(*subscription), sender);
        }
    }

    match frame {
        Frame::Change {
            subscription,
            event,
        } => {
            let id = SubscriptionId(subscription);
            let sender = routes.get(&id).map(|s| s.value().clone());
            match sender {
                // Awaiting here applies backpressure to the socket.
                Some(sender) => {
                    if sender.send(event).await.is_err() {
                        routes.remove(&id);
                    }
                }
                None => debug!(subscription = %id, "Change for closed subscription"),
            }
        }
        Frame::Ping { timestamp } => {
            let _ = outbound.send(Frame::pong(timestamp));
        }
        Frame::Pong { .. } => {}
        frame => match frame.request_id() {
            Some(id) => match pending.remove(&id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(frame);
                }
                None => debug!(request = id, "Response for unknown request"),
            },
            None => warn!(frame_type = ?frame.frame_type(), "Unexpected frame type"),
        },
    }
}

#[async_trait]
impl TransportClient for WebSocketClient {
    async fn query(&self, query: Query) -> Result<Vec<Value>, TransportError> {
        let id = self.next_request_id();
        match self.request(id, Frame::query(id, query)).await? {
            Frame::Rows { rows, .. } => Ok(rows),
            other => Err(TransportError::UnexpectedResponse(format!(
                "{:?}",
                other.frame_type()
            ))),
        }
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Subscription, TransportError> {
        let id = self.next_request_id();
        let (sender, events) = mpsc::channel(self.config.event_buffer);
        self.opening.insert(id, sender);

        let response = self
            .request(id, Frame::subscribe(id, collection, filter.clone()))
            .await;
        self.opening.remove(&id);

        let Frame::Subscribed { subscription, .. } = response? else {
            return Err(TransportError::UnexpectedResponse(
                "subscribe answered without a subscription".to_string(),
            ));
        };

        let sub_id = SubscriptionId(subscription);
        debug!(subscription = %sub_id, collection = %collection, filter = %filter, "Subscribed");
        Ok(Subscription {
            handle: SubscriptionHandle::new(sub_id, collection, filter),
            events,
        })
    }

    async fn close(&self, handle: &SubscriptionHandle) -> Result<(), TransportError> {
        let id = self.next_request_id();
        let result = self
            .request(id, Frame::unsubscribe(id, handle.id().0))
            .await;

        // The route goes either way so nothing is delivered after close returns.
        self.routes.remove(&handle.id());
        handle.mark_closed();

        match result? {
            Frame::Ack { .. } => {
                debug!(subscription = %handle.id(), "Subscription closed");
                Ok(())
            }
            other => Err(TransportError::UnexpectedResponse(format!(
                "{:?}",
                other.frame_type()
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn is_healthy(&self) -> bool {
        self.is_open()
    }
}

#[async_trait]
impl AuthProvider for WebSocketClient {
    async fn current_principal(&self) -> Result<Option<Principal>, AuthError> {
        Ok(self.principal.borrow().clone())
    }

    fn identity_events(&self) -> broadcast::Receiver<IdentityEvent> {
        self.identity.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let id = self.next_request_id();
        let frame = Frame::SignIn {
            id,
            email: email.to_string(),
            password: password.to_string(),
        };

        match self.request(id, frame).await {
            Ok(Frame::Authenticated {
                principal: Some(email),
                ..
            }) => {
                let principal = Principal::from_email(email);
                self.set_principal(IdentityEventKind::SignedIn, Some(principal.clone()));
                Ok(principal)
            }
            Ok(other) => Err(AuthError::Transport(TransportError::UnexpectedResponse(
                format!("{:?}", other.frame_type()),
            ))),
            Err(TransportError::Rejected { message, .. }) => Err(AuthError::Rejected(message)),
            Err(e) => Err(e.into()),
        }
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Principal>, AuthError> {
        let id = self.next_request_id();
        let frame = Frame::SignUp {
            id,
            email: email.to_string(),
            password: password.to_string(),
        };

        match self.request(id, frame).await {
            Ok(Frame::Authenticated { principal, .. }) => {
                let principal = principal.map(Principal::from_email);
                if principal.is_some() {
                    self.set_principal(IdentityEventKind::SignedIn, principal.clone());
                }
                Ok(principal)
            }
            Ok(other) => Err(AuthError::Transport(TransportError::UnexpectedResponse(
                format!("{:?}", other.frame_type()),
            ))),
            Err(TransportError::Rejected { message, .. }) => Err(AuthError::Rejected(message)),
            Err(e) => Err(e.into()),
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let id = self.next_request_id();
        match self.request(id, Frame::SignOut { id }).await {
            Ok(_) => {
                self.set_principal(IdentityEventKind::SignedOut, None);
                Ok(())
            }
            Err(TransportError::Rejected { message, .. }) => Err(AuthError::Rejected(message)),
            Err(e) => Err(e.into()),
        }
    }
}
