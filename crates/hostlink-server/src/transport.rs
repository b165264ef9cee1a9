use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use hostlink_core::{JsonRpcMessage, SessionToken, TransportError};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::frame;
use crate::sink::EventSink;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    /// Created, endpoint handshake not yet written.
    Open,
    Streaming,
    Closed,
}

impl TransportState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Open,
            1 => Self::Streaming,
            _ => Self::Closed,
        }
    }
}

type CloseHook = Box<dyn FnOnce(&SessionToken) + Send>;

/// One streaming session: an outbound sink plus an inbound message queue.
///
/// Outbound writes hold the sink lock for the whole frame, so frames never
/// interleave. Inbound messages are queued without bound and consumed by the
/// session's protocol loop.
pub struct SessionTransport {
    token: SessionToken,
    sink: AsyncMutex<Option<Box<dyn EventSink>>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    state: AtomicU8,
    closed: CancellationToken,
    on_close: Mutex<Option<CloseHook>>,
}

impl SessionTransport {
    pub fn new(token: SessionToken, sink: Box<dyn EventSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            token,
            sink: AsyncMutex::new(Some(sink)),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: AsyncMutex::new(rx),
            state: AtomicU8::new(TransportState::Open as u8),
            closed: CancellationToken::new(),
            on_close: Mutex::new(None),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == TransportState::Closed
    }

    /// Run `hook` exactly once when the transport closes. Replaces any
    /// earlier hook.
    pub fn set_on_close(&self, hook: impl FnOnce(&SessionToken) + Send + 'static) {
        *self.on_close.lock() = Some(Box::new(hook));
    }

    /// Write the endpoint handshake and start streaming.
    pub async fn open(&self, endpoint: &str) -> Result<(), TransportError> {
        self.write_frame(frame::endpoint_event(endpoint)).await?;
        let _ = self.state.compare_exchange(
            TransportState::Open as u8,
            TransportState::Streaming as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        Ok(())
    }

    /// Frame `message` as one `message` event and write it.
    pub async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let json = serde_json::to_string(message)?;
        self.write_frame(frame::message_event(&json)).await
    }

    pub async fn send_keep_alive(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.write_frame(frame::keep_alive()).await
    }

    async fn write_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        let result = self.write_locked(frame).await;
        // close() may have run while the lock was held and skipped the sink.
        if self.is_closed() {
            self.release_sink();
        }
        result
    }

    async fn write_locked(&self, frame: Bytes) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        if self.is_closed() {
            *sink = None;
            return Err(TransportError::Closed);
        }
        let Some(writer) = sink.as_mut() else {
            return Err(TransportError::Closed);
        };
        trace!(session_id = %self.token, bytes = frame.len(), "frame out");
        if let Err(e) = writer.write(frame).await {
            *sink = None;
            drop(sink);
            debug!(session_id = %self.token, error = %e, "sink write failed, closing session");
            let _ = self.close();
            return Err(e);
        }
        Ok(())
    }

    /// Drop the sink unless a writer holds it; that writer releases it on
    /// the way out.
    fn release_sink(&self) {
        if let Ok(mut sink) = self.sink.try_lock() {
            *sink = None;
        }
    }

    /// Next inbound message, or `None` once the session is closed and the
    /// queue is drained.
    pub async fn receive(&self) -> Option<JsonRpcMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Decode a payload delivered over HTTP and queue it for the protocol
    /// loop. Malformed payloads are rejected without affecting the session.
    pub fn on_inbound_delivered(&self, raw: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let message =
            JsonRpcMessage::parse(raw).map_err(|e| TransportError::Parse(e.to_string()))?;
        let inbound = self.inbound_tx.lock();
        let tx = inbound.as_ref().ok_or(TransportError::Closed)?;
        tx.send(message).map_err(|_| TransportError::Closed)
    }

    /// Close the session. Returns `true` for the call that actually closed
    /// it; later calls do nothing.
    pub fn close(&self) -> bool {
        let previous = self
            .state
            .swap(TransportState::Closed as u8, Ordering::AcqRel);
        if TransportState::from_u8(previous) == TransportState::Closed {
            return false;
        }

        drop(self.inbound_tx.lock().take());
        self.closed.cancel();
        self.release_sink();
        let hook = self.on_close.lock().take();
        if let Some(hook) = hook {
            hook(&self.token);
        }
        debug!(session_id = %self.token, "session closed");
        true
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

impl fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTransport")
            .field("token", &self.token)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
