use async_trait::async_trait;
use bytes::Bytes;
use hostlink_core::TransportError;
use tokio::sync::mpsc;

/// Outbound byte sink bound to one connection.
#[async_trait]
pub trait EventSink: Send {
    /// Write one complete frame. An error means the connection is gone.
    async fn write(&mut self, frame: Bytes) -> Result<(), TransportError>;
}

/// Sink feeding the response body of a streaming HTTP connection.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn write(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::SinkFailed("client disconnected".into()))
    }
}
