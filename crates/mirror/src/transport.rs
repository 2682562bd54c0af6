use crate::payload::ActivityPayload;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Connection-level events a transport reports back to the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Error { code: i64, message: String },
}

/// The connection to the presence service.
///
/// The mirror's worker task owns the object, so every call happens from a
/// single task. Connection-level events travel on the channel handed to
/// the factory rather than through return values.
#[async_trait]
pub trait StatusTransport: Send {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    async fn set_activity(&mut self, payload: &ActivityPayload) -> Result<()>;
}

/// Creates transport instances wired to the mirror's event channel.
///
/// `reset` drops the old instance and asks the factory for a fresh one.
pub trait TransportFactory: Send + Sync {
    fn create(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Box<dyn StatusTransport>;
}

/// Whether this build can reach a local presence service at all.
#[cfg(any(unix, windows))]
pub fn presence_supported() -> bool {
    true
}

#[cfg(not(any(unix, windows)))]
pub fn presence_supported() -> bool {
    false
}

/// Stand-in used when the platform cannot host the presence feature.
/// Accepts every call, never connects, never emits events.
pub struct NoopTransport;

#[async_trait]
impl StatusTransport for NoopTransport {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) {}

    fn is_connected(&self) -> bool {
        false
    }

    async fn set_activity(&mut self, _payload: &ActivityPayload) -> Result<()> {
        Ok(())
    }
}

pub struct NoopTransportFactory;

impl TransportFactory for NoopTransportFactory {
    fn create(&self, _events: mpsc::UnboundedSender<TransportEvent>) -> Box<dyn StatusTransport> {
        Box::new(NoopTransport)
    }
}
