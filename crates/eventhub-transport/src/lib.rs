// Subscriber stream and publish side-channel adapters.
//
// The harness only needs three primitives from the outside world: dial one
// message stream per client, read opaque messages from it, and fire a payload
// at a broker topic. Each is a trait here so the orchestration logic can run
// against WebSocket/Redis in production and against `MemoryHub` in tests.
use async_trait::async_trait;
use bytes::Bytes;

pub mod memory;
pub mod redis_publisher;
pub mod websocket;

pub use memory::{MemoryConnection, MemoryHub};
pub use redis_publisher::RedisPublisher;
pub use websocket::{WebSocketConnection, WebSocketConnector};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),
    #[error("connect to {endpoint} failed")]
    Connect {
        endpoint: String,
        #[source]
        source: BoxError,
    },
    #[error("connection closed")]
    Closed,
    #[error("read failed")]
    Read(#[source] BoxError),
    #[error("write failed")]
    Write(#[source] BoxError),
    #[error("publish to {topic} failed")]
    Publish {
        topic: String,
        #[source]
        source: BoxError,
    },
}

impl Error {
    /// True for failures of an established stream (peer close or broken read).
    pub fn is_read_failure(&self) -> bool {
        matches!(self, Error::Closed | Error::Read(_))
    }
}

/// Dials subscriber streams.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    async fn connect(&self, endpoint: &str) -> Result<Self::Connection>;
}

/// One persistent bidirectional message stream, owned by a single task.
///
/// Dropping a connection releases it; `close` additionally tells the peer.
#[async_trait]
pub trait Connection: Send + 'static {
    async fn send(&mut self, payload: Bytes) -> Result<()>;

    /// Wait for the next message. A closed stream yields `Error::Closed`.
    async fn receive(&mut self) -> Result<Bytes>;

    async fn close(&mut self) -> Result<()>;
}

/// Fire-and-forget publish to a named topic; no delivery acknowledgement.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;
}

#[async_trait]
impl<C: Connector> Connector for std::sync::Arc<C> {
    type Connection = C::Connection;

    async fn connect(&self, endpoint: &str) -> Result<Self::Connection> {
        (**self).connect(endpoint).await
    }
}

#[async_trait]
impl<P: Publisher> Publisher for std::sync::Arc<P> {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        (**self).publish(topic, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_failures_are_classified() {
        assert!(Error::Closed.is_read_failure());
        assert!(Error::Read("reset".into()).is_read_failure());
        assert!(!Error::Write("broken pipe".into()).is_read_failure());
        assert!(!Error::InvalidEndpoint("nope".into()).is_read_failure());
    }

    #[test]
    fn errors_keep_their_source() {
        let err = Error::Publish {
            topic: "eventhub.test1".into(),
            source: "broker gone".into(),
        };
        assert_eq!(err.to_string(), "publish to eventhub.test1 failed");
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "broker gone");
    }
}
