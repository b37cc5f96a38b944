// Redis pub/sub side channel used by the producer to inject events into the hub.
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;

use crate::{Error, Publisher, Result};

/// One multiplexed Redis connection shared by every publish call.
#[derive(Clone)]
pub struct RedisPublisher {
    target: String,
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPublisher")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl RedisPublisher {
    /// Open the connection. A bare `host:port` target means `redis://host:port`.
    pub async fn connect(target: &str) -> Result<Self> {
        let url = redis_url(target)?;
        let connect_err = |err: redis::RedisError| Error::Connect {
            endpoint: url.clone(),
            source: Box::new(err),
        };
        let client = redis::Client::open(url.as_str()).map_err(connect_err)?;
        let mut connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connect_err)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(connect_err)?;
        tracing::debug!(url = %url, "redis publisher connected");
        Ok(Self {
            target: url,
            connection,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let mut connection = self.connection.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(&payload[..])
            .query_async(&mut connection)
            .await
            .map_err(|err| Error::Publish {
                topic: topic.to_string(),
                source: Box::new(err),
            })?;
        tracing::trace!(topic, receivers, "redis publish");
        Ok(())
    }
}

fn redis_url(target: &str) -> Result<String> {
    let target = target.trim();
    if target.is_empty() {
        return Err(Error::InvalidEndpoint(target.to_string()));
    }
    if target.contains("://") {
        return Ok(target.to_string());
    }
    Ok(format!("redis://{target}"))
}
