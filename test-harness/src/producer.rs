// Event producer: stamps, seals and publishes one packet per iteration.
use eventhub_transport::Publisher;
use eventhub_wire::EventPacket;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::TestDefinition;
use crate::error::{HarnessError, Origin};

pub struct EventProducer<P> {
    definition: Arc<TestDefinition>,
    publisher: Arc<P>,
    published: Arc<AtomicU64>,
}

impl<P: Publisher> EventProducer<P> {
    pub fn new(definition: Arc<TestDefinition>, publisher: Arc<P>) -> Self {
        Self {
            definition,
            publisher,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared count of successful publish calls, readable while the producer runs.
    pub fn published(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.published)
    }

    /// Publish every event, reporting a failure on `faults` instead of returning it.
    pub async fn run(self, faults: mpsc::Sender<HarnessError>) {
        match self.publish_all().await {
            Ok(published) => debug!(published, "producer finished"),
            Err(err) => {
                debug!(kind = err.kind(), error = %err, "producer failed");
                let _ = faults.send(err).await;
            }
        }
    }

    /// Publish `iterations` packets in sequence order; the first failure stops the run.
    pub async fn publish_all(&self) -> Result<u64, HarnessError> {
        let topic = self.definition.producer_topic.as_str();
        let payload = EventPacket::filler(self.definition.payload_size);
        let iterations = self.definition.iterations as u64;
        for sequence_id in 0..iterations {
            let packet = EventPacket::new(sequence_id, payload.clone());
            let encoded = packet.encode().map_err(|source| HarnessError::Publish {
                origin: Origin::Producer,
                sequence_id,
                source: source.into(),
            })?;
            self.publisher
                .publish(topic, encoded)
                .await
                .map_err(|source| HarnessError::Publish {
                    origin: Origin::Producer,
                    sequence_id,
                    source: source.into(),
                })?;
            self.published.fetch_add(1, Ordering::Relaxed);
            t_counter!("eventhub_loadtest_events_published_total").increment(1);
            trace!(sequence_id, topic, "event published");
        }
        Ok(iterations)
    }
}
