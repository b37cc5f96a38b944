// Client worker: one subscriber connection, verified receipt, latency samples.
use chrono::Utc;
use eventhub_transport::{Connection, Connector};
use eventhub_wire::{Command, EventPacket};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, trace, warn};

use crate::config::TestDefinition;
use crate::error::{HarnessError, Origin};
use crate::stats::elapsed_since;

/// Completion hand-off: ownership of a worker's samples moves to the orchestrator.
#[derive(Debug)]
pub struct Completion {
    pub worker: usize,
    pub samples: Vec<Duration>,
}

/// Anything a barrier can count.
pub trait Signal {
    fn worker(&self) -> usize;
}

impl Signal for usize {
    fn worker(&self) -> usize {
        *self
    }
}

impl Signal for Completion {
    fn worker(&self) -> usize {
        self.worker
    }
}

/// Channels a worker reports on. Each worker sends at most one message per channel.
pub struct WorkerSignals {
    pub ready: mpsc::Sender<usize>,
    pub completion: mpsc::Sender<Completion>,
    pub faults: mpsc::Sender<HarnessError>,
}

/// Lifecycle of a worker; `Failed` is reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Connecting,
    Ready,
    Receiving,
    Completed,
    Failed,
}

pub struct ClientWorker<C> {
    id: usize,
    definition: Arc<TestDefinition>,
    connector: Arc<C>,
    connect_limit: Option<Arc<Semaphore>>,
    state: WorkerState,
}

impl<C: Connector> ClientWorker<C> {
    pub fn new(
        id: usize,
        definition: Arc<TestDefinition>,
        connector: Arc<C>,
        connect_limit: Option<Arc<Semaphore>>,
    ) -> Self {
        Self {
            id,
            definition,
            connector,
            connect_limit,
            state: WorkerState::Connecting,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run to completion. Failures go to the fault channel instead of the caller.
    pub async fn run(mut self, signals: WorkerSignals) {
        let WorkerSignals {
            ready,
            completion,
            faults,
        } = signals;
        if let Err(err) = self.execute(ready, completion).await {
            self.transition(WorkerState::Failed);
            debug!(worker = self.id, kind = err.kind(), error = %err, "worker failed");
            // The orchestrator may already be gone if another task failed first.
            let _ = faults.send(err).await;
        }
    }

    async fn execute(
        &mut self,
        ready: mpsc::Sender<usize>,
        completion: mpsc::Sender<Completion>,
    ) -> Result<(), HarnessError> {
        let origin = Origin::Worker(self.id);
        let mut connection = self.connect().await?;
        for topic in &self.definition.subscribe {
            let command = Command::Subscribe(topic.clone()).encode();
            connection
                .send(command.into())
                .await
                .map_err(|source| HarnessError::Connect { origin, source })?;
        }

        self.transition(WorkerState::Ready);
        t_counter!("eventhub_loadtest_clients_ready_total").increment(1);
        if ready.send(self.id).await.is_err() {
            return Ok(());
        }
        drop(ready);

        self.transition(WorkerState::Receiving);
        let samples = self.receive_quota(&mut connection).await?;

        self.transition(WorkerState::Completed);
        let _ = completion
            .send(Completion {
                worker: self.id,
                samples,
            })
            .await;
        if let Err(err) = connection.close().await {
            warn!(worker = self.id, error = %err, "close after completion failed");
        }
        Ok(())
    }

    async fn connect(&self) -> Result<C::Connection, HarnessError> {
        // Held until this attempt resolves either way.
        let _permit = match &self.connect_limit {
            Some(limit) => limit.acquire().await.ok(),
            None => None,
        };
        self.connector
            .connect(&self.definition.subscriber_endpoint)
            .await
            .map_err(|source| HarnessError::Connect {
                origin: Origin::Worker(self.id),
                source,
            })
    }

    /// Read until exactly `iterations` events verified; nothing is read past that.
    async fn receive_quota(
        &self,
        connection: &mut C::Connection,
    ) -> Result<Vec<Duration>, HarnessError> {
        let origin = Origin::Worker(self.id);
        let iterations = self.definition.iterations;
        let mut samples = Vec::with_capacity(iterations);
        while samples.len() < iterations {
            let message = connection
                .receive()
                .await
                .map_err(|source| HarnessError::Read { origin, source })?;
            let received_at = Utc::now();
            let packet = EventPacket::decode(&message)
                .map_err(|source| HarnessError::Decode { origin, source })?;
            packet.verify().map_err(|source| HarnessError::Integrity {
                origin,
                sequence_id: packet.sequence_id,
                source,
            })?;
            let latency = elapsed_since(packet.created_at, received_at);
            samples.push(latency);
            t_counter!("eventhub_loadtest_events_verified_total").increment(1);
            t_histogram!("eventhub_loadtest_latency_us").record(latency.as_secs_f64() * 1e6);
            trace!(
                worker = self.id,
                sequence_id = packet.sequence_id,
                latency_us = latency.as_micros() as u64,
                "event verified"
            );
        }
        Ok(samples)
    }

    fn transition(&mut self, next: WorkerState) {
        trace!(worker = self.id, from = ?self.state, to = ?next, "worker state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use eventhub_transport::{MemoryHub, Publisher};

    const ENDPOINT: &str = "ws://hub/test1";
    const TOPIC: &str = "eventhub.test1";

    struct Harness {
        hub: MemoryHub,
        ready: mpsc::Receiver<usize>,
        completion: mpsc::Receiver<Completion>,
        faults: mpsc::Receiver<HarnessError>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_worker(definition: TestDefinition) -> Harness {
        let hub = MemoryHub::new();
        hub.listen(ENDPOINT, TOPIC);
        let (ready_tx, ready) = mpsc::channel(1);
        let (completion_tx, completion) = mpsc::channel(1);
        let (faults_tx, faults) = mpsc::channel(1);
        let worker = ClientWorker::new(4, Arc::new(definition), Arc::new(hub.clone()), None);
        let task = tokio::spawn(worker.run(WorkerSignals {
            ready: ready_tx,
            completion: completion_tx,
            faults: faults_tx,
        }));
        Harness {
            hub,
            ready,
            completion,
            faults,
            task,
        }
    }

    fn definition(iterations: usize) -> TestDefinition {
        TestDefinition {
            num_clients: 1,
            iterations,
            payload_size: 5,
            subscriber_endpoint: ENDPOINT.into(),
            producer_topic: TOPIC.into(),
            ..TestDefinition::default()
        }
    }

    async fn publish_packet(hub: &MemoryHub, topic: &str, packet: &EventPacket) {
        hub.publish(topic, packet.encode().expect("encode"))
            .await
            .expect("publish");
    }

    #[tokio::test]
    async fn signals_ready_then_completes_with_its_quota() {
        let mut harness = spawn_worker(definition(2));
        assert_eq!(harness.ready.recv().await, Some(4));
        for sequence_id in 0..2 {
            let packet = EventPacket::new(sequence_id, EventPacket::filler(5));
            publish_packet(&harness.hub, TOPIC, &packet).await;
        }
        let completion = harness.completion.recv().await.expect("completion");
        assert_eq!(completion.worker, 4);
        assert_eq!(completion.samples.len(), 2);
        harness.task.await.expect("join");
        assert!(harness.faults.recv().await.is_none());
        // The connection is released once the worker exits.
        assert_eq!(harness.hub.subscriber_count(TOPIC), 0);
    }

    #[tokio::test]
    async fn corrupted_payload_is_an_integrity_failure() {
        let mut harness = spawn_worker(definition(1));
        harness.ready.recv().await.expect("ready");
        let mut packet = EventPacket::new(9, EventPacket::filler(5));
        packet.payload.replace_range(0..1, "+");
        publish_packet(&harness.hub, TOPIC, &packet).await;
        let fault = harness.faults.recv().await.expect("fault");
        assert!(matches!(
            fault,
            HarnessError::Integrity {
                origin: Origin::Worker(4),
                sequence_id: 9,
                ..
            }
        ));
        assert!(harness.completion.recv().await.is_none());
    }

    #[tokio::test]
    async fn garbage_is_a_decode_failure() {
        let mut harness = spawn_worker(definition(1));
        harness.ready.recv().await.expect("ready");
        harness
            .hub
            .publish(TOPIC, Bytes::from_static(b"{not json"))
            .await
            .expect("publish");
        let fault = harness.faults.recv().await.expect("fault");
        assert_eq!(fault.kind(), "decode");
    }

    #[tokio::test]
    async fn dropped_stream_is_a_read_failure() {
        let mut harness = spawn_worker(definition(3));
        harness.ready.recv().await.expect("ready");
        harness.hub.disconnect_all();
        let fault = harness.faults.recv().await.expect("fault");
        assert!(matches!(fault, HarnessError::Read { .. }));
    }

    #[tokio::test]
    async fn unknown_endpoint_fails_before_ready() {
        let mut harness = spawn_worker(TestDefinition {
            subscriber_endpoint: "ws://hub/missing".into(),
            ..definition(1)
        });
        let fault = harness.faults.recv().await.expect("fault");
        assert_eq!(fault.kind(), "connect");
        assert!(harness.ready.recv().await.is_none());
    }

    #[tokio::test]
    async fn subscribes_to_extra_topics_before_ready() {
        let mut harness = spawn_worker(TestDefinition {
            subscribe: vec!["eventhub.extra".into()],
            ..definition(1)
        });
        harness.ready.recv().await.expect("ready");
        assert_eq!(harness.hub.subscriber_count("eventhub.extra"), 1);
        let packet = EventPacket::new(0, EventPacket::filler(5));
        publish_packet(&harness.hub, "eventhub.extra", &packet).await;
        let completion = harness.completion.recv().await.expect("completion");
        assert_eq!(completion.samples.len(), 1);
    }

    #[tokio::test]
    async fn connect_limit_is_released_after_connecting() {
        let hub = MemoryHub::new();
        hub.listen(ENDPOINT, TOPIC);
        let limit = Arc::new(Semaphore::new(1));
        let worker = ClientWorker::new(
            0,
            Arc::new(definition(1)),
            Arc::new(hub),
            Some(limit.clone()),
        );
        let connection = worker.connect().await.expect("connect");
        assert_eq!(limit.available_permits(), 1);
        drop(connection);
    }
}
