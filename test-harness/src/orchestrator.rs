// Test orchestrator: spawn workers, run both barriers, start the producer, reduce the samples.
//
// Workers and the producer never share mutable state with the orchestrator. They
// report through three channels (ready ids, completion hand-offs, faults) and the
// orchestrator alone counts signals and owns the combined sample list. The first
// fault, panic or missed deadline aborts every task before the run returns.
use eventhub_transport::{Connector, Publisher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::barrier::SignalBarrier;
use crate::config::TestDefinition;
use crate::error::{Barrier, HarnessError};
use crate::producer::EventProducer;
use crate::report::{RunFailure, RunReport};
use crate::stats::summarize;
use crate::worker::{ClientWorker, Completion, Signal, WorkerSignals};

/// Runs one `TestDefinition` against a subscriber connector and a publisher.
///
/// ```
/// use eventhub_test_harness::{Orchestrator, TestDefinition};
/// use eventhub_transport::MemoryHub;
///
/// let hub = MemoryHub::new();
/// hub.listen("ws://hub/test1", "eventhub.test1");
/// let definition = TestDefinition {
///     num_clients: 2,
///     iterations: 3,
///     payload_size: 16,
///     subscriber_endpoint: "ws://hub/test1".into(),
///     ..TestDefinition::default()
/// };
/// let orchestrator = Orchestrator::new(definition, hub.clone(), hub).expect("valid");
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// let report = rt.block_on(orchestrator.run()).expect("run");
/// assert_eq!(report.total_samples, 6);
/// ```
pub struct Orchestrator<C, P> {
    definition: Arc<TestDefinition>,
    connector: Arc<C>,
    publisher: Arc<P>,
}

// Everything an abort needs to tear down and report on.
struct RunState {
    tasks: JoinSet<()>,
    faults: mpsc::Receiver<HarnessError>,
    samples: Vec<Duration>,
    completed_workers: usize,
    published: Arc<AtomicU64>,
}

impl<C: Connector, P: Publisher> Orchestrator<C, P> {
    pub fn new(definition: TestDefinition, connector: C, publisher: P) -> Result<Self, HarnessError> {
        definition.validate()?;
        Ok(Self {
            definition: Arc::new(definition),
            connector: Arc::new(connector),
            publisher: Arc::new(publisher),
        })
    }

    pub fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    pub async fn run(&self) -> Result<RunReport, RunFailure> {
        let started = Instant::now();
        let (fault_tx, faults) = mpsc::channel(self.definition.num_clients + 1);
        let mut state = RunState {
            tasks: JoinSet::new(),
            faults,
            samples: Vec::with_capacity(self.definition.expected_samples()),
            completed_workers: 0,
            published: Arc::new(AtomicU64::new(0)),
        };

        if let Err(error) = self.drive(&mut state, fault_tx).await {
            error!(
                name = %self.definition.name,
                kind = error.kind(),
                error = %error,
                completed = state.completed_workers,
                "run aborted"
            );
            t_counter!("eventhub_loadtest_failures_total", "kind" => error.kind()).increment(1);
            // Aborting drops every connection still held by a worker.
            state.tasks.shutdown().await;
            return Err(RunFailure {
                error,
                completed_workers: state.completed_workers,
                expected_workers: self.definition.num_clients,
                published: state.published.load(Ordering::Relaxed),
                elapsed: started.elapsed(),
                partial: summarize(&state.samples),
            });
        }

        // Workers close their connections after completing; let them finish.
        while let Some(joined) = state.tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "task failed after the completion barrier");
            }
        }

        let report = RunReport {
            name: self.definition.name.clone(),
            clients: self.definition.num_clients,
            iterations: self.definition.iterations,
            published: state.published.load(Ordering::Relaxed),
            total_samples: state.samples.len(),
            elapsed: started.elapsed(),
            latency: summarize(&state.samples),
        };
        info!(
            name = %report.name,
            samples = report.total_samples,
            clients = report.clients,
            "all clients finished successfully"
        );
        Ok(report)
    }

    async fn drive(
        &self,
        state: &mut RunState,
        fault_tx: mpsc::Sender<HarnessError>,
    ) -> Result<(), HarnessError> {
        let definition = &self.definition;
        let num_clients = definition.num_clients;
        let (ready_tx, mut ready_rx) = mpsc::channel::<usize>(num_clients);
        let (completion_tx, mut completion_rx) = mpsc::channel::<Completion>(num_clients);
        let connect_limit = definition
            .max_concurrent_connects
            .map(|permits| Arc::new(Semaphore::new(permits)));

        info!(
            clients = num_clients,
            endpoint = %definition.subscriber_endpoint,
            "waiting for all clients to connect"
        );
        let connect_started = Instant::now();
        for id in 0..num_clients {
            let worker = ClientWorker::new(
                id,
                Arc::clone(definition),
                Arc::clone(&self.connector),
                connect_limit.clone(),
            );
            state.tasks.spawn(worker.run(WorkerSignals {
                ready: ready_tx.clone(),
                completion: completion_tx.clone(),
                faults: fault_tx.clone(),
            }));
            if let Ok(fault) = state.faults.try_recv() {
                return Err(fault);
            }
            if !definition.spawn_interval.is_zero() && id + 1 < num_clients {
                tokio::time::sleep(definition.spawn_interval).await;
            }
        }
        // Only workers hold signal senders now, so a closed channel means they all exited.
        drop(ready_tx);
        drop(completion_tx);

        let mut connect = SignalBarrier::new(Barrier::Connect, num_clients);
        await_barrier(
            &mut connect,
            &mut ready_rx,
            &mut state.faults,
            &mut state.tasks,
            definition.connect_timeout.map(|timeout| (connect_started, timeout)),
            |_ready| {},
        )
        .await?;
        info!(clients = num_clients, "all clients connected");

        let producer = EventProducer::new(Arc::clone(definition), Arc::clone(&self.publisher));
        state.published = producer.published();
        let publish_started = Instant::now();
        state.tasks.spawn(producer.run(fault_tx));
        info!(
            topic = %definition.producer_topic,
            iterations = definition.iterations,
            "producer started"
        );

        let mut completion = SignalBarrier::new(Barrier::Completion, num_clients);
        let samples = &mut state.samples;
        let completed_workers = &mut state.completed_workers;
        await_barrier(
            &mut completion,
            &mut completion_rx,
            &mut state.faults,
            &mut state.tasks,
            definition
                .completion_timeout
                .map(|timeout| (publish_started, timeout)),
            |done: Completion| {
                samples.extend(done.samples);
                *completed_workers += 1;
            },
        )
        .await
    }
}

/// Count signals until `barrier` is complete, or fail on the first fault, panic or deadline.
async fn await_barrier<T: Signal>(
    barrier: &mut SignalBarrier,
    signals: &mut mpsc::Receiver<T>,
    faults: &mut mpsc::Receiver<HarnessError>,
    tasks: &mut JoinSet<()>,
    deadline: Option<(Instant, Duration)>,
    mut accept: impl FnMut(T),
) -> Result<(), HarnessError> {
    let timeout = async move {
        match deadline {
            Some((started, timeout)) => tokio::time::sleep_until(started + timeout).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(timeout);
    let mut signals_open = true;

    while !barrier.is_complete() {
        if !signals_open && tasks.is_empty() {
            if let Ok(fault) = faults.try_recv() {
                return Err(fault);
            }
            return Err(HarnessError::BarrierStalled {
                barrier: barrier.barrier(),
                observed: barrier.observed(),
                expected: barrier.expected(),
            });
        }
        tokio::select! {
            biased;
            Some(fault) = faults.recv() => return Err(fault),
            signal = signals.recv(), if signals_open => match signal {
                Some(signal) => {
                    let worker = signal.worker();
                    barrier.record(worker)?;
                    accept(signal);
                    debug!(
                        barrier = %barrier.barrier(),
                        worker,
                        observed = barrier.observed(),
                        expected = barrier.expected(),
                        "barrier signal"
                    );
                }
                None => signals_open = false,
            },
            joined = tasks.join_next(), if !tasks.is_empty() => {
                if let Some(Err(err)) = joined
                    && err.is_panic()
                {
                    return Err(HarnessError::panicked(err));
                }
            }
            () = &mut timeout => {
                return Err(HarnessError::BarrierTimeout {
                    barrier: barrier.barrier(),
                    waited: deadline.map(|(_, timeout)| timeout).unwrap_or_default(),
                    observed: barrier.observed(),
                    expected: barrier.expected(),
                });
            }
        }
    }
    Ok(())
}
