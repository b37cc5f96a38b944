// Fatal run failures, tagged with the task that raised them.
use std::fmt;
use std::time::Duration;

/// Which execution unit a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Worker(usize),
    Producer,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Worker(id) => write!(f, "worker {id}"),
            Origin::Producer => f.write_str("producer"),
        }
    }
}

/// The two synchronization points of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    Connect,
    Completion,
}

impl fmt::Display for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Barrier::Connect => f.write_str("connect"),
            Barrier::Completion => f.write_str("completion"),
        }
    }
}

/// Every failure here is fatal: the orchestrator aborts the run on the first one.
#[derive(thiserror::Error, Debug)]
pub enum HarnessError {
    #[error("{origin}: connect failed")]
    Connect {
        origin: Origin,
        #[source]
        source: eventhub_transport::Error,
    },
    #[error("{origin}: read failed")]
    Read {
        origin: Origin,
        #[source]
        source: eventhub_transport::Error,
    },
    #[error("{origin}: received malformed event")]
    Decode {
        origin: Origin,
        #[source]
        source: eventhub_wire::Error,
    },
    #[error("{origin}: integrity violation on event {sequence_id}")]
    Integrity {
        origin: Origin,
        sequence_id: u64,
        #[source]
        source: eventhub_wire::Error,
    },
    #[error("{origin}: publish of event {sequence_id} failed")]
    Publish {
        origin: Origin,
        sequence_id: u64,
        #[source]
        source: PublishFailure,
    },
    #[error("{barrier} barrier timed out after {waited:?} ({observed}/{expected} signals)")]
    BarrierTimeout {
        barrier: Barrier,
        waited: Duration,
        observed: usize,
        expected: usize,
    },
    #[error("{barrier} barrier stalled: every task exited after {observed}/{expected} signals")]
    BarrierStalled {
        barrier: Barrier,
        observed: usize,
        expected: usize,
    },
    #[error("harness task panicked: {message}")]
    WorkerPanicked { message: String },
    #[error("duplicate {barrier} signal from worker {worker}")]
    DuplicateSignal { barrier: Barrier, worker: usize },
    #[error("invalid test definition: {0}")]
    InvalidDefinition(String),
}

/// Publish can fail in the adapter or while encoding the packet.
#[derive(thiserror::Error, Debug)]
pub enum PublishFailure {
    #[error(transparent)]
    Encode(#[from] eventhub_wire::Error),
    #[error(transparent)]
    Transport(#[from] eventhub_transport::Error),
}

impl HarnessError {
    /// Stable lowercase label, used in logs and the `failures_total` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Connect { .. } => "connect",
            HarnessError::Read { .. } => "read",
            HarnessError::Decode { .. } => "decode",
            HarnessError::Integrity { .. } => "integrity",
            HarnessError::Publish { .. } => "publish",
            HarnessError::BarrierTimeout { .. } => "timeout",
            HarnessError::WorkerPanicked { .. } => "panic",
            HarnessError::BarrierStalled { .. } | HarnessError::DuplicateSignal { .. } => {
                "protocol"
            }
            HarnessError::InvalidDefinition(_) => "config",
        }
    }

    pub fn origin(&self) -> Option<Origin> {
        match self {
            HarnessError::Connect { origin, .. }
            | HarnessError::Read { origin, .. }
            | HarnessError::Decode { origin, .. }
            | HarnessError::Integrity { origin, .. }
            | HarnessError::Publish { origin, .. } => Some(*origin),
            HarnessError::DuplicateSignal { worker, .. } => Some(Origin::Worker(*worker)),
            HarnessError::BarrierTimeout { .. }
            | HarnessError::BarrierStalled { .. }
            | HarnessError::WorkerPanicked { .. }
            | HarnessError::InvalidDefinition(_) => None,
        }
    }

    pub(crate) fn panicked(err: tokio::task::JoinError) -> Self {
        let message = match err.try_into_panic() {
            Ok(payload) => payload
                .downcast_ref::<&str>()
                .map(|message| message.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string()),
            Err(err) => err.to_string(),
        };
        HarnessError::WorkerPanicked { message }
    }
}
