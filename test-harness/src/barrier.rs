// Counting barrier that admits exactly one signal per worker.
use crate::error::{Barrier, HarnessError};

/// Tracks which workers have signaled one phase of a run.
///
/// ```
/// use eventhub_test_harness::barrier::SignalBarrier;
/// use eventhub_test_harness::error::Barrier;
///
/// let mut barrier = SignalBarrier::new(Barrier::Connect, 2);
/// barrier.record(1).expect("first");
/// assert!(!barrier.is_complete());
/// assert!(barrier.record(1).is_err());
/// barrier.record(0).expect("second");
/// assert!(barrier.is_complete());
/// ```
#[derive(Debug)]
pub struct SignalBarrier {
    barrier: Barrier,
    seen: Vec<bool>,
    observed: usize,
}

impl SignalBarrier {
    pub fn new(barrier: Barrier, expected: usize) -> Self {
        Self {
            barrier,
            seen: vec![false; expected],
            observed: 0,
        }
    }

    /// Count a signal from `worker`. A repeat or an out-of-range id is a protocol error.
    pub fn record(&mut self, worker: usize) -> Result<(), HarnessError> {
        match self.seen.get_mut(worker) {
            Some(seen) if !*seen => {
                *seen = true;
                self.observed += 1;
                Ok(())
            }
            _ => Err(HarnessError::DuplicateSignal {
                barrier: self.barrier,
                worker,
            }),
        }
    }

    pub fn barrier(&self) -> Barrier {
        self.barrier
    }

    pub fn observed(&self) -> usize {
        self.observed
    }

    pub fn expected(&self) -> usize {
        self.seen.len()
    }

    pub fn is_complete(&self) -> bool {
        self.observed == self.seen.len()
    }
}
