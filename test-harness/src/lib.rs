// Load harness for pub/sub event hubs.
//
// N client workers each hold one subscriber stream. Once all N report ready, a
// single producer publishes `iterations` checksummed events through a side
// channel. Every worker verifies each event, records its latency, and hands its
// samples back when its quota is reached. Any failure aborts the whole run.
#[macro_use]
mod macros;

pub mod barrier;
pub mod config;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod probe;
pub mod producer;
pub mod report;
pub mod stats;
pub mod worker;

pub use config::{DefinitionArgs, TestDefinition};
pub use error::{Barrier, HarnessError, Origin};
pub use orchestrator::Orchestrator;
pub use report::{RunFailure, RunReport};
pub use stats::{LatencySummary, summarize};
