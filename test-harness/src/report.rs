// Run outcomes: the success summary and the abort diagnostic with optional partial results.
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::error::HarnessError;
use crate::stats::{LatencySummary, format_duration};

/// Result of a run that passed both barriers.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    pub clients: usize,
    pub iterations: usize,
    pub published: u64,
    pub total_samples: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub latency: Option<LatencySummary>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: all clients finished successfully.", self.name)?;
        writeln!(
            f,
            "Summary of {} received events ({} published) spread across {} clients in {}:",
            self.total_samples,
            self.published,
            self.clients,
            format_duration(self.elapsed)
        )?;
        write_latency(f, self.latency.as_ref())
    }
}

/// A fatal abort, with whatever the completed workers handed over before it.
#[derive(Debug)]
pub struct RunFailure {
    pub error: HarnessError,
    pub completed_workers: usize,
    pub expected_workers: usize,
    pub published: u64,
    pub elapsed: Duration,
    pub partial: Option<LatencySummary>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run aborted ({}): {}",
            self.error.kind(),
            self.error
        )
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl RunFailure {
    /// Human summary of the results collected before the abort.
    pub fn partial_report(&self) -> String {
        let mut out = format!(
            "Partial results: {}/{} clients completed, {} events published before abort after {}:\n",
            self.completed_workers,
            self.expected_workers,
            self.published,
            format_duration(self.elapsed)
        );
        out.push_str(&LatencyLines(self.partial.as_ref()).to_string());
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.error.to_string(),
            "kind": self.error.kind(),
            "origin": self.error.origin().map(|origin| origin.to_string()),
            "completed_workers": self.completed_workers,
            "expected_workers": self.expected_workers,
            "published": self.published,
            "elapsed_ms": self.elapsed.as_secs_f64() * 1000.0,
            "partial": self.partial,
        })
    }
}

struct LatencyLines<'a>(Option<&'a LatencySummary>);

impl fmt::Display for LatencyLines<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_latency(f, self.0)
    }
}

fn write_latency(f: &mut fmt::Formatter<'_>, latency: Option<&LatencySummary>) -> fmt::Result {
    match latency {
        Some(summary) => {
            writeln!(
                f,
                "Min: {} Max: {} Avg: {}",
                format_duration(summary.min),
                format_duration(summary.max),
                format_duration(summary.mean)
            )?;
            writeln!(
                f,
                "p50: {} p95: {} p99: {} ({} samples)",
                format_duration(summary.p50),
                format_duration(summary.p95),
                format_duration(summary.p99),
                summary.count
            )
        }
        None => writeln!(f, "No latency samples were collected."),
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Barrier, Origin};
    use crate::stats::summarize;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn report_renders_summary_lines() {
        let report = RunReport {
            name: "Test 1".into(),
            clients: 3,
            iterations: 1,
            published: 1,
            total_samples: 3,
            elapsed: ms(42),
            latency: summarize(&[ms(10), ms(20), ms(30)]),
        };
        let text = report.to_string();
        assert!(text.starts_with("Test 1: all clients finished successfully.\n"));
        assert!(text.contains("Summary of 3 received events (1 published) spread across 3 clients"));
        assert!(text.contains("Min: 10.000 ms Max: 30.000 ms Avg: 20.000 ms"));
    }

    #[test]
    fn report_serializes_to_json() {
        let report = RunReport {
            name: "json".into(),
            clients: 1,
            iterations: 2,
            published: 2,
            total_samples: 2,
            elapsed: ms(5),
            latency: summarize(&[ms(1), ms(1)]),
        };
        let value = serde_json::to_value(&report).expect("json");
        assert_eq!(value["name"], "json");
        assert_eq!(value["total_samples"], 2);
        assert_eq!(value["elapsed_ms"], 5.0);
        assert_eq!(value["latency"]["count"], 2);
    }

    #[test]
    fn failure_without_samples_says_so() {
        let failure = RunFailure {
            error: HarnessError::BarrierTimeout {
                barrier: Barrier::Completion,
                waited: ms(100),
                observed: 0,
                expected: 2,
            },
            completed_workers: 0,
            expected_workers: 2,
            published: 2,
            elapsed: ms(120),
            partial: None,
        };
        assert_eq!(
            failure.to_string(),
            "run aborted (timeout): completion barrier timed out after 100ms (0/2 signals)"
        );
        assert!(failure.partial_report().contains("No latency samples were collected."));
        assert_eq!(failure.to_json()["partial"], serde_json::Value::Null);
    }

    #[test]
    fn failure_json_names_origin() {
        let failure = RunFailure {
            error: HarnessError::Read {
                origin: Origin::Worker(2),
                source: eventhub_transport::Error::Closed,
            },
            completed_workers: 1,
            expected_workers: 3,
            published: 1,
            elapsed: ms(10),
            partial: summarize(&[ms(3)]),
        };
        let value = failure.to_json();
        assert_eq!(value["kind"], "read");
        assert_eq!(value["origin"], "worker 2");
        assert_eq!(value["partial"]["count"], 1);
        assert!(failure.partial_report().starts_with("Partial results: 1/3 clients completed"));
    }
}
