// Latency sample reduction: min/max/mean plus nearest-rank percentiles.
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Aggregate statistics over a non-empty sample set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    #[serde(rename = "min_us", serialize_with = "as_micros")]
    pub min: Duration,
    #[serde(rename = "max_us", serialize_with = "as_micros")]
    pub max: Duration,
    #[serde(rename = "mean_us", serialize_with = "as_micros")]
    pub mean: Duration,
    #[serde(rename = "p50_us", serialize_with = "as_micros")]
    pub p50: Duration,
    #[serde(rename = "p95_us", serialize_with = "as_micros")]
    pub p95: Duration,
    #[serde(rename = "p99_us", serialize_with = "as_micros")]
    pub p99: Duration,
}

/// Reduce `samples` to a summary; `None` when there is nothing to summarize.
///
/// ```
/// use eventhub_test_harness::stats::summarize;
/// use std::time::Duration;
///
/// let ms = Duration::from_millis;
/// let summary = summarize(&[ms(10), ms(20), ms(30)]).expect("non-empty");
/// assert_eq!((summary.min, summary.max, summary.mean), (ms(10), ms(30), ms(20)));
/// assert!(summarize(&[]).is_none());
/// ```
pub fn summarize(samples: &[Duration]) -> Option<LatencySummary> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let total: u128 = sorted.iter().map(Duration::as_nanos).sum();
    let mean = total / sorted.len() as u128;
    Some(LatencySummary {
        count: sorted.len(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: nanos_to_duration(mean),
        p50: percentile(&sorted, 0.50),
        p95: percentile(&sorted, 0.95),
        p99: percentile(&sorted, 0.99),
    })
}

// `sorted` must be non-empty and ascending.
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn nanos_to_duration(nanos: u128) -> Duration {
    // The mean never exceeds the largest sample, which already fits in a Duration.
    let secs = (nanos / 1_000_000_000) as u64;
    let subsec = (nanos % 1_000_000_000) as u32;
    Duration::new(secs, subsec)
}

/// Wall-clock time from `created_at` to `received_at`, clamped at zero.
pub fn elapsed_since(created_at: DateTime<Utc>, received_at: DateTime<Utc>) -> Duration {
    match (received_at - created_at).to_std() {
        Ok(elapsed) => elapsed,
        Err(_) => {
            tracing::debug!(
                %created_at,
                %received_at,
                "event stamped in the future; recording zero latency"
            );
            Duration::ZERO
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros >= 1000 {
        format!("{:.3} ms", micros as f64 / 1000.0)
    } else {
        format!("{micros} us")
    }
}

fn as_micros<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1_000_000.0)
}
