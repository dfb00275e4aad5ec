// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Client-side write latency: the sequential write loop used by the
//! ConfigMap and Secret stress add-ons, and the percentile summary they store.

use crate::config::env::{EnvBinding, Field};
use crate::kubernetes::call;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Percentiles of one write run. Every field is an output of the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Summary {
    pub test_id: String,
    pub success_total: u64,
    pub failure_total: u64,
    #[serde(with = "humantime_serde")]
    pub p50: Duration,
    #[serde(with = "humantime_serde")]
    pub p90: Duration,
    #[serde(with = "humantime_serde")]
    pub p99: Duration,
    #[serde(rename = "p99.9", with = "humantime_serde")]
    pub p99_9: Duration,
    #[serde(rename = "p99.99", with = "humantime_serde")]
    pub p99_99: Duration,
}

impl EnvBinding for Summary {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::string("test_id", &mut self.test_id).read_only(),
            Field::u64("success_total", &mut self.success_total).read_only(),
            Field::u64("failure_total", &mut self.failure_total).read_only(),
            Field::duration("p50", &mut self.p50).read_only(),
            Field::duration("p90", &mut self.p90).read_only(),
            Field::duration("p99", &mut self.p99).read_only(),
            Field::duration("p99_9", &mut self.p99_9).read_only(),
            Field::duration("p99_99", &mut self.p99_99).read_only(),
        ]
    }
}

/// Sample at index `n * numerator / denominator` of sorted samples.
fn pick(sorted: &[Duration], numerator: usize, denominator: usize) -> Duration {
    let n = sorted.len();
    if n == 0 {
        return Duration::ZERO;
    }
    if n == 1 {
        return sorted[0];
    }
    let idx = n * numerator / denominator;
    sorted[idx.min(n - 1)]
}

impl Summary {
    pub fn from_samples(mut samples: Vec<Duration>, success_total: u64, failure_total: u64) -> Self {
        samples.sort_unstable();
        Self {
            test_id: humantime::format_rfc3339_nanos(SystemTime::now()).to_string(),
            success_total,
            failure_total,
            p50: pick(&samples, 50, 100),
            p90: pick(&samples, 90, 100),
            p99: pick(&samples, 99, 100),
            p99_9: pick(&samples, 999, 1000),
            p99_99: pick(&samples, 9999, 10000),
        }
    }

    /// Two-column rendering for the progress output.
    pub fn table(&self) -> String {
        let rows = [
            ("Test ID", self.test_id.clone()),
            ("Success", self.success_total.to_string()),
            ("Failure", self.failure_total.to_string()),
            ("50-pct latency", format!("{:?}", self.p50)),
            ("90-pct latency", format!("{:?}", self.p90)),
            ("99-pct latency", format!("{:?}", self.p99)),
            ("99.9-pct latency", format!("{:?}", self.p99_9)),
            ("99.99-pct latency", format!("{:?}", self.p99_99)),
        ];
        let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or_default();
        rows.iter()
            .map(|(k, v)| format!("{k:<width$} | {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of [`write_objects`].
#[derive(Debug, Default)]
pub struct Writes {
    pub latencies: Vec<Duration>,
    pub success: u64,
    pub failure: u64,
}

impl Writes {
    pub fn summary(self) -> Summary {
        Summary::from_samples(self.latencies, self.success, self.failure)
    }
}

/// Issue `count` writes one after another, timing each. Failed writes are
/// counted and timed but do not stop the run; cancelling `stop` does.
pub async fn write_objects<F, Fut, T>(kind: &str, stop: &CancellationToken, count: usize, mut write: F) -> Writes
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    info!(kind, count, "writing objects");
    let mut writes = Writes {
        latencies: Vec::with_capacity(count),
        ..Writes::default()
    };

    for i in 0..count {
        if stop.is_cancelled() {
            warn!(kind, written = i, "writes stopped");
            break;
        }
        let start = Instant::now();
        let result = call(write(i)).await;
        writes.latencies.push(start.elapsed());

        match result {
            Ok(_) => {
                writes.success += 1;
                if i % 20 == 0 {
                    info!(kind, iteration = i, "wrote object");
                }
            }
            Err(err) => {
                writes.failure += 1;
                warn!(kind, iteration = i, error = %err, "write failed");
            }
        }
    }
    writes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env::apply_env;
    use crate::error::TesterError;
    use kube::error::ErrorResponse;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    #[test]
    fn test_percentiles() {
        let samples: Vec<u64> = (1..=100).rev().collect();
        let summary = Summary::from_samples(ms(&samples), 100, 0);
        assert_eq!(summary.p50, Duration::from_millis(51));
        assert_eq!(summary.p90, Duration::from_millis(91));
        assert_eq!(summary.p99, Duration::from_millis(100));
        assert_eq!(summary.p99_99, Duration::from_millis(100));
    }

    #[test]
    fn test_percentiles_small_samples() {
        let one = Summary::from_samples(ms(&[7]), 1, 0);
        assert_eq!(one.p50, Duration::from_millis(7));
        assert_eq!(one.p99_99, Duration::from_millis(7));

        let none = Summary::from_samples(vec![], 0, 0);
        assert_eq!(none.p90, Duration::ZERO);
    }

    #[test]
    fn test_serialized_keys() {
        let yaml = serde_yaml::to_string(&Summary::from_samples(ms(&[1, 2]), 2, 0)).unwrap();
        assert!(yaml.contains("p99.9:"));
        assert!(yaml.contains("p99.99:"));
        let back: Summary = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.p50, Duration::from_millis(2));
    }

    #[test]
    fn test_summary_is_read_only() {
        let mut summary = Summary::default();
        let lookup = |key: &str| (key == "X_P50").then(|| "1s".to_string());
        let err = apply_env("X_", &mut summary, &lookup).unwrap_err();
        assert!(matches!(err, TesterError::ReadOnlyField { .. }));
    }

    #[tokio::test]
    async fn test_write_objects_counts_failures() {
        let stop = CancellationToken::new();
        let writes = write_objects("ConfigMap", &stop, 5, |i| async move {
            if i % 2 == 0 {
                Ok(i)
            } else {
                Err(kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: "conflict".to_string(),
                    reason: "Conflict".to_string(),
                    code: 409,
                }))
            }
        })
        .await;
        assert_eq!(writes.success, 3);
        assert_eq!(writes.failure, 2);
        assert_eq!(writes.latencies.len(), 5);
    }

    #[tokio::test]
    async fn test_write_objects_stops_when_cancelled() {
        let stop = CancellationToken::new();
        let trigger = stop.clone();
        let writes = write_objects("Secret", &stop, 10, |i| {
            if i == 2 {
                trigger.cancel();
            }
            async move { Ok::<_, kube::Error>(()) }
        })
        .await;
        assert_eq!(writes.success, 3);
    }
}
