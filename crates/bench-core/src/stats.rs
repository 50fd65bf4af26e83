use crate::executor::{ErrorKind, Outcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Latency,
    Throughput,
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestType::Latency => f.write_str("latency"),
            TestType::Throughput => f.write_str("throughput"),
        }
    }
}

/// Latency distribution in milliseconds; every field is `None` when there
/// were no successful samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub mean_ms: Option<f64>,
    pub stdev_ms: Option<f64>,
}

impl LatencySummary {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

        Self {
            min_ms: sorted.first().copied(),
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
            max_ms: sorted.last().copied(),
            mean_ms: Some(mean),
            stdev_ms: Some(variance.sqrt()),
        }
    }
}

/// Interpolated percentile over an ascending slice.
///
/// The rank is `p/100 * (n-1)`; values between the two nearest ranks are
/// linearly interpolated.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Aggregate of one benchmark run, computed once after every outcome is in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub test_type: TestType,
    pub timestamp: String,
    /// Requested number of requests
    pub num_requests: usize,
    pub concurrent_clients: usize,
    /// Outcomes actually collected (less than requested if stopped early)
    pub completed_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    /// Fraction in [0, 1]
    pub success_rate: f64,
    pub predicted_fraud: usize,
    pub total_duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput_rps: Option<f64>,
    pub latency: LatencySummary,
    pub inference_latency: LatencySummary,
    pub errors: BTreeMap<ErrorKind, usize>,
}

impl BenchmarkRun {
    /// No successful request: latency blocks are empty.
    pub fn is_degenerate(&self) -> bool {
        self.successful_requests == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub test_type: TestType,
    pub requests: usize,
    pub concurrency: usize,
}

/// Reduce outcomes into a [`BenchmarkRun`]. Latency statistics only cover
/// successful outcomes.
pub fn aggregate(outcomes: &[Outcome], run_duration: Duration, settings: RunSettings) -> BenchmarkRun {
    let completed = outcomes.len();
    let successes: Vec<&Outcome> = outcomes.iter().filter(|o| o.is_success()).collect();
    let successful = successes.len();

    let mut errors = BTreeMap::new();
    for kind in outcomes.iter().filter_map(Outcome::error_kind) {
        *errors.entry(kind).or_insert(0) += 1;
    }

    let total_ms: Vec<f64> = successes.iter().map(|o| as_ms(o.total_time)).collect();
    let inference_ms: Vec<f64> = successes.iter().map(|o| as_ms(o.inference_time)).collect();

    let secs = run_duration.as_secs_f64();
    let throughput_rps = match settings.test_type {
        TestType::Throughput if secs > 0.0 => Some(completed as f64 / secs),
        TestType::Throughput => Some(0.0),
        TestType::Latency => None,
    };

    BenchmarkRun {
        test_type: settings.test_type,
        timestamp: chrono::Utc::now().to_rfc3339(),
        num_requests: settings.requests,
        concurrent_clients: settings.concurrency,
        completed_requests: completed,
        successful_requests: successful,
        failed_requests: completed - successful,
        success_rate: if completed > 0 {
            successful as f64 / completed as f64
        } else {
            0.0
        },
        predicted_fraud: successes.iter().filter(|o| o.is_fraud()).count(),
        total_duration_seconds: secs,
        throughput_rps,
        latency: LatencySummary::from_samples(&total_ms),
        inference_latency: LatencySummary::from_samples(&inference_ms),
        errors,
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::OutcomeStatus;
    use chrono::Utc;

    fn outcome(total_ms: u64, inference_ms: u64, status: OutcomeStatus) -> Outcome {
        Outcome {
            encode_time: Duration::from_micros(10),
            inference_time: Duration::from_millis(inference_ms),
            total_time: Duration::from_millis(total_ms),
            attempts: 1,
            status,
            completed_at: Utc::now(),
        }
    }

    fn ok(total_ms: u64, score: f64) -> Outcome {
        outcome(
            total_ms,
            total_ms.saturating_sub(1),
            OutcomeStatus::Success {
                score,
                is_fraud: score > 0.5,
            },
        )
    }

    fn failure(kind: ErrorKind) -> Outcome {
        outcome(
            5,
            0,
            OutcomeStatus::Failure {
                kind,
                message: "boom".to_string(),
            },
        )
    }

    fn settings(test_type: TestType, requests: usize) -> RunSettings {
        RunSettings {
            test_type,
            requests,
            concurrency: 4,
        }
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), Some(1.0));
        assert_eq!(percentile(&sorted, 50.0), Some(2.5));
        assert_eq!(percentile(&sorted, 100.0), Some(4.0));
        // rank = 0.95 * 3 = 2.85
        let p95 = percentile(&sorted, 95.0).unwrap();
        assert!((p95 - 3.85).abs() < 1e-9);
        assert_eq!(percentile(&[7.0], 99.0), Some(7.0));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_percentiles_are_ordered() {
        let samples: Vec<f64> = (0..997).map(|i| ((i * 7919) % 1000) as f64 / 3.0).collect();
        let observed_max = samples.iter().cloned().fold(f64::MIN, f64::max);
        let s = LatencySummary::from_samples(&samples);

        let (p50, p95, p99, max) = (
            s.p50_ms.unwrap(),
            s.p95_ms.unwrap(),
            s.p99_ms.unwrap(),
            s.max_ms.unwrap(),
        );
        assert!(s.min_ms.unwrap() <= p50);
        assert!(p50 <= p95 && p95 <= p99 && p99 <= max);
        assert!(max <= observed_max);
    }

    #[test]
    fn test_mean_and_population_stdev() {
        let s = LatencySummary::from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(s.mean_ms, Some(5.0));
        assert_eq!(s.stdev_ms, Some(2.0));
    }

    #[test]
    fn test_aggregate_counts_and_throughput() {
        let outcomes = vec![
            ok(10, 0.9),
            ok(20, 0.1),
            ok(30, 0.7),
            failure(ErrorKind::Status),
            failure(ErrorKind::Transport),
            failure(ErrorKind::Transport),
        ];
        let run = aggregate(
            &outcomes,
            Duration::from_secs(2),
            settings(TestType::Throughput, 6),
        );

        assert_eq!(run.completed_requests, 6);
        assert_eq!(run.successful_requests, 3);
        assert_eq!(run.failed_requests, 3);
        assert!((run.success_rate - 0.5).abs() < 1e-12);
        assert_eq!(run.throughput_rps, Some(3.0));
        assert_eq!(run.predicted_fraud, 2);
        assert_eq!(run.errors.get(&ErrorKind::Transport), Some(&2));
        assert_eq!(run.errors.get(&ErrorKind::Status), Some(&1));
        // Failures (5ms) are excluded from latency
        assert_eq!(run.latency.min_ms, Some(10.0));
        assert_eq!(run.latency.p50_ms, Some(20.0));
        assert_eq!(run.inference_latency.max_ms, Some(29.0));
    }

    #[test]
    fn test_latency_mode_has_no_throughput() {
        let run = aggregate(
            &[ok(10, 0.2)],
            Duration::from_millis(10),
            settings(TestType::Latency, 1),
        );
        assert_eq!(run.throughput_rps, None);
        let json = serde_json::to_value(&run).unwrap();
        assert!(json.get("throughput_rps").is_none());
    }

    #[test]
    fn test_all_failures_is_degenerate_not_error() {
        let outcomes: Vec<Outcome> = (0..10).map(|_| failure(ErrorKind::RetryableStatus)).collect();
        let run = aggregate(
            &outcomes,
            Duration::from_secs(1),
            settings(TestType::Throughput, 10),
        );

        assert!(run.is_degenerate());
        assert_eq!(run.success_rate, 0.0);
        assert_eq!(run.latency, LatencySummary::default());
        assert_eq!(run.inference_latency, LatencySummary::default());

        let json = serde_json::to_value(&run).unwrap();
        assert!(json["latency"]["p99_ms"].is_null());
        assert!(json["inference_latency"]["mean_ms"].is_null());
        assert_eq!(json["errors"]["retryable_status"], 10);
    }

    #[test]
    fn test_empty_run() {
        let run = aggregate(&[], Duration::ZERO, settings(TestType::Throughput, 100));
        assert_eq!(run.completed_requests, 0);
        assert_eq!(run.success_rate, 0.0);
        assert_eq!(run.throughput_rps, Some(0.0));
    }
}
