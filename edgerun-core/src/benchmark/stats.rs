//! Aggregate statistics over benchmark observations.
//!
//! Only successful runs are recorded. Percentiles use the nearest-rank
//! method; outliers are end-to-end latencies above mean + 2σ.

use crate::benchmark::{BenchmarkStatus, BenchmarkTiming};
use crate::error::{Result, RuntimeError};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MetricStats {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSummary {
    pub count: u32,
    pub ttft: MetricStats,
    pub prefill: MetricStats,
    pub decode_tps: MetricStats,
    pub e2e: MetricStats,
    /// Observations with e2e latency > mean + 2σ.
    pub outlier_count: u32,
}

#[derive(Default)]
struct Series {
    ttft: Vec<f64>,
    prefill: Vec<f64>,
    decode_tps: Vec<f64>,
    e2e: Vec<f64>,
    count: u32,
}

/// Thread-safe collector of derived benchmark metrics.
pub struct StatsCollector {
    inner: Mutex<Series>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Series::default()),
        }
    }

    /// Record one observation. Non-successful runs are ignored.
    pub fn record(&self, timing: &BenchmarkTiming) {
        if timing.status != BenchmarkStatus::Success {
            return;
        }
        let mut series = self.inner.lock();
        let ttft = timing.ttft_ms();
        if ttft > 0.0 {
            series.ttft.push(ttft);
        }
        let prefill = timing.prefill_ms();
        if prefill > 0.0 {
            series.prefill.push(prefill);
        }
        let tps = timing.decode_tps();
        if tps > 0.0 {
            series.decode_tps.push(tps);
        }
        let e2e = timing.e2e_ms();
        if e2e > 0.0 {
            series.e2e.push(e2e);
        }
        series.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.inner.lock().count
    }

    pub fn reset(&self) {
        *self.inner.lock() = Series::default();
    }

    /// Aggregate summary. Fails `InvalidState` when nothing was recorded.
    pub fn summary(&self) -> Result<StatsSummary> {
        let series = self.inner.lock();
        if series.count == 0 {
            return Err(RuntimeError::InvalidState(
                "no benchmark observations recorded".into(),
            ));
        }

        let mut summary = StatsSummary {
            count: series.count,
            ttft: metric_stats(&series.ttft),
            prefill: metric_stats(&series.prefill),
            decode_tps: metric_stats(&series.decode_tps),
            e2e: metric_stats(&series.e2e),
            outlier_count: 0,
        };

        if !series.e2e.is_empty() {
            let threshold = summary.e2e.mean + 2.0 * summary.e2e.stddev;
            summary.outlier_count = series.e2e.iter().filter(|&&v| v > threshold).count() as u32;
        }
        Ok(summary)
    }

    /// Summary as JSON, stamped with the wall-clock export time.
    pub fn summary_json(&self) -> Result<String> {
        let summary = self.summary()?;
        let mut value = serde_json::to_value(summary)
            .map_err(|e| RuntimeError::FormatError(format!("summary serialization: {e}")))?;
        value["exported_at"] = serde_json::json!(chrono::Utc::now().to_rfc3339());
        serde_json::to_string(&value)
            .map_err(|e| RuntimeError::FormatError(format!("summary serialization: {e}")))
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn metric_stats(values: &[f64]) -> MetricStats {
    if values.is_empty() {
        return MetricStats::default();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    let stddev = if sorted.len() > 1 {
        let sum_sq: f64 = sorted.iter().map(|v| (v - mean) * (v - mean)).sum();
        (sum_sq / sorted.len() as f64).sqrt()
    } else {
        0.0
    };

    MetricStats {
        p50: percentile(&sorted, 50),
        p95: percentile(&sorted, 95),
        p99: percentile(&sorted, 99),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        stddev,
    }
}

/// Nearest-rank percentile over an ascending-sorted, non-empty slice.
fn percentile(sorted: &[f64], p: u32) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = ((p as f64 / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(e2e: i64, out_tokens: i32, status: BenchmarkStatus) -> BenchmarkTiming {
        BenchmarkTiming {
            t0_request_start_ms: 1,
            t2_prefill_start_ms: 2,
            t3_prefill_end_ms: 10,
            t4_first_token_ms: 12,
            t5_last_token_ms: 1 + e2e - 1,
            t6_request_end_ms: 1 + e2e,
            prompt_tokens: 8,
            output_tokens: out_tokens,
            status,
            error_code: 0,
        }
    }

    #[test]
    fn percentiles_are_ordered() {
        let collector = StatsCollector::new();
        for i in 1..=100 {
            collector.record(&timing(i * 10, 50, BenchmarkStatus::Success));
        }
        let summary = collector.summary().unwrap();
        assert!(summary.e2e.p50 <= summary.e2e.p95);
        assert!(summary.e2e.p95 <= summary.e2e.p99);
        assert!(summary.e2e.min <= summary.e2e.mean);
        assert!(summary.e2e.mean <= summary.e2e.max);
        assert_eq!(summary.count, 100);
    }

    #[test]
    fn failed_runs_are_excluded() {
        let collector = StatsCollector::new();
        collector.record(&timing(100, 10, BenchmarkStatus::Success));
        collector.record(&timing(5000, 10, BenchmarkStatus::Error));
        collector.record(&timing(7000, 10, BenchmarkStatus::Cancelled));
        assert_eq!(collector.count(), 1);
        let summary = collector.summary().unwrap();
        assert_eq!(summary.e2e.max, 100.0);
    }

    #[test]
    fn outliers_above_two_sigma() {
        let collector = StatsCollector::new();
        // 20 tight observations and one far outlier.
        for _ in 0..20 {
            collector.record(&timing(100, 10, BenchmarkStatus::Success));
        }
        collector.record(&timing(10_000, 10, BenchmarkStatus::Success));
        let summary = collector.summary().unwrap();
        assert_eq!(summary.outlier_count, 1);
    }

    #[test]
    fn empty_collector_is_invalid_state() {
        let collector = StatsCollector::new();
        assert!(matches!(
            collector.summary(),
            Err(RuntimeError::InvalidState(_))
        ));
    }

    #[test]
    fn reset_clears_observations() {
        let collector = StatsCollector::new();
        collector.record(&timing(100, 10, BenchmarkStatus::Success));
        collector.reset();
        assert_eq!(collector.count(), 0);
    }
}
