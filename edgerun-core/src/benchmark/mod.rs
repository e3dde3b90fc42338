//! Benchmark timing instrumentation.
//!
//! Every inference call captures six timestamps against the platform's
//! monotonic clock: request start, prefill start/end, first/last token, and
//! request end. Derived metrics (TTFT, prefill duration, decode tokens/sec,
//! end-to-end latency) are computed from the raw timestamps, never stored.
//!
//! Timing is opt-in and zero-cost when unused: backends fill in what they
//! observe, the component stamps the request boundaries.

pub mod stats;

pub use stats::{StatsCollector, StatsSummary};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkStatus {
    #[default]
    Success,
    Error,
    Cancelled,
}

impl BenchmarkStatus {
    pub fn as_i32(&self) -> i32 {
        match self {
            BenchmarkStatus::Success => 0,
            BenchmarkStatus::Error => 1,
            BenchmarkStatus::Cancelled => 2,
        }
    }
}

/// Raw timestamps for one inference call, in monotonic milliseconds.
/// A zero timestamp means "not captured"; derived metrics treat it as absent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkTiming {
    pub t0_request_start_ms: i64,
    pub t2_prefill_start_ms: i64,
    pub t3_prefill_end_ms: i64,
    pub t4_first_token_ms: i64,
    pub t5_last_token_ms: i64,
    pub t6_request_end_ms: i64,
    pub prompt_tokens: i32,
    pub output_tokens: i32,
    pub status: BenchmarkStatus,
    pub error_code: i32,
}

/// Difference of two captured timestamps; 0.0 when either was not captured.
fn safe_diff(end_ms: i64, start_ms: i64) -> f64 {
    if end_ms <= 0 || start_ms <= 0 {
        return 0.0;
    }
    (end_ms - start_ms) as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl BenchmarkTiming {
    /// Time to first token: t4 - t0.
    pub fn ttft_ms(&self) -> f64 {
        safe_diff(self.t4_first_token_ms, self.t0_request_start_ms)
    }

    /// Prefill duration: t3 - t2.
    pub fn prefill_ms(&self) -> f64 {
        safe_diff(self.t3_prefill_end_ms, self.t2_prefill_start_ms)
    }

    /// Decode duration: t5 - t3.
    pub fn decode_ms(&self) -> f64 {
        safe_diff(self.t5_last_token_ms, self.t3_prefill_end_ms)
    }

    /// End-to-end latency: t6 - t0.
    pub fn e2e_ms(&self) -> f64 {
        safe_diff(self.t6_request_end_ms, self.t0_request_start_ms)
    }

    /// Decode throughput: output_tokens / (t5 - t3) * 1000.
    pub fn decode_tps(&self) -> f64 {
        let decode_ms = self.decode_ms();
        if decode_ms <= 0.0 || self.output_tokens <= 0 {
            return 0.0;
        }
        self.output_tokens as f64 / decode_ms * 1000.0
    }

    /// JSON export. Key set and spelling are part of the external contract.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "t0_request_start_ms": self.t0_request_start_ms,
            "t2_prefill_start_ms": self.t2_prefill_start_ms,
            "t3_prefill_end_ms": self.t3_prefill_end_ms,
            "t4_first_token_ms": self.t4_first_token_ms,
            "t5_last_token_ms": self.t5_last_token_ms,
            "t6_request_end_ms": self.t6_request_end_ms,
            "prompt_tokens": self.prompt_tokens,
            "output_tokens": self.output_tokens,
            "status": self.status.as_i32(),
            "error_code": self.error_code,
            "ttft_ms": round2(self.ttft_ms()),
            "prefill_ms": round2(self.prefill_ms()),
            "decode_ms": round2(self.decode_ms()),
            "e2e_ms": round2(self.e2e_ms()),
            "decode_tps": round2(self.decode_tps()),
        })
        .to_string()
    }

    /// CSV header matching [`Self::to_csv_row`] column for column.
    pub fn csv_header() -> &'static str {
        "t0_request_start_ms,t2_prefill_start_ms,t3_prefill_end_ms,\
         t4_first_token_ms,t5_last_token_ms,t6_request_end_ms,\
         prompt_tokens,output_tokens,status,error_code,\
         ttft_ms,prefill_ms,decode_ms,e2e_ms,decode_tps"
    }

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{:.2},{:.2},{:.2},{:.2},{:.2}",
            self.t0_request_start_ms,
            self.t2_prefill_start_ms,
            self.t3_prefill_end_ms,
            self.t4_first_token_ms,
            self.t5_last_token_ms,
            self.t6_request_end_ms,
            self.prompt_tokens,
            self.output_tokens,
            self.status.as_i32(),
            self.error_code,
            self.ttft_ms(),
            self.prefill_ms(),
            self.decode_ms(),
            self.e2e_ms(),
            self.decode_tps(),
        )
    }
}
