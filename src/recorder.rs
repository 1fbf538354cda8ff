use std::time::{Instant, SystemTime};

use tracing::{error, warn};

/// One streamed output unit and the moment it arrived.
#[derive(Debug, Clone)]
pub struct TokenItem {
    pub content: String,
    pub created_at: Instant,
}

/// Timing and state for a single trial: one benchmark variant against one
/// prompt. Created by the scheduler right before dispatch, mutated only
/// through its own methods while the trial runs, read-only once it lands in
/// the run-level collection.
#[derive(Debug)]
pub struct Recorder {
    pub benchmark_id: String,
    pub host: String,
    pub prompt: String,

    start_time: Option<SystemTime>,
    begin_at: Option<Instant>,
    end_at: Option<Instant>,

    tokens: Vec<TokenItem>,
    first_token_at: Option<Instant>,
    last_token_at: Option<Instant>,

    ping_ms: f64,
    failed: bool,
    error: Option<String>,
}

impl Recorder {
    pub fn new(
        benchmark_id: impl Into<String>,
        host: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            benchmark_id: benchmark_id.into(),
            host: host.into(),
            prompt: prompt.into(),
            start_time: None,
            begin_at: None,
            end_at: None,
            tokens: Vec::new(),
            first_token_at: None,
            last_token_at: None,
            ping_ms: 0.0,
            failed: false,
            error: None,
        }
    }

    /// Marks dispatch start. Call exactly once, before any token arrives.
    pub fn begin(&mut self) {
        self.begin_at = Some(Instant::now());
        self.start_time = Some(SystemTime::now());
    }

    /// Records one streamed token. Empty or absent tokens are ignored; the
    /// first non-empty token pins `first_token_at`.
    pub fn add_token(&mut self, token: Option<&str>) {
        let Some(token) = token else { return };
        if token.is_empty() {
            return;
        }

        let now = Instant::now();
        if self.first_token_at.is_none() {
            self.first_token_at = Some(now);
        }
        self.tokens.push(TokenItem {
            content: token.to_string(),
            created_at: now,
        });
    }

    /// Marks the trial finished. Call exactly once, after all token activity
    /// has ceased (including after a caught failure).
    pub fn end(&mut self) {
        self.end_at = Some(Instant::now());
        if let Some(last) = self.tokens.last() {
            self.last_token_at = Some(last.created_at);
        }
    }

    /// Permanently marks the trial failed. Metric reads stay well-defined
    /// (NaN) afterwards.
    pub fn set_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        error!("benchmark ({}) error: {}", self.benchmark_id, error);
        self.error = Some(error);
        self.failed = true;
    }

    /// Applies a round-trip measurement taken concurrently with the trial.
    /// A failed or unknown probe leaves the default of 0 and degrades
    /// correction accuracy rather than failing the trial.
    pub fn record_ping(&mut self, rtt_ms: Option<f64>) {
        if let Some(ms) = rtt_ms {
            self.ping_ms = ms;
        }

        if self.ping_ms == 0.0 {
            warn!(
                "ping failed on ({}). network latency will be included in benchmark",
                self.host
            );
        }
    }

    /// Elapsed ms to first token minus one ping deduction. NaN until a token
    /// has arrived.
    pub fn ttft_w_network(&self) -> f64 {
        match (self.begin_at, self.first_token_at) {
            (Some(begin), Some(first)) => ms_between(begin, first) - self.ping_ms,
            _ => f64::NAN,
        }
    }

    /// Time-to-first-token with a second ping deduction on top of
    /// `ttft_w_network`. NaN until a token has arrived.
    pub fn ttft(&self) -> f64 {
        self.ttft_w_network() - self.ping_ms
    }

    /// Elapsed ms from dispatch to the last recorded token. NaN when the
    /// trial produced no tokens.
    pub fn tt_complete(&self) -> f64 {
        match (self.begin_at, self.last_token_at) {
            (Some(begin), Some(last)) => ms_between(begin, last),
            _ => f64::NAN,
        }
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn ping_ms(&self) -> f64 {
        self.ping_ms
    }

    pub fn tokens(&self) -> &[TokenItem] {
        &self.tokens
    }

    pub fn first_token_at(&self) -> Option<Instant> {
        self.first_token_at
    }

    pub fn begin_at(&self) -> Option<Instant> {
        self.begin_at
    }

    pub fn end_at(&self) -> Option<Instant> {
        self.end_at
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        self.start_time
    }
}

fn ms_between(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64() * 1000.0
}
