use std::time::Duration;

use anyhow::{anyhow, Result};

/// Concurrency and dispatch-rate policy for one trial queue: at most
/// `concurrency` trials in flight, at most `interval_cap` dispatches per
/// `interval`. Variants sharing a queue key are limited together.
#[derive(Clone, Debug)]
pub struct QueuePolicy {
    pub concurrency: usize,
    pub interval: Duration,
    pub interval_cap: u32,
}

impl QueuePolicy {
    pub fn try_new(concurrency: usize, interval: Duration, interval_cap: u32) -> Result<Self> {
        if concurrency == 0 {
            return Err(anyhow!("concurrency must be greater than zero"));
        }
        if interval_cap == 0 {
            return Err(anyhow!("interval_cap must be greater than zero"));
        }

        Ok(Self {
            concurrency,
            interval,
            interval_cap,
        })
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            concurrency: 3,
            interval: Duration::from_secs(3),
            interval_cap: 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub iterations: usize,
    pub warmup: bool,
    pub policy: QueuePolicy,
    pub ping_timeout: Duration,
    pub quantiles: Vec<f64>,
    pub report_interval: Duration,
}

impl RunConfig {
    pub fn try_new(iterations: usize) -> Result<Self> {
        if iterations == 0 {
            return Err(anyhow!("iterations must be greater than zero"));
        }

        Ok(Self {
            iterations,
            warmup: true,
            policy: QueuePolicy::default(),
            ping_timeout: Duration::from_secs(5),
            quantiles: vec![0.0, 0.25, 0.5, 0.75, 0.95, 0.99, 1.0],
            report_interval: Duration::from_secs(1),
        })
    }

    pub fn with_policy(mut self, policy: QueuePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_warmup(mut self, warmup: bool) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_ping_timeout(mut self, ping_timeout: Duration) -> Self {
        if !ping_timeout.is_zero() {
            self.ping_timeout = ping_timeout;
        }
        self
    }

    pub fn with_quantiles(mut self, quantiles: Vec<f64>) -> Result<Self> {
        if quantiles.is_empty() {
            return Err(anyhow!("at least one quantile is required"));
        }
        for &q in &quantiles {
            if !(0.0..=1.0).contains(&q) {
                return Err(anyhow!("quantile {} is outside [0, 1]", q));
            }
        }
        self.quantiles = quantiles;
        Ok(self)
    }

    pub fn with_report_interval(mut self, report_interval: Duration) -> Self {
        if !report_interval.is_zero() {
            self.report_interval = report_interval;
        }
        self
    }
}
