use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::config::QueuePolicy;

/// Admits at most `cap` callers per `interval` window. A zero interval
/// disables rate limiting entirely.
pub struct RateGate {
    interval: Duration,
    cap: u32,
    state: Mutex<GateState>,
}

struct GateState {
    window_start: Option<Instant>,
    admitted: u32,
}

impl RateGate {
    pub fn new(interval: Duration, cap: u32) -> Self {
        Self {
            interval,
            cap,
            state: Mutex::new(GateState {
                window_start: None,
                admitted: 0,
            }),
        }
    }

    pub async fn admit(&self) {
        if self.interval.is_zero() {
            return;
        }

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                match state.window_start {
                    Some(start) if now.duration_since(start) < self.interval => {
                        if state.admitted < self.cap {
                            state.admitted += 1;
                            return;
                        }
                        self.interval - now.duration_since(start)
                    }
                    _ => {
                        state.window_start = Some(now);
                        state.admitted = 1;
                        return;
                    }
                }
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Bounds both simultaneous in-flight trials and dispatch rate for one
/// queue. Variants sharing a queue key share one of these.
pub struct TrialQueue {
    semaphore: Arc<Semaphore>,
    gate: RateGate,
}

impl TrialQueue {
    pub fn new(policy: &QueuePolicy) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(policy.concurrency)),
            gate: RateGate::new(policy.interval, policy.interval_cap),
        }
    }

    /// Waits for a concurrency slot, then for rate-gate admission, so trial
    /// starts are never closer together than the gate allows. The returned
    /// permit holds the slot until dropped.
    pub async fn admit(&self) -> OwnedSemaphorePermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("trial queue semaphore closed");
        self.gate.admit().await;
        permit
    }
}
