use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use streambench::{
    aggregate, Benchmark, Executor, NetworkProbe, PromptSource, QueuePolicy, Recorder, Run,
    RunConfig, WARMUP_PROMPT,
};

struct FixedProbe(f64);

#[async_trait]
impl NetworkProbe for FixedProbe {
    async fn measure(&self, _host: &str, _timeout: Duration) -> Option<f64> {
        Some(self.0)
    }
}

struct DeadProbe;

#[async_trait]
impl NetworkProbe for DeadProbe {
    async fn measure(&self, _host: &str, _timeout: Duration) -> Option<f64> {
        None
    }
}

/// Emits exactly one token after a fixed delay, then completes.
struct OneTokenExecutor {
    delay: Duration,
}

#[async_trait]
impl Executor for OneTokenExecutor {
    async fn stream(&self, rec: &mut Recorder) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        rec.add_token(Some("token"));
        Ok(())
    }
}

/// Fails for prompts marked "fail", emits one token otherwise.
struct FlakyExecutor;

#[async_trait]
impl Executor for FlakyExecutor {
    async fn stream(&self, rec: &mut Recorder) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if rec.prompt.starts_with("fail") {
            return Err(anyhow!("synthetic upstream failure"));
        }
        rec.add_token(Some("token"));
        Ok(())
    }
}

/// Tracks in-flight trials and dispatch start times.
struct CountingExecutor {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
}

impl CountingExecutor {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Executor for CountingExecutor {
    async fn stream(&self, rec: &mut Recorder) -> Result<()> {
        self.starts.lock().unwrap().push(Instant::now());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        rec.add_token(Some("token"));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts invocations; fails the warmup prompt on purpose.
struct WarmupHostileExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl Executor for WarmupHostileExecutor {
    async fn stream(&self, rec: &mut Recorder) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if rec.prompt == WARMUP_PROMPT {
            return Err(anyhow!("cold start"));
        }
        rec.add_token(Some("token"));
        Ok(())
    }
}

fn unthrottled(concurrency: usize) -> QueuePolicy {
    QueuePolicy::try_new(concurrency, Duration::ZERO, 1).unwrap()
}

#[tokio::test]
async fn five_trials_measure_corrected_ttft() {
    let executor = Arc::new(OneTokenExecutor {
        delay: Duration::from_millis(50),
    });
    let benchmarks = vec![Benchmark::new("bm", "example.com", executor)];
    let config = RunConfig::try_new(5)
        .unwrap()
        .with_policy(unthrottled(5))
        .with_warmup(false);

    let results = Run::new(benchmarks, config)
        .unwrap()
        .with_probe(Arc::new(FixedProbe(10.0)))
        .run(PromptSource::fixed(vec!["hello".into()]))
        .await
        .unwrap();

    let recorders = &results["bm"];
    assert_eq!(recorders.len(), 5);
    for rec in recorders {
        assert!(!rec.failed());
        assert_eq!(rec.ping_ms(), 10.0);

        let with_network = rec.ttft_w_network();
        assert!(
            (35.0..=150.0).contains(&with_network),
            "ttft_w_network was {}ms",
            with_network
        );
        // One further ping deduction on top of the network-corrected value.
        assert!((with_network - rec.ttft() - 10.0).abs() < 1e-9);
        assert!(rec.tt_complete() >= rec.ttft());
    }

    let row = aggregate("bm", recorders, &[0.0, 0.5, 1.0]);
    assert_eq!(row.count, 5);
    assert!(row.median_ms.is_finite());
}

#[tokio::test]
async fn failed_trials_are_collected_but_excluded_from_aggregation() {
    let benchmarks = vec![Benchmark::new("bm", "example.com", Arc::new(FlakyExecutor))];
    let config = RunConfig::try_new(5)
        .unwrap()
        .with_policy(unthrottled(5))
        .with_warmup(false);

    let prompts = PromptSource::fixed(vec![
        "ok-1".into(),
        "fail-2".into(),
        "ok-3".into(),
        "fail-4".into(),
        "ok-5".into(),
    ]);
    let results = Run::new(benchmarks, config)
        .unwrap()
        .with_probe(Arc::new(FixedProbe(1.0)))
        .run(prompts)
        .await
        .unwrap();

    let recorders = &results["bm"];
    assert_eq!(recorders.len(), 5);

    let failed: Vec<_> = recorders.iter().filter(|r| r.failed()).collect();
    assert_eq!(failed.len(), 2);
    for rec in &failed {
        assert!(rec.error().is_some());
        assert!(rec.ttft().is_nan());
    }

    let row = aggregate("bm", recorders, &[0.5]);
    assert_eq!(row.count, 3);
}

#[tokio::test]
async fn queue_bounds_concurrency_and_spaces_dispatches() {
    let executor = Arc::new(CountingExecutor::new(Duration::from_millis(250)));
    let benchmarks = vec![Benchmark::new(
        "bm",
        "example.com",
        Arc::clone(&executor) as Arc<dyn Executor>,
    )];
    let policy = QueuePolicy::try_new(3, Duration::from_millis(100), 1).unwrap();
    let config = RunConfig::try_new(12)
        .unwrap()
        .with_policy(policy)
        .with_warmup(false);

    let results = Run::new(benchmarks, config)
        .unwrap()
        .with_probe(Arc::new(FixedProbe(1.0)))
        .run(PromptSource::fixed(vec!["hello".into()]))
        .await
        .unwrap();

    assert_eq!(results["bm"].len(), 12);
    assert!(results["bm"].iter().all(|r| !r.failed()));

    let max = executor.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "saw {} trials in flight", max);
    assert!(max >= 2, "queue never overlapped trials");

    let mut starts = executor.starts.lock().unwrap().clone();
    starts.sort();
    for pair in starts.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap >= Duration::from_millis(90), "dispatch gap was {:?}", gap);
    }
}

#[tokio::test]
async fn warmup_runs_once_untracked_and_tolerates_failure() {
    let executor = Arc::new(WarmupHostileExecutor {
        calls: AtomicUsize::new(0),
    });
    let benchmarks = vec![Benchmark::new(
        "bm",
        "example.com",
        Arc::clone(&executor) as Arc<dyn Executor>,
    )];
    let config = RunConfig::try_new(2)
        .unwrap()
        .with_policy(unthrottled(2))
        .with_warmup(true);

    let results = Run::new(benchmarks, config)
        .unwrap()
        .with_probe(Arc::new(FixedProbe(1.0)))
        .run(PromptSource::fixed(vec!["hello".into()]))
        .await
        .unwrap();

    // One warmup call plus two measured trials; the failed warmup is absent
    // from the collection.
    assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    assert_eq!(results["bm"].len(), 2);
    assert!(results["bm"].iter().all(|r| !r.failed()));
}

#[tokio::test]
async fn shared_queue_key_rate_limits_variants_together() {
    let delay = Duration::from_millis(10);
    let benchmarks = vec![
        Benchmark::new(
            "bm-a",
            "example.com",
            Arc::new(OneTokenExecutor { delay }) as Arc<dyn Executor>,
        )
        .with_queue_key("shared"),
        Benchmark::new(
            "bm-b",
            "example.com",
            Arc::new(OneTokenExecutor { delay }) as Arc<dyn Executor>,
        )
        .with_queue_key("shared"),
    ];
    let policy = QueuePolicy::try_new(4, Duration::from_millis(100), 1).unwrap();
    let config = RunConfig::try_new(2)
        .unwrap()
        .with_policy(policy)
        .with_warmup(false);

    let begun = Instant::now();
    let results = Run::new(benchmarks, config)
        .unwrap()
        .with_probe(Arc::new(FixedProbe(1.0)))
        .run(PromptSource::fixed(vec!["hello".into()]))
        .await
        .unwrap();

    // Four dispatches through one gate: at least three full intervals.
    assert!(begun.elapsed() >= Duration::from_millis(280));
    assert_eq!(results["bm-a"].len(), 2);
    assert_eq!(results["bm-b"].len(), 2);
}

#[tokio::test]
async fn probe_failure_degrades_correction_without_failing_the_trial() {
    let executor = Arc::new(OneTokenExecutor {
        delay: Duration::from_millis(20),
    });
    let benchmarks = vec![Benchmark::new("bm", "example.com", executor)];
    let config = RunConfig::try_new(1)
        .unwrap()
        .with_policy(unthrottled(1))
        .with_warmup(false);

    let results = Run::new(benchmarks, config)
        .unwrap()
        .with_probe(Arc::new(DeadProbe))
        .run(PromptSource::fixed(vec!["hello".into()]))
        .await
        .unwrap();

    let rec = &results["bm"][0];
    assert!(!rec.failed());
    assert_eq!(rec.ping_ms(), 0.0);
    // No correction applied: both metrics collapse to raw elapsed time.
    assert_eq!(rec.ttft(), rec.ttft_w_network());
    assert!(rec.ttft() >= 15.0);
}
