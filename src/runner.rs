use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant as TokioInstant, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::executor::Executor;
use crate::probe::{NetworkProbe, TcpProbe};
use crate::prompt::PromptSource;
use crate::queue::TrialQueue;
use crate::recorder::Recorder;
use crate::report;

/// Prompt used for the untracked warmup trial of each variant.
pub const WARMUP_PROMPT: &str = "Tell me a joke";

/// Run-level collection: variant id to completed recorders, append-only for
/// the lifetime of the run.
pub type RunMap = HashMap<String, Vec<Recorder>>;

/// One benchmark variant: a named configuration under test. Immutable once
/// the run starts.
pub struct Benchmark {
    pub id: String,
    pub host: String,
    pub executor: Arc<dyn Executor>,
    pub queue_key: Option<String>,
}

impl Benchmark {
    pub fn new(id: impl Into<String>, host: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            executor,
            queue_key: None,
        }
    }

    /// Variants sharing a queue key are rate-limited and concurrency-limited
    /// together instead of independently.
    pub fn with_queue_key(mut self, queue_key: impl Into<String>) -> Self {
        self.queue_key = Some(queue_key.into());
        self
    }

    fn queue_key(&self) -> &str {
        self.queue_key.as_deref().unwrap_or(&self.id)
    }
}

/// Owns one run: configuration, the variants, and the live-reporting timer.
/// Construct, `run`, read the returned collection; nothing is shared across
/// runs.
pub struct Run {
    benchmarks: Vec<Benchmark>,
    config: RunConfig,
    probe: Arc<dyn NetworkProbe>,
}

impl Run {
    pub fn new(benchmarks: Vec<Benchmark>, config: RunConfig) -> Result<Self> {
        if benchmarks.is_empty() {
            return Err(anyhow!("at least one benchmark is required"));
        }
        for (i, bm) in benchmarks.iter().enumerate() {
            if benchmarks[..i].iter().any(|other| other.id == bm.id) {
                return Err(anyhow!("duplicate benchmark id: {}", bm.id));
            }
        }

        Ok(Self {
            benchmarks,
            config,
            probe: Arc::new(TcpProbe::default()),
        })
    }

    pub fn with_probe(mut self, probe: Arc<dyn NetworkProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Runs every scheduled trial to settlement and returns the run-level
    /// collection. Individual trial failures are recorded, never fatal.
    pub async fn run(self, mut prompts: PromptSource) -> Result<RunMap> {
        let prompts = prompts
            .take(self.config.iterations)
            .context("failed to materialize prompts")?;

        let mut results: RunMap = HashMap::new();
        let mut queues: HashMap<String, Arc<TrialQueue>> = HashMap::new();
        for bm in &self.benchmarks {
            results.insert(bm.id.clone(), Vec::new());
            queues
                .entry(bm.queue_key().to_string())
                .or_insert_with(|| Arc::new(TrialQueue::new(&self.config.policy)));
        }

        if self.config.warmup {
            for bm in &self.benchmarks {
                info!("{}: warmup started", bm.id);
                let mut rec = Recorder::new(&bm.id, &bm.host, WARMUP_PROMPT);
                match bm.executor.stream(&mut rec).await {
                    Ok(()) => info!("{}: warmup complete", bm.id),
                    Err(err) => warn!("{}: warmup failed: {:#}", bm.id, err),
                }
            }
        }

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(collect_results(
            done_rx,
            results,
            self.config.quantiles.clone(),
            self.config.report_interval,
        ));

        let mut join_set = JoinSet::new();
        let variant_count = self.benchmarks.len() as u32;
        for (index, bm) in self.benchmarks.iter().enumerate() {
            info!("{}: scheduling", bm.id);
            let queue = Arc::clone(&queues[bm.queue_key()]);
            for prompt in &prompts {
                join_set.spawn(run_trial(Trial {
                    benchmark_id: bm.id.clone(),
                    host: bm.host.clone(),
                    prompt: prompt.clone(),
                    executor: Arc::clone(&bm.executor),
                    probe: Arc::clone(&self.probe),
                    ping_timeout: self.config.ping_timeout,
                    queue: Arc::clone(&queue),
                    done_tx: done_tx.clone(),
                }));
            }

            // Space out variant batches to distribute target load over time.
            if index + 1 < self.benchmarks.len() {
                tokio::time::sleep(self.config.policy.interval / variant_count).await;
            }
        }
        drop(done_tx);

        while let Some(joined) = join_set.join_next().await {
            joined.context("trial task panicked")?;
        }

        collector.await.context("collector task failed")
    }
}

struct Trial {
    benchmark_id: String,
    host: String,
    prompt: String,
    executor: Arc<dyn Executor>,
    probe: Arc<dyn NetworkProbe>,
    ping_timeout: Duration,
    queue: Arc<TrialQueue>,
    done_tx: mpsc::UnboundedSender<Recorder>,
}

async fn run_trial(trial: Trial) {
    let permit = trial.queue.admit().await;

    let mut rec = Recorder::new(&trial.benchmark_id, &trial.host, &trial.prompt);
    rec.begin();

    let (exec_result, ping_result) = tokio::join!(
        trial.executor.stream(&mut rec),
        trial.probe.measure(&trial.host, trial.ping_timeout),
    );

    rec.record_ping(ping_result);
    if let Err(err) = exec_result {
        rec.set_error(format!("{:#}", err));
    }
    rec.end();
    drop(permit);

    info!("{}: {:.0}ms", rec.benchmark_id, rec.ttft());
    let _ = trial.done_tx.send(rec);
}

async fn collect_results(
    mut rx: mpsc::UnboundedReceiver<Recorder>,
    mut results: RunMap,
    quantiles: Vec<f64>,
    cadence: Duration,
) -> RunMap {
    let mut ticker = interval_at(TokioInstant::now() + cadence, cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    redraw(&results, &quantiles);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(rec) => {
                    results.entry(rec.benchmark_id.clone()).or_default().push(rec);
                }
                // All units settled; the reporting timer ends with the loop.
                None => break,
            },
            _ = ticker.tick() => redraw(&results, &quantiles),
        }
    }

    redraw(&results, &quantiles);
    results
}

fn redraw(results: &RunMap, quantiles: &[f64]) {
    print!("\x1b[2J\x1b[H{}", report::render_summary(results, quantiles));
    let _ = io::stdout().flush();
}
