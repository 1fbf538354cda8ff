use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use reqwest::Url;
use serde_json::Value;
use streambench::{
    Benchmark, ChatCompletions, PromptSource, QueuePolicy, Run, RunConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "streambench",
    about = "Measure streaming TTFT percentiles across model variants"
)]
struct Args {
    /// Model identifier; repeat to benchmark several variants side by side
    #[arg(long = "model", required = true)]
    models: Vec<String>,

    /// Host to target (e.g. https://api.openai.com)
    #[arg(long, default_value = "https://api.openai.com")]
    host: String,

    /// Endpoint path or full URL (e.g. /v1/chat/completions)
    #[arg(long, default_value = "/v1/chat/completions")]
    endpoint: String,

    /// Measured trials per variant
    #[arg(long, default_value_t = 16)]
    iterations: usize,

    /// Path to a JSONL file whose objects contain a `text` field to use as
    /// prompts; generated prompts are used when omitted
    #[arg(long)]
    jsonl: Option<PathBuf>,

    /// Maximum trials in flight per queue
    #[arg(long, default_value_t = 3)]
    concurrency: usize,

    /// Minimum milliseconds between dispatches on one queue (0 disables)
    #[arg(long, default_value_t = 3000)]
    interval_ms: u64,

    /// Dispatches admitted per interval window
    #[arg(long, default_value_t = 1)]
    interval_cap: u32,

    /// Rate-limit all variants through one shared queue
    #[arg(long)]
    shared_queue: bool,

    /// Skip the untracked warmup trial per variant
    #[arg(long)]
    no_warmup: bool,

    /// Quantiles to report, as probabilities in [0, 1]
    #[arg(long, value_delimiter = ',')]
    quantiles: Option<Vec<f64>>,

    /// API key to use; if omitted an environment variable is read
    #[arg(long)]
    api_key: Option<String>,

    /// Environment variable name to read the API key from when --api-key is
    /// not supplied
    #[arg(long, default_value = "OPENAI_API_KEY")]
    api_key_env: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 60)]
    request_timeout_secs: u64,

    /// Network probe timeout in seconds
    #[arg(long, default_value_t = 5)]
    ping_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("streambench=info")),
        )
        .init();

    let args = Args::parse();

    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var(&args.api_key_env).ok());

    let endpoint = resolve_endpoint(&args.host, &args.endpoint);
    let url = Url::parse(&endpoint).with_context(|| format!("invalid endpoint URL: {}", endpoint))?;
    let ping_host = url
        .host_str()
        .ok_or_else(|| anyhow!("endpoint URL has no host: {}", endpoint))?
        .to_string();

    let mut benchmarks = Vec::with_capacity(args.models.len());
    for model in &args.models {
        let executor = ChatCompletions::try_new(endpoint.clone(), model.clone(), api_key.clone())?
            .with_request_timeout(Duration::from_secs(args.request_timeout_secs));

        let mut bm = Benchmark::new(format!("{}-completions", model), ping_host.clone(), Arc::new(executor));
        if args.shared_queue {
            bm = bm.with_queue_key("shared");
        }
        benchmarks.push(bm);
    }

    let prompts = match &args.jsonl {
        Some(path) => {
            let texts = load_prompts(path)
                .with_context(|| format!("failed to load prompts from {}", path.display()))?;
            if texts.is_empty() {
                return Err(anyhow!(
                    "{} did not contain any JSON records with a `text` field",
                    path.display()
                ));
            }
            PromptSource::fixed(texts)
        }
        None => PromptSource::generated(),
    };

    let policy = QueuePolicy::try_new(
        args.concurrency,
        Duration::from_millis(args.interval_ms),
        args.interval_cap,
    )?;
    let mut config = RunConfig::try_new(args.iterations)?
        .with_policy(policy)
        .with_warmup(!args.no_warmup)
        .with_ping_timeout(Duration::from_secs(args.ping_timeout_secs));
    if let Some(quantiles) = args.quantiles.clone() {
        config = config.with_quantiles(quantiles)?;
    }

    let run = Run::new(benchmarks, config)?;
    run.run(prompts).await?;

    Ok(())
}

fn load_prompts(path: &PathBuf) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut prompts = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(trimmed)
            .with_context(|| format!("line {} is not valid JSON: {}", idx + 1, trimmed))?;
        let text = value
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("line {} missing string field `text`", idx + 1))?;
        prompts.push(text.to_string());
    }

    Ok(prompts)
}

fn resolve_endpoint(host: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }

    let normalized_host = if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    };

    format!("{}/{}", normalized_host, endpoint.trim_start_matches('/'))
}
