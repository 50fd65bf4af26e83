use anyhow::{Context, Result};
use bench_core::{
    aggregate, BenchmarkRun, Config, HttpClient, InferenceClient, LatencySummary, MockClient,
    RequestExecutor, RetryPolicy, RetryingTransport, RunMode, RunSettings, Scheduler, TestType,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "bench")]
#[command(about = "Fraud scoring endpoint benchmark - measures latency and throughput")]
struct Args {
    /// Path to configuration file (optional; defaults apply without it)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serving endpoint base URL (e.g., http://fraud-detection-svc:8000)
    #[arg(long)]
    endpoint: Option<String>,

    /// Model name in the inference path
    #[arg(long)]
    model: Option<String>,

    /// Which test to run: latency, throughput or both
    #[arg(long)]
    test_type: Option<RunMode>,

    /// Number of requests for the throughput test
    #[arg(long)]
    requests: Option<usize>,

    /// Number of sequential requests for the latency test
    #[arg(long)]
    latency_requests: Option<usize>,

    /// Number of concurrent clients in the throughput test
    #[arg(long)]
    concurrent: Option<usize>,

    /// Per-attempt request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Disable retries (one attempt per request)
    #[arg(long)]
    no_retry: bool,

    /// Sampler seed for reproducible transactions
    #[arg(long)]
    seed: Option<u64>,

    /// Stop dispatching new requests after this many milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Save results to a JSON file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Transport: http, or mock for a dry run without a server
    #[arg(long, default_value = "http")]
    transport: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    config.validate().context("Invalid configuration")?;

    let seed = config.run.seed.unwrap_or_else(rand::random);
    info!(
        "Benchmarking {} ({} mode, seed {})",
        config.infer_url(),
        config.run.mode,
        seed
    );

    let client: Arc<dyn InferenceClient> = match args.transport.as_str() {
        "http" => Arc::new(HttpClient::from_config(&config).context("Failed to create HTTP client")?),
        "mock" => Arc::new(MockClient::new(5, 0.1)), // 5ms simulated latency
        other => anyhow::bail!("Invalid transport: {}, must be 'http' or 'mock'", other),
    };
    info!("Using client: {}", client.name());

    let transport = RetryingTransport::new(client, RetryPolicy::from_config(&config));
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, letting in-flight requests finish");
                cancel.cancel();
            }
        });
    }

    let scheduler = Scheduler::new(RequestExecutor::new(transport), seed)
        .with_cancellation(cancel.clone())
        .with_deadline(config.run.deadline_ms.map(Duration::from_millis));

    let mut results = Vec::new();

    if config.run.mode.runs_latency() && !cancel.is_cancelled() {
        let n = config.run.latency_requests;
        info!("Running latency test: {} sequential requests", n);
        let collected = scheduler.clone().with_progress_every(20).run_sequential(n).await;
        let run = aggregate(
            &collected.outcomes,
            collected.duration,
            RunSettings {
                test_type: TestType::Latency,
                requests: n,
                concurrency: 1,
            },
        );
        print_results(&run);
        results.push(run);
    }

    if config.run.mode.runs_throughput() && !cancel.is_cancelled() {
        let n = config.run.requests;
        let workers = config.run.concurrency;
        info!(
            "Running throughput test: {} requests, {} concurrent clients",
            n, workers
        );
        let collected = scheduler
            .clone()
            .with_progress_every(100)
            .run_concurrent(n, workers)
            .await;
        let run = aggregate(
            &collected.outcomes,
            collected.duration,
            RunSettings {
                test_type: TestType::Throughput,
                requests: n,
                concurrency: workers,
            },
        );
        print_results(&run);
        results.push(run);
    }

    if let Some(path) = &config.run.output {
        save_results(path, &results)?;
        info!("Results saved to {}", path.display());
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };

    if let Some(endpoint) = &args.endpoint {
        config.target.endpoint = endpoint.clone();
    }
    if let Some(model) = &args.model {
        config.target.model_name = model.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.target.timeout_ms = timeout_ms;
    }
    if args.no_retry {
        config.retry.enabled = false;
    }
    if let Some(mode) = args.test_type {
        config.run.mode = mode;
    }
    if let Some(requests) = args.requests {
        config.run.requests = requests;
    }
    if let Some(n) = args.latency_requests {
        config.run.latency_requests = n;
    }
    if let Some(concurrent) = args.concurrent {
        config.run.concurrency = concurrent;
    }
    if let Some(seed) = args.seed {
        config.run.seed = Some(seed);
    }
    if let Some(deadline_ms) = args.deadline_ms {
        config.run.deadline_ms = Some(deadline_ms);
    }
    if let Some(output) = &args.output {
        config.run.output = Some(output.clone());
    }

    Ok(config)
}

fn save_results(path: &Path, results: &[BenchmarkRun]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
    }
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write results to {:?}", path))?;
    Ok(())
}

fn print_results(run: &BenchmarkRun) {
    println!("\n{}", "=".repeat(60));
    println!("TEST RESULTS: {}", run.test_type.to_string().to_uppercase());
    println!("{}", "=".repeat(60));

    println!("\nRequests:");
    println!("  Total: {}", run.num_requests);
    if run.completed_requests < run.num_requests {
        println!("  Completed: {} (stopped early)", run.completed_requests);
    }
    if run.test_type == TestType::Throughput {
        println!("  Concurrent clients: {}", run.concurrent_clients);
    }
    println!("  Successful: {}", run.successful_requests);
    println!("  Failed: {}", run.failed_requests);
    println!("  Success rate: {:.1}%", run.success_rate * 100.0);
    println!("  Predicted fraud: {}", run.predicted_fraud);
    for (kind, count) in &run.errors {
        println!("  Errors ({:?}): {}", kind, count);
    }

    if let Some(rps) = run.throughput_rps {
        println!("\nThroughput:");
        println!("  Requests/sec: {:.0} RPS", rps);
        println!("  Total duration: {:.1}s", run.total_duration_seconds);
    }

    print_latency("Latency (milliseconds)", &run.latency);
    print_latency("Inference Latency (milliseconds)", &run.inference_latency);
    println!("{}", "=".repeat(60));
}

fn print_latency(title: &str, latency: &LatencySummary) {
    println!("\n{}:", title);
    let (Some(min), Some(p50), Some(p95), Some(p99), Some(max), Some(mean), Some(stdev)) = (
        latency.min_ms,
        latency.p50_ms,
        latency.p95_ms,
        latency.p99_ms,
        latency.max_ms,
        latency.mean_ms,
        latency.stdev_ms,
    ) else {
        println!("  n/a (no successful requests)");
        return;
    };
    println!("  Min:    {:8.2} ms", min);
    println!("  p50:    {:8.2} ms", p50);
    println!("  p95:    {:8.2} ms", p95);
    println!("  p99:    {:8.2} ms", p99);
    println!("  Max:    {:8.2} ms", max);
    println!("  Mean:   {:8.2} ms (±{:.2})", mean, stdev);
}
