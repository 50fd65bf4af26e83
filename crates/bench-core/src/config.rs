use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub run: RunConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.target.endpoint)
            .with_context(|| format!("Invalid endpoint URL: {}", self.target.endpoint))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            bail!("Endpoint must be http or https, got: {}", url.scheme());
        }
        if url.host_str().is_none() {
            bail!("Endpoint has no host: {}", self.target.endpoint);
        }
        if self.target.model_name.trim().is_empty() {
            bail!("target.model_name must not be empty");
        }
        if self.target.timeout_ms == 0 {
            bail!("target.timeout_ms must be > 0");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            bail!("retry.jitter must be within [0, 1], got {}", self.retry.jitter);
        }
        if self.run.concurrency == 0 {
            bail!("run.concurrency must be >= 1");
        }
        if self.run.mode.runs_throughput() && self.run.requests == 0 {
            bail!("run.requests must be >= 1");
        }
        if self.run.mode.runs_latency() && self.run.latency_requests == 0 {
            bail!("run.latency_requests must be >= 1");
        }
        Ok(())
    }

    /// Full inference URL: `<endpoint>/v2/models/<model>/infer`.
    pub fn infer_url(&self) -> String {
        format!(
            "{}/v2/models/{}/infer",
            self.target.endpoint.trim_end_matches('/'),
            self.target.model_name
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL of the serving endpoint (e.g., "http://fraud-detection-svc:8000")
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model name used in the inference path
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// Per-attempt request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model_name: default_model_name(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// When false, every request gets exactly one attempt
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Total attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff base in milliseconds; attempt n waits base * 2^(n-1)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// HTTP status codes that are retried
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
    /// Upper bound of the random extra delay, as a fraction of the backoff
    #[serde(default)]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            retry_statuses: default_retry_statuses(),
            jitter: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub mode: RunMode,
    /// Requests sent in throughput mode
    #[serde(default = "default_requests")]
    pub requests: usize,
    /// Requests sent in latency mode
    #[serde(default = "default_latency_requests")]
    pub latency_requests: usize,
    /// Worker pool size in throughput mode
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Sampler seed; a random seed is drawn when absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Optional run-wide dispatch deadline in milliseconds
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    /// Where to write the JSON report
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            requests: default_requests(),
            latency_requests: default_latency_requests(),
            concurrency: default_concurrency(),
            seed: None,
            deadline_ms: None,
            output: None,
        }
    }
}

/// Which benchmarks a run performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Latency,
    Throughput,
    #[default]
    Both,
}

impl RunMode {
    pub fn runs_latency(self) -> bool {
        matches!(self, RunMode::Latency | RunMode::Both)
    }

    pub fn runs_throughput(self) -> bool {
        matches!(self, RunMode::Throughput | RunMode::Both)
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latency" => Ok(RunMode::Latency),
            "throughput" => Ok(RunMode::Throughput),
            "both" => Ok(RunMode::Both),
            other => Err(format!(
                "invalid test type: {other}, must be 'latency', 'throughput' or 'both'"
            )),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::Latency => "latency",
            RunMode::Throughput => "throughput",
            RunMode::Both => "both",
        };
        f.write_str(s)
    }
}

fn default_endpoint() -> String {
    "http://localhost:8080".to_string()
}

fn default_model_name() -> String {
    "fraud_detector".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_retry_statuses() -> Vec<u16> {
    std::iter::once(429).chain(500..600).collect()
}

fn default_requests() -> usize {
    1_000
}

fn default_latency_requests() -> usize {
    100
}

fn default_concurrency() -> usize {
    10
}
