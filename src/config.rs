//! Face authenticator configuration
//!
//! Read once at startup from a TOML file, then patched from the environment.
//! The resulting value is immutable and handed to each component.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::utils::DistanceMetric;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub workers: WorkerConfig,
    pub models: ModelsConfig,
    pub authentication: AuthenticationConfig,
    pub reference: ReferenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Largest accepted request body, in megabytes.
    pub body_limit_mb: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of embedding workers, each with its own loaded models.
    pub count: usize,
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub dir: PathBuf,
    /// Detector model file, relative to `dir` unless absolute.
    pub detector: PathBuf,
    /// Embedder model file, relative to `dir` unless absolute.
    pub embedder: PathBuf,
    pub detection_confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthenticationConfig {
    /// Distances strictly below this are a match.
    pub threshold: f32,
    pub metric: DistanceMetric,
    /// Upper bound on fetch + embedding for one request.
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Where reference lookups are sent.
    pub target: Option<String>,
    /// When set, responses are published here instead of returned inline.
    pub sink: Option<String>,
    /// CloudEvents `source` attribute of emitted events.
    pub source: String,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("invalid config file {}", path))?;
        Ok(config)
    }

    pub fn default_path() -> String {
        std::env::var("AUTHENTICATOR_CONFIG").unwrap_or_else(|_| "config.toml".to_string())
    }

    /// Apply overrides, looking variables up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(target) = lookup("K_SINK").filter(|v| !v.is_empty()) {
            self.reference.target = Some(target);
        }
        if let Some(sink) = lookup("RESPONSE_SINK").filter(|v| !v.is_empty()) {
            self.reference.sink = Some(sink);
        }
        if let Some(threshold) = lookup("THRESHOLD") {
            self.authentication.threshold = threshold
                .parse()
                .with_context(|| format!("THRESHOLD is not a number: {}", threshold))?;
        }
        if let Some(dir) = lookup("model_dir").or_else(|| lookup("MODEL_DIR")) {
            self.models.dir = PathBuf::from(dir);
        }
        if let Some(count) = lookup("WORKERS") {
            self.workers.count = count
                .parse()
                .with_context(|| format!("WORKERS is not a count: {}", count))?;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("PORT is not a port: {}", port))?;
        }
        if let Some(deadline) = lookup("AUTH_DEADLINE_MS") {
            self.authentication.deadline_ms = deadline
                .parse()
                .with_context(|| format!("AUTH_DEADLINE_MS is not a number: {}", deadline))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers.count == 0 {
            bail!("workers.count must be at least 1");
        }
        let threshold = self.authentication.threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            bail!("authentication.threshold must be a non-negative number, got {}", threshold);
        }
        if self.authentication.deadline_ms == 0 {
            bail!("authentication.deadline_ms must be positive");
        }
        Ok(())
    }
}

impl AuthenticationConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl ModelsConfig {
    pub fn detector_path(&self) -> PathBuf {
        self.dir.join(&self.detector)
    }

    pub fn embedder_path(&self) -> PathBuf {
        self.dir.join(&self.embedder)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            workers: WorkerConfig::default(),
            models: ModelsConfig::default(),
            authentication: AuthenticationConfig::default(),
            reference: ReferenceConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            body_limit_mb: 20,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            device: "CPU".to_string(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/opt/authenticator"),
            detector: PathBuf::from("det_10g.onnx"),
            embedder: PathBuf::from("w600k_r50.onnx"),
            detection_confidence: 0.5,
        }
    }
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            metric: DistanceMetric::Euclidean,
            deadline_ms: 10_000,
        }
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            target: None,
            sink: None,
            source: "authenticator".to_string(),
        }
    }
}
