use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Main configuration structure for Chokepoint.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub window: WindowConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub thresholds: ThresholdConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Get the default configuration as a TOML string.
    pub fn default_toml() -> Result<String> {
        let config = Self::default();
        toml::to_string_pretty(&config).context("Failed to serialize default config")
    }

    /// Validate the configuration for obvious misconfiguration.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.window.max_events == 0 {
            anyhow::bail!("window.max_events must be greater than 0");
        }

        if self.analysis.source_node.trim().is_empty() {
            anyhow::bail!("analysis.source_node cannot be empty");
        }

        let weights = &self.analysis.weights;
        if weights.structural < 0.0 || weights.latency < 0.0 || weights.capacity < 0.0 {
            anyhow::bail!("analysis.weights cannot be negative");
        }
        if weights.structural + weights.latency + weights.capacity <= 0.0 {
            anyhow::bail!("analysis.weights must not all be zero");
        }

        if self.thresholds.warning_ms >= self.thresholds.critical_ms {
            anyhow::bail!(
                "thresholds.warning_ms ({}) must be below thresholds.critical_ms ({})",
                self.thresholds.warning_ms,
                self.thresholds.critical_ms
            );
        }

        if self.alerts.max_alerts == 0 {
            anyhow::bail!("alerts.max_alerts must be greater than 0");
        }

        if self.alerts.min_samples < 2 {
            anyhow::bail!("alerts.min_samples must be at least 2");
        }

        if self.alerts.trend_lookback == 0 {
            anyhow::bail!("alerts.trend_lookback must be greater than 0");
        }

        if self.ingest.buffer_size == 0 {
            anyhow::bail!("ingest.buffer_size must be greater than 0");
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("Invalid log level: {}", other),
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("Failed to parse config")?;
        Ok(config)
    }
}

/// Runtime server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            verbose: false,
            cors_enabled: true,
        }
    }
}

/// Bounds of the sliding window. Both limits apply independently.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Maximum age relative to the newest record; 0 disables age eviction.
    #[serde(default = "default_max_seconds")]
    pub max_seconds: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            max_seconds: default_max_seconds(),
        }
    }
}

/// Flow analyzer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// Designated ingress service used as the flow source
    #[serde(default = "default_source_node")]
    pub source_node: String,

    /// Case-insensitive name prefixes identifying terminal services
    #[serde(default = "default_sink_prefixes")]
    pub sink_prefixes: Vec<String>,

    /// Cadence of background analysis passes
    #[serde(default = "default_analysis_interval")]
    pub interval_ms: u64,

    #[serde(default)]
    pub weights: HybridWeights,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            source_node: default_source_node(),
            sink_prefixes: default_sink_prefixes(),
            interval_ms: default_analysis_interval(),
            weights: HybridWeights::default(),
        }
    }
}

/// Blend weights of the hybrid bottleneck score.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct HybridWeights {
    #[serde(default = "default_structural_weight")]
    pub structural: f64,

    #[serde(default = "default_quarter_weight")]
    pub latency: f64,

    #[serde(default = "default_quarter_weight")]
    pub capacity: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            structural: default_structural_weight(),
            latency: default_quarter_weight(),
            capacity: default_quarter_weight(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    /// Use `warning_ms` / `critical_ms` as given
    Fixed,
    /// Median plus one / two standard deviations of the edge population
    Adaptive,
}

/// Latency thresholds shared by the degradation phase and the alert engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_threshold_mode")]
    pub mode: ThresholdMode,

    #[serde(default = "default_warning_ms")]
    pub warning_ms: f64,

    #[serde(default = "default_critical_ms")]
    pub critical_ms: f64,

    /// Edges with positive latency needed before adaptive thresholds are trusted
    #[serde(default = "default_min_adaptive_edges")]
    pub min_adaptive_edges: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            mode: default_threshold_mode(),
            warning_ms: default_warning_ms(),
            critical_ms: default_critical_ms(),
            min_adaptive_edges: default_min_adaptive_edges(),
        }
    }
}

/// Alert engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertConfig {
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,

    /// Edges with fewer samples are not evaluated
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    #[serde(default = "default_trend_lookback")]
    pub trend_lookback: usize,

    #[serde(default = "default_trend_warning")]
    pub trend_warning_ms: f64,

    #[serde(default = "default_trend_critical")]
    pub trend_critical_ms: f64,

    /// Horizon, relative to the newest observation, for counting alerts
    #[serde(default = "default_recent_window")]
    pub recent_window_seconds: u64,

    #[serde(default = "default_critical_alert_count")]
    pub critical_alert_count: usize,

    #[serde(default = "default_warning_alert_count")]
    pub warning_alert_count: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_alerts: default_max_alerts(),
            min_samples: default_min_samples(),
            trend_lookback: default_trend_lookback(),
            trend_warning_ms: default_trend_warning(),
            trend_critical_ms: default_trend_critical(),
            recent_window_seconds: default_recent_window(),
            critical_alert_count: default_critical_alert_count(),
            warning_alert_count: default_warning_alert_count(),
        }
    }
}

/// Ingestion pacing and buffering.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Delay between consecutive records
    #[serde(default = "default_ingest_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Number of human-readable ingestion lines kept for tailing
    #[serde(default = "default_recent_logs")]
    pub recent_logs: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_ingest_interval(),
            buffer_size: default_buffer_size(),
            recent_logs: default_recent_logs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub include_modules: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            include_modules: false,
        }
    }
}

// Default providers ---------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_events() -> usize {
    200
}

fn default_max_seconds() -> u64 {
    60
}

fn default_source_node() -> String {
    "api-gateway".to_string()
}

fn default_sink_prefixes() -> Vec<String> {
    vec!["db".to_string()]
}

fn default_analysis_interval() -> u64 {
    1000
}

fn default_structural_weight() -> f64 {
    0.5
}

fn default_quarter_weight() -> f64 {
    0.25
}

fn default_threshold_mode() -> ThresholdMode {
    ThresholdMode::Fixed
}

fn default_warning_ms() -> f64 {
    120.0
}

fn default_critical_ms() -> f64 {
    200.0
}

fn default_min_adaptive_edges() -> usize {
    5
}

fn default_max_alerts() -> usize {
    100
}

fn default_min_samples() -> usize {
    4
}

fn default_trend_lookback() -> usize {
    3
}

fn default_trend_warning() -> f64 {
    50.0
}

fn default_trend_critical() -> f64 {
    100.0
}

fn default_recent_window() -> u64 {
    60
}

fn default_critical_alert_count() -> usize {
    3
}

fn default_warning_alert_count() -> usize {
    1
}

fn default_ingest_interval() -> u64 {
    300
}

fn default_buffer_size() -> usize {
    10_000
}

fn default_recent_logs() -> usize {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

// Tests ---------------------------------------------------------------------
