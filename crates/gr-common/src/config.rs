//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Shared primitives and utilities for the rover runtime."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

const MIN_FRAME_BYTES: usize = 64;

/// Paths served by the HTTP surface; the control channel may not shadow them.
const RESERVED_ROUTES: [&str; 5] = ["/", "/upload", "/download", "/api/status", "/metrics"];

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_websocket_path() -> String {
    "/ghostRover".to_owned()
}

fn default_broadcast_capacity() -> usize {
    64
}

fn default_max_frame_bytes() -> usize {
    4096
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("sd")
}

fn default_index() -> String {
    "index.html".to_owned()
}

fn default_listing_limit() -> usize {
    2048
}

fn default_true() -> bool {
    true
}

fn default_position_period() -> Duration {
    Duration::from_millis(500)
}

fn default_power_period() -> Duration {
    Duration::from_millis(5000)
}

fn default_sysfs_path() -> PathBuf {
    PathBuf::from("/sys/class/power_supply/BAT0")
}

fn default_start_soc() -> f64 {
    93.0
}

fn default_drain_per_hour() -> f64 {
    4.0
}

fn default_indicator_on() -> Duration {
    Duration::from_millis(100)
}

fn default_indicator_off() -> Duration {
    Duration::from_millis(1000)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the rover service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "GR_CONFIG";

    /// Load configuration from disk, respecting the `GR_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.storage.validate()?;
        self.telemetry.validate()?;
        self.indicator.validate()?;
        if self.health.interval.is_zero() {
            return Err(anyhow!("health.interval_secs must be greater than zero"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Operating mode reported to the browser client on `operate:ready`.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    #[default]
    Base,
    Rover,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Base => "base",
            OperatingMode::Rover => "rover",
        }
    }
}

/// Distance units reported to the browser client on `operate:ready`.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Meters,
    Feet,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Meters => "meters",
            Units::Feet => "feet",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default)]
    pub units: Units,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_websocket_path")]
    pub websocket_path: String,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default)]
    pub bind_retry: BindRetryConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            websocket_path: default_websocket_path(),
            broadcast_capacity: default_broadcast_capacity(),
            max_frame_bytes: default_max_frame_bytes(),
            bind_retry: BindRetryConfig::default(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.websocket_path.starts_with('/') || self.websocket_path.len() < 2 {
            return Err(anyhow!(
                "network.websocket_path '{}' must start with '/' and name a route",
                self.websocket_path
            ));
        }
        if RESERVED_ROUTES.contains(&self.websocket_path.as_str()) {
            return Err(anyhow!(
                "network.websocket_path '{}' collides with an HTTP route",
                self.websocket_path
            ));
        }
        if self.broadcast_capacity == 0 {
            return Err(anyhow!("network.broadcast_capacity must be greater than zero"));
        }
        if self.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(anyhow!(
                "network.max_frame_bytes must be at least {} (got {})",
                MIN_FRAME_BYTES,
                self.max_frame_bytes
            ));
        }
        self.bind_retry.validate()
    }
}

/// Whether the listener bind is retried forever or gives up.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
    #[default]
    Infinite,
    Bounded,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindRetryConfig {
    #[serde(default)]
    pub policy: RetryPolicy,
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default = "default_retry_interval", rename = "interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
}

impl Default for BindRetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::Infinite,
            attempts: None,
            interval: default_retry_interval(),
        }
    }
}

impl BindRetryConfig {
    /// Attempt budget, `None` meaning unbounded.
    pub fn max_attempts(&self) -> Option<u32> {
        match self.policy {
            RetryPolicy::Infinite => None,
            RetryPolicy::Bounded => Some(self.attempts.unwrap_or(1)),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts() == Some(0) {
            return Err(anyhow!(
                "network.bind_retry.attempts must be at least 1 for a bounded policy"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default = "default_listing_limit")]
    pub listing_limit_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            index: default_index(),
            listing_limit_bytes: default_listing_limit(),
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<()> {
        if self.index.trim().is_empty() {
            return Err(anyhow!("storage.index must name a document"));
        }
        if self.listing_limit_bytes == 0 {
            return Err(anyhow!("storage.listing_limit_bytes must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Producers start emitting at boot, before any `operate:ready`.
    #[serde(default = "default_true")]
    pub start_enabled: bool,
    #[serde(default)]
    pub position: PositionConfig,
    #[serde(default)]
    pub power: PowerConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            start_enabled: true,
            position: PositionConfig::default(),
            power: PowerConfig::default(),
        }
    }
}

impl TelemetryConfig {
    fn validate(&self) -> Result<()> {
        self.position.validate()?;
        self.power.validate()
    }
}

/// Inclusive range of integer jitter steps.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRange {
    pub min: i64,
    pub max: i64,
}

impl StepRange {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.min > self.max {
            return Err(anyhow!(
                "telemetry.position.{} min ({}) exceeds max ({})",
                name,
                self.min,
                self.max
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PositionSourceKind {
    #[default]
    Synthetic,
}

/// Synthetic position generator settings.
///
/// Latitude and longitude steps are 1e-7 degree; elevation, hac and vac steps
/// are centimetres.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionConfig {
    #[serde(default = "default_position_period", rename = "period_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub period: Duration,
    #[serde(default)]
    pub source: PositionSourceKind,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "PositionConfig::default_base_latitude")]
    pub base_latitude: f64,
    #[serde(default = "PositionConfig::default_latitude_steps")]
    pub latitude_steps: StepRange,
    #[serde(default = "PositionConfig::default_base_longitude")]
    pub base_longitude: f64,
    #[serde(default = "PositionConfig::default_longitude_steps")]
    pub longitude_steps: StepRange,
    #[serde(default = "PositionConfig::default_base_elevation")]
    pub base_elevation: f64,
    #[serde(default = "PositionConfig::default_elevation_steps")]
    pub elevation_steps: StepRange,
    #[serde(default = "PositionConfig::default_hac_steps")]
    pub hac_steps: StepRange,
    #[serde(default = "PositionConfig::default_vac_steps")]
    pub vac_steps: StepRange,
}

impl PositionConfig {
    fn default_base_latitude() -> f64 {
        35.553
    }

    fn default_latitude_steps() -> StepRange {
        StepRange::new(30_500, 32_500)
    }

    fn default_base_longitude() -> f64 {
        -78.771
    }

    fn default_longitude_steps() -> StepRange {
        StepRange::new(-45_000, -35_000)
    }

    fn default_base_elevation() -> f64 {
        100.0
    }

    fn default_elevation_steps() -> StepRange {
        StepRange::new(0, 50)
    }

    fn default_hac_steps() -> StepRange {
        StepRange::new(10, 25)
    }

    fn default_vac_steps() -> StepRange {
        StepRange::new(15, 25)
    }

    fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(anyhow!("telemetry.position.period_ms must be greater than zero"));
        }
        self.latitude_steps.validate("latitude_steps")?;
        self.longitude_steps.validate("longitude_steps")?;
        self.elevation_steps.validate("elevation_steps")?;
        self.hac_steps.validate("hac_steps")?;
        self.vac_steps.validate("vac_steps")
    }
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            period: default_position_period(),
            source: PositionSourceKind::Synthetic,
            seed: None,
            base_latitude: Self::default_base_latitude(),
            latitude_steps: Self::default_latitude_steps(),
            base_longitude: Self::default_base_longitude(),
            longitude_steps: Self::default_longitude_steps(),
            base_elevation: Self::default_base_elevation(),
            elevation_steps: Self::default_elevation_steps(),
            hac_steps: Self::default_hac_steps(),
            vac_steps: Self::default_vac_steps(),
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GaugeKind {
    #[default]
    Simulated,
    Sysfs,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    #[serde(default = "default_power_period", rename = "period_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub period: Duration,
    #[serde(default)]
    pub gauge: GaugeKind,
    #[serde(default = "default_sysfs_path")]
    pub sysfs_path: PathBuf,
    /// Refuse to start when the gauge cannot be opened.
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_start_soc")]
    pub simulated_start_soc: f64,
    #[serde(default = "default_drain_per_hour")]
    pub simulated_drain_per_hour: f64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            period: default_power_period(),
            gauge: GaugeKind::Simulated,
            sysfs_path: default_sysfs_path(),
            required: false,
            simulated_start_soc: default_start_soc(),
            simulated_drain_per_hour: default_drain_per_hour(),
        }
    }
}

impl PowerConfig {
    fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(anyhow!("telemetry.power.period_ms must be greater than zero"));
        }
        if !(0.0..=100.0).contains(&self.simulated_start_soc) {
            return Err(anyhow!(
                "telemetry.power.simulated_start_soc must be within 0..=100"
            ));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_indicator_on", rename = "on_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub on: Duration,
    #[serde(default = "default_indicator_off", rename = "off_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub off: Duration,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            on: default_indicator_on(),
            off: default_indicator_off(),
        }
    }
}

impl IndicatorConfig {
    fn validate(&self) -> Result<()> {
        if self.on.is_zero() {
            return Err(anyhow!("indicator.on_ms must be greater than zero"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval", rename = "interval_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
        }
    }
}

/// How a single key/value pair is matched against the command table.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchPolicy {
    /// Value-based chain, then the key-based checks on the same pair.
    #[default]
    Layered,
    /// One ordered match list; the first matching rule wins.
    FirstMatch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub policy: DispatchPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
