//! Configuration loading from TOML files
//!
//! The daemon takes the path from `--config` (default
//! `config/installation.toml`); a missing file falls back to defaults.
//!
//! Every section and field is optional; anything missing takes the value
//! used by the installation on site.

use crate::domain::types::OperationMode;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Which actuator implementation drives the arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorMode {
    /// In-process simulated arm
    Sim,
    /// Vendor SDK sidecar over TCP
    Bridge,
}

/// What the executor does when the actuator rejects a move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveFailurePolicy {
    /// Log, skip the step without waiting, continue with the next one
    Skip,
    /// Stop the sequence and report the failure
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub mode: ActuatorMode,
    /// Controller address passed to the SDK on connect
    pub address: String,
    /// SDK connection mode (1 = control)
    pub connect_mode: u8,
    pub bridge_addr: String,
    pub operation_mode: OperationMode,
    /// Global speed scaling (%)
    pub override_ratio: u8,
    /// PTP speed applied after connecting (%)
    pub default_speed: u8,
    pub connect_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    /// Simulated duration of one move
    pub sim_step_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            mode: ActuatorMode::Sim,
            address: "192.168.50.90".to_string(),
            connect_mode: 1,
            bridge_addr: "127.0.0.1:7420".to_string(),
            operation_mode: OperationMode::Auto,
            override_ratio: 10,
            default_speed: 50,
            connect_timeout_ms: 10_000,
            reply_timeout_ms: 2_000,
            sim_step_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Upper bound on waiting for one move to complete
    pub completion_timeout_ms: u64,
    /// Upper bound on draining the actuator queue
    pub flush_timeout_ms: u64,
    pub flush_poll_ms: u64,
    pub on_move_failure: MoveFailurePolicy,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            completion_timeout_ms: 60_000,
            flush_timeout_ms: 5_000,
            flush_poll_ms: 5,
            on_move_failure: MoveFailurePolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode_a_secs: u64,
    pub mode_b_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { mode_a_secs: 15 * 60, mode_b_secs: 15 * 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 9999 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CuesConfig {
    pub enabled: bool,
    pub audio_addr: String,
    pub lighting_addr: String,
    /// Send `A`/`B` when a mode starts
    pub mode_cues: bool,
    /// Only cue when the derived key has a registered sequence
    pub require_sequence: bool,
}

impl Default for CuesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            audio_addr: "192.168.1.154:8082".to_string(),
            lighting_addr: "192.168.1.99:9897".to_string(),
            mode_cues: false,
            require_sequence: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DrillConfig {
    /// First-axis base angles (degrees)
    pub base_angles: Vec<f64>,
    /// Small offsets added to the base angle (degrees)
    pub offsets: Vec<f64>,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for DrillConfig {
    fn default() -> Self {
        Self {
            base_angles: (0..21).map(|i| -160.0 + i as f64 * 15.0).collect(),
            offsets: vec![0.0, -1.0, -2.0, -3.0, -4.0, -5.0],
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LibraryConfig {
    /// Pose library TOML file; built-in catalog when absent
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub actuator: ActuatorConfig,
    pub motion: MotionConfig,
    pub session: SessionConfig,
    pub sensor: SensorConfig,
    pub cues: CuesConfig,
    pub drill: DrillConfig,
    pub library: LibraryConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    actuator: ActuatorConfig,
    motion: MotionConfig,
    session: SessionConfig,
    sensor: SensorConfig,
    cues: CuesConfig,
    drill: DrillConfig,
    library_path: Option<String>,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            actuator: toml_config.actuator,
            motion: toml_config.motion,
            session: toml_config.session,
            sensor: toml_config.sensor,
            cues: toml_config.cues,
            drill: toml_config.drill,
            library_path: toml_config.library.path,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    // Actuator
    pub fn actuator_mode(&self) -> ActuatorMode {
        self.actuator.mode
    }

    pub fn actuator_address(&self) -> &str {
        &self.actuator.address
    }

    pub fn actuator_connect_mode(&self) -> u8 {
        self.actuator.connect_mode
    }

    pub fn bridge_addr(&self) -> &str {
        &self.actuator.bridge_addr
    }

    pub fn operation_mode(&self) -> OperationMode {
        self.actuator.operation_mode
    }

    pub fn override_ratio(&self) -> u8 {
        self.actuator.override_ratio
    }

    pub fn default_speed(&self) -> u8 {
        self.actuator.default_speed
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.actuator.connect_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.actuator.reply_timeout_ms)
    }

    pub fn sim_step(&self) -> Duration {
        Duration::from_millis(self.actuator.sim_step_ms)
    }

    // Motion
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.motion.completion_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.motion.flush_timeout_ms)
    }

    pub fn flush_poll(&self) -> Duration {
        Duration::from_millis(self.motion.flush_poll_ms.max(1))
    }

    pub fn move_failure_policy(&self) -> MoveFailurePolicy {
        self.motion.on_move_failure
    }

    // Session
    pub fn mode_a_duration(&self) -> Duration {
        Duration::from_secs(self.session.mode_a_secs)
    }

    pub fn mode_b_duration(&self) -> Duration {
        Duration::from_secs(self.session.mode_b_secs)
    }

    // Sensor
    pub fn sensor_bind_addr(&self) -> String {
        format!("{}:{}", self.sensor.bind_address, self.sensor.port)
    }

    pub fn sensor_port(&self) -> u16 {
        self.sensor.port
    }

    // Cues
    pub fn cues_enabled(&self) -> bool {
        self.cues.enabled
    }

    pub fn audio_addr(&self) -> &str {
        &self.cues.audio_addr
    }

    pub fn lighting_addr(&self) -> &str {
        &self.cues.lighting_addr
    }

    pub fn mode_cues(&self) -> bool {
        self.cues.mode_cues
    }

    pub fn cue_requires_sequence(&self) -> bool {
        self.cues.require_sequence
    }

    // Drill
    pub fn base_angles(&self) -> &[f64] {
        &self.drill.base_angles
    }

    pub fn offsets(&self) -> &[f64] {
        &self.drill.offsets
    }

    pub fn drill_seed(&self) -> Option<u64> {
        self.drill.seed
    }

    pub fn library_path(&self) -> Option<&str> {
        self.library_path.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs.max(1)
    }

    /// Builder method for tests to shorten mode durations
    #[cfg(test)]
    pub fn with_mode_durations(mut self, mode_a_secs: u64, mode_b_secs: u64) -> Self {
        self.session = SessionConfig { mode_a_secs, mode_b_secs };
        self
    }
}
