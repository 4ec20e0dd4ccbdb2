//! Configuration loading and validation

use anyhow::{bail, Context, Result};
use doco_core::calibration::MeasureSettings;
use doco_core::{
    DoorClass, DoorConfig, DoorId, DoorPins, LastSettledPolicy, NoInference, PositionEstimator,
    SensorPins,
};
use doco_mqtt::BusConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default = "default_doors", rename = "door")]
    pub doors: Vec<DoorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            mqtt: MqttConfig::default(),
            doors: default_doors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the legacy HTTP API
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Sensor poll and publish period
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// How long an actuator contact is held closed
    #[serde(default = "default_pulse")]
    pub pulse_ms: u64,
    /// Limit switch poll period during calibration
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Upper bound for a single calibration traversal
    #[serde(default = "default_calibration_timeout")]
    pub calibration_timeout_secs: u64,
    #[serde(default = "default_calibration_path")]
    pub calibration_path: String,
    /// File holding the shared secret for the HTTP API
    #[serde(default = "default_token_path")]
    pub token_path: String,
    #[serde(default = "default_thermal_path")]
    pub thermal_path: String,
    /// How movements started by a remote are recognized
    #[serde(default)]
    pub inference: InferenceMode,
    /// TLS configuration (optional - enables HTTPS when present)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            tick_interval_secs: default_tick_interval(),
            pulse_ms: default_pulse(),
            poll_interval_ms: default_poll_interval(),
            calibration_timeout_secs: default_calibration_timeout(),
            calibration_path: default_calibration_path(),
            token_path: default_token_path(),
            thermal_path: default_thermal_path(),
            inference: InferenceMode::default(),
            tls: None,
        }
    }
}

impl DaemonConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn pulse(&self) -> Duration {
        Duration::from_millis(self.pulse_ms)
    }

    pub fn measure_settings(&self) -> MeasureSettings {
        MeasureSettings {
            pulse: self.pulse(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_secs(self.calibration_timeout_secs),
        }
    }
}

/// Inference policy for movements without a command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InferenceMode {
    /// Opposite of the last settled position
    #[default]
    LastSettled,
    /// Hold the last estimate
    None,
}

impl InferenceMode {
    pub fn estimator(self) -> PositionEstimator {
        match self {
            InferenceMode::LastSettled => PositionEstimator::new(LastSettledPolicy),
            InferenceMode::None => PositionEstimator::new(NoInference),
        }
    }
}

/// TLS/HTTPS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM format)
    pub cert: String,
    /// Path to private key file (PEM format)
    pub key: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_tick_interval() -> u64 {
    5
}

fn default_pulse() -> u64 {
    100
}

fn default_poll_interval() -> u64 {
    100
}

fn default_calibration_timeout() -> u64 {
    120
}

fn default_calibration_path() -> String {
    "calibration.json".to_string()
}

fn default_token_path() -> String {
    "/srv/www/doco/my_token.tok".to_string()
}

fn default_thermal_path() -> String {
    "/sys/class/thermal/thermal_zone0/temp".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Prefix for device-wide topics and default door topics
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            base_topic: default_base_topic(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl MqttConfig {
    pub fn base_topic(&self) -> &str {
        self.base_topic.trim_end_matches('/')
    }

    pub fn availability_topic(&self) -> String {
        format!("{}/availability", self.base_topic())
    }

    pub fn cpu_temperature_topic(&self) -> String {
        format!("{}/cputemperature", self.base_topic())
    }

    pub fn to_bus_config(&self) -> BusConfig {
        BusConfig {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            last_will_topic: self.availability_topic(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "doco".to_string()
}

fn default_base_topic() -> String {
    "doco".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

/// The garage and fence wiring of the reference installation
fn default_doors() -> Vec<DoorConfig> {
    vec![
        DoorConfig {
            id: DoorId::new("garage"),
            class: DoorClass::Garage,
            enabled: true,
            topic: None,
            pins: DoorPins {
                open: 23,
                close: 24,
                impulse: 25,
                auxiliary: 8,
                light: None,
            },
            sensors: SensorPins {
                is_open: 17,
                is_closed: 27,
            },
            sensor_active_low: false,
        },
        DoorConfig {
            id: DoorId::new("fence"),
            class: DoorClass::Fence,
            enabled: true,
            topic: None,
            pins: DoorPins {
                open: 7,
                close: 1,
                impulse: 12,
                auxiliary: 16,
                light: None,
            },
            sensors: SensorPins {
                is_open: 10,
                is_closed: 9,
            },
            sensor_active_low: false,
        },
    ]
}

impl Config {
    /// Reject configurations the controller cannot run safely
    pub fn validate(&self) -> Result<()> {
        if self.daemon.tick_interval_secs == 0 {
            bail!("daemon.tick_interval_secs must be greater than zero");
        }
        if self.daemon.pulse_ms == 0 {
            bail!("daemon.pulse_ms must be greater than zero");
        }
        if self.daemon.poll_interval_ms == 0 {
            bail!("daemon.poll_interval_ms must be greater than zero");
        }
        if self.daemon.calibration_timeout_secs == 0 {
            bail!("daemon.calibration_timeout_secs must be greater than zero");
        }
        if self.mqtt.enabled && self.mqtt.keep_alive_secs < 5 {
            bail!("mqtt.keep_alive_secs must be at least 5");
        }
        if self.mqtt.base_topic().is_empty() {
            bail!("mqtt.base_topic must not be empty");
        }
        if self.doors.is_empty() {
            bail!("At least one [[door]] is required");
        }

        let mut ids = BTreeSet::new();
        let mut pins = BTreeSet::new();
        for door in &self.doors {
            if door.id.as_str().is_empty() || door.id.as_str().contains(['/', '+', '#']) {
                bail!("Invalid door id {:?}", door.id.as_str());
            }
            if !ids.insert(door.id.clone()) {
                bail!("Duplicate door id {}", door.id);
            }
            if door.pins.light.is_some() && door.class != DoorClass::Garage {
                bail!("Door {}: only garage doors can have a light pin", door.id);
            }
            for pin in door.output_pins().into_iter().chain(door.input_pins()) {
                if pin > 27 {
                    bail!("Door {}: pin {} is not a BCM GPIO", door.id, pin);
                }
                if !pins.insert(pin) {
                    bail!("Door {}: pin {} is used more than once", door.id, pin);
                }
            }
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("doco.toml")).unwrap();

        assert_eq!(config.daemon.bind, "0.0.0.0:8080");
        assert_eq!(config.daemon.tick_interval(), Duration::from_secs(5));
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.doors.len(), 2);
        assert_eq!(config.doors[0].pins.open, 23);
        assert_eq!(config.doors[0].pins.close, 24);
        assert_eq!(config.doors[1].sensors.is_closed, 9);
    }

    #[test]
    fn test_default_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doco.toml");
        save_default_config(&path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.doors, Config::default().doors);
        assert_eq!(loaded.mqtt.base_topic, "doco");
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [daemon]
            tick_interval_secs = 2

            [mqtt]
            host = "broker.lan"
            base_topic = "home/doors/"

            [[door]]
            id = "shed"
            class = "garage"
            sensor_active_low = true
            pins = { open = 5, close = 6, impulse = 13, auxiliary = 19, light = 26 }
            sensors = { is_open = 20, is_closed = 21 }
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.daemon.tick_interval_secs, 2);
        assert_eq!(config.daemon.inference, InferenceMode::LastSettled);
        assert_eq!(config.daemon.pulse_ms, 100);
        assert_eq!(config.mqtt.availability_topic(), "home/doors/availability");
        assert_eq!(config.doors.len(), 1);
        assert!(config.doors[0].enabled);
        assert_eq!(config.doors[0].pins.light, Some(26));
        assert_eq!(config.doors[0].topic(config.mqtt.base_topic()), "home/doors/shed");
    }

    #[test]
    fn test_inference_mode() {
        let config: Config = toml::from_str("[daemon]\ninference = \"none\"\n").unwrap();
        assert_eq!(config.daemon.inference, InferenceMode::None);
        assert_eq!(config.daemon.inference.estimator().policy_name(), "none");
        assert_eq!(InferenceMode::default().estimator().policy_name(), "last-settled");
    }

    #[test]
    fn test_validation_rejects_conflicts() {
        let mut config = Config::default();
        config.doors[1].pins.open = config.doors[0].pins.close;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.doors[1].id = DoorId::new("garage");
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.doors[1].pins.light = Some(5);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.daemon.tick_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.doors[0].id = DoorId::new("gar/age");
        assert!(config.validate().is_err());
    }
}
