//! Configuration for the rig daemon.
//!
//! Loads configuration from a TOML file: GPIO backend selection,
//! safety cadences and thresholds, and the TCP bind addresses.

use crate::error::Result;
use crate::monitor::MonitorParams;
use crate::sensor::RangingParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub hardware: HardwareConfig,
    pub safety: SafetyConfig,
    pub network: NetworkConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

/// GPIO backend selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HardwareConfig {
    /// GPIO backend: "sysfs" for real hardware, "mock" for bench runs
    pub backend: String,
    /// Root of the sysfs GPIO tree
    pub sysfs_root: String,
}

/// Obstacle monitoring cadences and the ranging envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SafetyConfig {
    /// Readings strictly below this stop the arm and turret (cm)
    pub obstacle_threshold_cm: u64,
    /// Delay before each sensor's first scheduled measurement (s)
    pub initial_delay_secs: u64,
    /// Post-completion delay between measurements on one sensor (s)
    pub interval_secs: u64,
    /// Per-edge wait bound when ranging; a silent echo line gives up
    /// after this long (s)
    pub echo_timeout_secs: u64,
    /// Minimum gap between trigger bursts on one sensor (s)
    pub settle_secs: u64,
    /// Trigger pulse width (ns)
    pub trigger_pulse_ns: u64,
    /// Ranging worker pool size
    pub worker_threads: usize,
}

/// TCP bind addresses
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Inbound command channel, e.g. `0.0.0.0:5580`
    pub command_address: String,
    /// Outbound telemetry broadcast, e.g. `0.0.0.0:5581`
    pub telemetry_address: String,
}

/// Periodic clearance reporting
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Seconds between four-side distance reports
    pub report_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log output (stdout, stderr, or file path)
    pub output: String,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default configuration for the excavator rig.
    ///
    /// Suitable for testing and development. Production deployments
    /// should use a proper TOML configuration file.
    pub fn rig_defaults() -> Self {
        Self {
            hardware: HardwareConfig {
                backend: "sysfs".to_string(),
                sysfs_root: "/sys/class/gpio".to_string(),
            },
            safety: SafetyConfig {
                obstacle_threshold_cm: 20,
                initial_delay_secs: 20,
                interval_secs: 1,
                echo_timeout_secs: 2,
                settle_secs: 2,
                trigger_pulse_ns: 100,
                worker_threads: 4,
            },
            network: NetworkConfig {
                command_address: "0.0.0.0:5580".to_string(),
                telemetry_address: "0.0.0.0:5581".to_string(),
            },
            telemetry: TelemetryConfig {
                report_interval_secs: 120,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                output: "stdout".to_string(),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::rig_defaults()
    }
}

impl SafetyConfig {
    /// Ranging envelope derived from the safety section
    pub fn ranging_params(&self) -> RangingParams {
        RangingParams {
            trigger_pulse: Duration::from_nanos(self.trigger_pulse_ns),
            echo_timeout: Duration::from_secs(self.echo_timeout_secs),
            settle: Duration::from_secs(self.settle_secs),
            ..RangingParams::default()
        }
    }

    /// Monitoring cadences derived from the safety section
    pub fn monitor_params(&self) -> MonitorParams {
        MonitorParams {
            threshold_cm: self.obstacle_threshold_cm,
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            interval: Duration::from_secs(self.interval_secs),
            workers: self.worker_threads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::rig_defaults();
        assert_eq!(config.hardware.backend, "sysfs");
        assert_eq!(config.safety.obstacle_threshold_cm, 20);
        assert_eq!(config.safety.initial_delay_secs, 20);
        assert_eq!(config.safety.interval_secs, 1);
        assert_eq!(config.network.command_address, "0.0.0.0:5580");
        assert_eq!(config.telemetry.report_interval_secs, 120);
    }

    #[test]
    fn test_toml_serialization() {
        let config = Config::rig_defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[hardware]"));
        assert!(toml_string.contains("[safety]"));
        assert!(toml_string.contains("[network]"));
        assert!(toml_string.contains("[telemetry]"));
        assert!(toml_string.contains("[logging]"));

        assert!(toml_string.contains("obstacle_threshold_cm = 20"));
        assert!(toml_string.contains("backend = \"sysfs\""));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[hardware]
backend = "mock"
sysfs_root = "/tmp/gpio"

[safety]
obstacle_threshold_cm = 30
initial_delay_secs = 5
interval_secs = 2
echo_timeout_secs = 1
settle_secs = 1
trigger_pulse_ns = 100
worker_threads = 2

[network]
command_address = "127.0.0.1:5580"
telemetry_address = "127.0.0.1:5581"

[telemetry]
report_interval_secs = 60

[logging]
level = "debug"
output = "stdout"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.hardware.backend, "mock");
        assert_eq!(config.safety.obstacle_threshold_cm, 30);
        assert_eq!(config.safety.worker_threads, 2);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn derived_params_follow_the_safety_section() {
        let config = Config::rig_defaults();
        let ranging = config.safety.ranging_params();
        assert_eq!(ranging.echo_timeout, Duration::from_secs(2));
        assert_eq!(ranging.settle, Duration::from_secs(2));
        let monitor = config.safety.monitor_params();
        assert_eq!(monitor.threshold_cm, 20);
        assert_eq!(monitor.initial_delay, Duration::from_secs(20));
    }
}
