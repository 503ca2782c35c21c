// Timeouts, rates, ports and the runtime config file
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// Control loop frequency
pub const CONTROL_HZ: f64 = 50.0;

// Telemetry publish frequency
pub const TELEMETRY_HZ: f64 = 20.0;

// Command timeout for the staleness watchdog
pub const CMD_TIMEOUT_S: f64 = 0.2;

// Safety limits
pub const V_MAX: f64 = 0.3; // m/s
pub const W_MAX: f64 = 0.6; // rad/s

// UDP endpoints
pub const CMD_LISTEN: &str = "0.0.0.0:31001";
pub const TELEMETRY_PEER: &str = "192.168.10.1:32001";

// Chassis serial link
pub const CHASSIS_PORT: &str = "/dev/ttyCH343USB0";
pub const CHASSIS_BAUDRATE: u32 = 115_200;
pub const CHASSIS_TX_HZ: f64 = 50.0;

// UWB serial link
pub const UWB_PORT: &str = "/dev/ttyCH343USB1";
pub const UWB_BAUDRATE: u32 = 921_600;

// Bytes requested per serial read
pub const CHASSIS_READ_CHUNK: usize = 50;
pub const UWB_READ_CHUNK: usize = 150;

// Worker shutdown
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

// Console status interval
pub const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    ParseYaml {
        path: String,
        source: serde_yaml::Error,
    },
}

/// Agent configuration; every field falls back to the constants above
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub car_id: String,
    pub net: NetConfig,
    #[serde(rename = "loop")]
    pub rates: LoopConfig,
    pub chassis: ChassisConfig,
    pub safety: SafetyConfig,
    pub sensors: SensorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub cmd_listen: String,
    pub telemetry_peer: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub control_hz: f64,
    pub telemetry_hz: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChassisConfig {
    pub serial_port: String,
    pub baudrate: u32,
    pub control_hz: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub cmd_timeout_s: f64,
    pub v_max: f64,
    pub w_max: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    pub uwb: UwbConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UwbConfig {
    pub enabled: bool,
    pub serial_port: String,
    pub baudrate: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            car_id: "car_unknown".to_string(),
            net: NetConfig::default(),
            rates: LoopConfig::default(),
            chassis: ChassisConfig::default(),
            safety: SafetyConfig::default(),
            sensors: SensorsConfig::default(),
        }
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            cmd_listen: CMD_LISTEN.to_string(),
            telemetry_peer: TELEMETRY_PEER.to_string(),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            control_hz: CONTROL_HZ,
            telemetry_hz: TELEMETRY_HZ,
        }
    }
}

impl Default for ChassisConfig {
    fn default() -> Self {
        Self {
            serial_port: CHASSIS_PORT.to_string(),
            baudrate: CHASSIS_BAUDRATE,
            control_hz: CHASSIS_TX_HZ,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            cmd_timeout_s: CMD_TIMEOUT_S,
            v_max: V_MAX,
            w_max: W_MAX,
        }
    }
}

impl Default for UwbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            serial_port: UWB_PORT.to_string(),
            baudrate: UWB_BAUDRATE,
        }
    }
}

impl AgentConfig {
    /// Load from a `.yaml`/`.yml` or JSON file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse config text, picking the format from the file extension
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

        if yaml {
            // An empty YAML document means all defaults
            if text.trim().is_empty() {
                return Ok(Self::default());
            }
            serde_yaml::from_str(text).map_err(|source| ConfigError::ParseYaml {
                path: display,
                source,
            })
        } else {
            serde_json::from_str(text).map_err(|source| ConfigError::Parse {
                path: display,
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let cfg = AgentConfig::load(None).unwrap();
        assert_eq!(cfg.car_id, "car_unknown");
        assert_eq!(cfg.net.cmd_listen, CMD_LISTEN);
        assert_eq!(cfg.chassis.baudrate, 115_200);
        assert_eq!(cfg.sensors.uwb.baudrate, 921_600);
        assert!(!cfg.sensors.uwb.enabled);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let cfg: AgentConfig = serde_json::from_str(
            r#"{
                "car_id": "car_7",
                "loop": { "control_hz": 100 },
                "safety": { "v_max": 0.5 },
                "sensors": { "uwb": { "enabled": true } }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.car_id, "car_7");
        assert_eq!(cfg.rates.control_hz, 100.0);
        assert_eq!(cfg.rates.telemetry_hz, TELEMETRY_HZ);
        assert_eq!(cfg.safety.v_max, 0.5);
        assert_eq!(cfg.safety.w_max, W_MAX);
        assert!(cfg.sensors.uwb.enabled);
        assert_eq!(cfg.sensors.uwb.serial_port, UWB_PORT);
    }

    #[test]
    fn test_yaml_config() {
        let cfg = AgentConfig::parse(
            "car_id: car_3\n\
             net:\n  cmd_listen: 0.0.0.0:41001\n\
             chassis:\n  serial_port: /dev/ttyUSB0\n  control_hz: 40\n\
             sensors:\n  uwb:\n    enabled: true\n",
            Path::new("car_agent/config/default.yaml"),
        )
        .unwrap();
        assert_eq!(cfg.car_id, "car_3");
        assert_eq!(cfg.net.cmd_listen, "0.0.0.0:41001");
        assert_eq!(cfg.net.telemetry_peer, TELEMETRY_PEER);
        assert_eq!(cfg.chassis.serial_port, "/dev/ttyUSB0");
        assert_eq!(cfg.chassis.control_hz, 40.0);
        assert_eq!(cfg.chassis.baudrate, CHASSIS_BAUDRATE);
        assert!(cfg.sensors.uwb.enabled);
    }

    #[test]
    fn test_empty_yaml_is_defaults() {
        let cfg = AgentConfig::parse("\n", Path::new("agent.yml")).unwrap();
        assert_eq!(cfg.car_id, "car_unknown");
    }

    #[test]
    fn test_format_follows_extension() {
        let err = AgentConfig::parse("car_id: x", Path::new("agent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        let err = AgentConfig::parse("car_id: [", Path::new("agent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseYaml { .. }));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = AgentConfig::load(Some(Path::new("/nonexistent/agent.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
