// 进程配置
// Process configuration: serial line, data directory, HTTP bind address, MQTT session, pacing

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "RTU_GATEWAY_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// 串口设备路径
    pub port: String,
    pub baud_rate: u32,
    /// 使用 RTS 驱动 RS-485 DE/RE
    pub de_via_rts: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            de_via_rts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub reconnect_secs: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            client_id: "rtu-gateway".to_string(),
            keep_alive_secs: 30,
            reconnect_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// 同一轮询周期内相邻查询的最小间隔
    pub query_interval_ms: u64,
    /// 发送请求前的线路稳定时间，0 表示不等待
    pub settle_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            query_interval_ms: 200,
            settle_ms: 0,
        }
    }
}

/// Top-level gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub serial: SerialConfig,
    /// Root of the configuration store files
    pub data_dir: PathBuf,
    pub http_bind: String,
    pub mqtt: MqttSettings,
    pub polling: PacingConfig,
    pub stats_capacity: usize,
    pub tick_sleep_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            data_dir: PathBuf::from("./data"),
            http_bind: "0.0.0.0:8080".to_string(),
            mqtt: MqttSettings::default(),
            polling: PacingConfig::default(),
            stats_capacity: 20,
            tick_sleep_ms: 10,
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// First CLI argument, then `RTU_GATEWAY_CONFIG`, otherwise defaults
    pub fn load(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = cli_path.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        match path {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("serial.baud_rate must be positive".to_string()));
        }
        if self.stats_capacity == 0 {
            return Err(ConfigError::Invalid("stats_capacity must be positive".to_string()));
        }
        if self.mqtt.client_id.is_empty() {
            return Err(ConfigError::Invalid("mqtt.client_id must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn tick_sleep(&self) -> Duration {
        Duration::from_millis(self.tick_sleep_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = GatewayConfig::from_json(
            r#"{"serial": {"port": "/dev/ttyS1"}, "polling": {"settle_ms": 300}}"#,
        )
        .unwrap();
        assert_eq!(config.serial.port, "/dev/ttyS1");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.polling.settle_ms, 300);
        assert_eq!(config.polling.query_interval_ms, 200);
        assert_eq!(config.mqtt.reconnect_secs, 20);
        assert_eq!(config.http_bind, "0.0.0.0:8080");
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            GatewayConfig::from_json(r#"{"stats_capacity": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn file_errors_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = GatewayConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("gateway.json"));

        let missing = GatewayConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
