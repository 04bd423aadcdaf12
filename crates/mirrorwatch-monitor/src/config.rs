//! Monitor configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mirrorwatch_actuator::{
    ConfigActuator, LocalConfigActuator, RemoteActuatorConfig, RemoteConfigActuator,
};
use mirrorwatch_control::{ControlConfig, ControllerKind};

use crate::error::Result;

/// How switch configuration is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActuatorMode {
    /// Read and write the configuration file directly.
    #[default]
    Local,
    /// Go through the configuration RPC service.
    Remote,
}

impl ActuatorMode {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "remote" | "rpc" => Self::Remote,
            _ => Self::Local,
        }
    }
}

/// Configuration for the monitor process.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Operator API listen address.
    pub listen_addr: String,
    /// `RocksDB` directory.
    pub data_dir: PathBuf,
    /// Message broker host; without one the monitor runs without a bus.
    pub bus_host: Option<String>,
    /// Message broker port.
    pub bus_port: u16,
    /// Client identifier presented to the broker.
    pub bus_client_id: String,
    /// How long the loop waits for work before re-checking the stop flag.
    pub poll_timeout: Duration,
    /// Interval between topology refreshes.
    pub scan_frequency: Duration,
    /// Switch configuration access.
    pub actuator_mode: ActuatorMode,
    /// Switch configuration document.
    pub faucet_config_file: String,
    /// Configuration RPC service address.
    pub confrpc_addr: String,
    /// Client certificate for the configuration RPC service.
    pub confrpc_client_cert: PathBuf,
    /// Client key for the configuration RPC service.
    pub confrpc_client_key: PathBuf,
    /// Certificate authority for the configuration RPC service.
    pub confrpc_ca_cert: PathBuf,
    /// Endpoint synchronization settings.
    pub control: ControlConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from("/data/mirrorwatch"),
            bus_host: None,
            bus_port: 1883,
            bus_client_id: "mirrorwatch-monitor".to_string(),
            poll_timeout: Duration::from_millis(1000),
            scan_frequency: Duration::from_secs(5),
            actuator_mode: ActuatorMode::Local,
            faucet_config_file: "/etc/faucet/faucet.yaml".to_string(),
            confrpc_addr: "https://faucetconfrpc:59999".to_string(),
            confrpc_client_cert: PathBuf::from("/certs/client.crt"),
            confrpc_client_key: PathBuf::from("/certs/client.key"),
            confrpc_ca_cert: PathBuf::from("/certs/ca.crt"),
            control: ControlConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads the following environment variables, plus those read by
    /// [`ControlConfig::from_env`]:
    /// - `LISTEN_ADDR`: Operator API listen address
    /// - `DATA_DIR`: `RocksDB` directory
    /// - `BUS_HOST`, `BUS_PORT`, `BUS_CLIENT_ID`: Message broker connection
    /// - `POLL_TIMEOUT_MS`: Work queue poll timeout in milliseconds
    /// - `SCAN_FREQUENCY`: Seconds between topology refreshes
    /// - `ACTUATOR_MODE`: `local` or `remote`
    /// - `FAUCET_CONFIG_FILE`: Switch configuration document
    /// - `CONFRPC_ADDR`, `CONFRPC_CLIENT_CERT`, `CONFRPC_CLIENT_KEY`, `CONFRPC_CA_CERT`:
    ///   Configuration RPC service connection
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self {
            control: ControlConfig::from_env(),
            ..Self::default()
        };

        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("BUS_HOST") {
            config.bus_host = Some(val).filter(|h| !h.trim().is_empty());
        }
        if let Ok(val) = std::env::var("BUS_PORT") {
            if let Ok(port) = val.parse() {
                config.bus_port = port;
            }
        }
        if let Ok(val) = std::env::var("BUS_CLIENT_ID") {
            config.bus_client_id = val;
        }
        if let Ok(val) = std::env::var("POLL_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                config.poll_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(val) = std::env::var("SCAN_FREQUENCY") {
            if let Ok(secs) = val.parse() {
                config.scan_frequency = Duration::from_secs(secs);
            }
        }
        if let Ok(val) = std::env::var("ACTUATOR_MODE") {
            config.actuator_mode = ActuatorMode::parse(&val);
        }
        if let Ok(val) = std::env::var("FAUCET_CONFIG_FILE") {
            config.faucet_config_file = val;
        }
        if let Ok(val) = std::env::var("CONFRPC_ADDR") {
            config.confrpc_addr = val;
        }
        if let Ok(val) = std::env::var("CONFRPC_CLIENT_CERT") {
            config.confrpc_client_cert = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CONFRPC_CLIENT_KEY") {
            config.confrpc_client_key = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CONFRPC_CA_CERT") {
            config.confrpc_ca_cert = PathBuf::from(val);
        }

        config
    }

    /// Build the switch configuration actuator, if the controller needs one.
    ///
    /// # Errors
    ///
    /// Returns an error if remote credentials cannot be loaded.
    pub fn actuator(&self) -> Result<Option<Arc<dyn ConfigActuator>>> {
        if self.control.controller_kind != ControllerKind::Faucet {
            return Ok(None);
        }
        let actuator: Arc<dyn ConfigActuator> = match self.actuator_mode {
            ActuatorMode::Local => {
                tracing::info!(path = %self.faucet_config_file, "Using local switch configuration");
                Arc::new(LocalConfigActuator::new(&self.faucet_config_file))
            }
            ActuatorMode::Remote => {
                tracing::info!(addr = %self.confrpc_addr, "Using configuration RPC service");
                let remote = RemoteActuatorConfig::new(
                    self.confrpc_addr.clone(),
                    self.confrpc_client_cert.clone(),
                    self.confrpc_client_key.clone(),
                    self.confrpc_ca_cert.clone(),
                    self.faucet_config_file.clone(),
                );
                Arc::new(RemoteConfigActuator::new(&remote)?)
            }
        };
        Ok(Some(actuator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actuator_modes() {
        assert_eq!(ActuatorMode::parse("remote"), ActuatorMode::Remote);
        assert_eq!(ActuatorMode::parse("RPC"), ActuatorMode::Remote);
        assert_eq!(ActuatorMode::parse("local"), ActuatorMode::Local);
        assert_eq!(ActuatorMode::parse("anything"), ActuatorMode::Local);
    }

    #[test]
    fn only_faucet_needs_an_actuator() {
        let config = MonitorConfig::default();
        assert!(config.actuator().unwrap().is_none());

        let mut config = MonitorConfig::default();
        config.control.controller_kind = ControllerKind::Faucet;
        assert!(config.actuator().unwrap().is_some());

        config.actuator_mode = ActuatorMode::Remote;
        config.confrpc_client_cert = PathBuf::from("/nonexistent/client.crt");
        assert!(config.actuator().is_err());
    }

    #[test]
    fn defaults() {
        let config = MonitorConfig::default();
        assert!(config.bus_host.is_none());
        assert_eq!(config.bus_port, 1883);
        assert_eq!(config.scan_frequency, Duration::from_secs(5));
    }
}
