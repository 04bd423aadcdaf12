//! Configuration and topology types for the control layer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use mirrorwatch_actuator::PortId;
use mirrorwatch_store::Timestamp;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Current time as Unix seconds.
#[must_use]
pub fn unix_now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

/// Which SDN controller adapter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    /// Faucet: topology learned from controller events, mirroring via switch configuration.
    Faucet,
    /// Big Cloud Fabric style REST controller.
    Bcf,
    /// No controller; polls return nothing and mirroring is skipped.
    #[default]
    None,
}

impl ControllerKind {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Faucet => "faucet",
            Self::Bcf => "bcf",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerKind {
    type Err = std::convert::Infallible;

    /// Unknown names resolve to [`ControllerKind::None`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "faucet" => Self::Faucet,
            "bcf" => Self::Bcf,
            _ => Self::None,
        })
    }
}

/// Configuration for endpoint synchronization and investigation.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Only machines reported with this source are reconciled.
    pub expected_source: String,
    /// Controller adapter to use.
    pub controller_kind: ControllerKind,
    /// Base URL of a REST controller.
    pub controller_url: Option<String>,
    /// Mirror destination interface per switch.
    pub mirror_ports: BTreeMap<String, PortId>,
    /// Maximum number of endpoints mirrored at once.
    pub max_concurrent_reinvestigations: usize,
    /// How long a `Known` endpoint stays settled before it is re-mirrored.
    pub reinvestigation_frequency: Duration,
    /// How long an endpoint may stay `Mirroring` without a decision.
    pub mirror_timeout: Duration,
    /// Bound on a single controller poll.
    pub controller_timeout: Duration,
    /// How many raw controller events to retain.
    pub event_buffer: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            expected_source: "mirrorwatch".to_string(),
            controller_kind: ControllerKind::None,
            controller_url: None,
            mirror_ports: BTreeMap::new(),
            max_concurrent_reinvestigations: 2,
            reinvestigation_frequency: Duration::from_secs(900),
            mirror_timeout: Duration::from_secs(600),
            controller_timeout: Duration::from_secs(10),
            event_buffer: 1000,
        }
    }
}

impl ControlConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `EXPECTED_SOURCE`: Source name of machines to reconcile
    /// - `CONTROLLER_TYPE`: `faucet`, `bcf`, or `none`
    /// - `CONTROLLER_URL`: Base URL of a REST controller
    /// - `MIRROR_PORTS`: Comma-separated `switch:port` pairs
    /// - `MAX_CONCURRENT_REINVESTIGATIONS`: Mirroring slot count
    /// - `REINVESTIGATION_FREQUENCY`: Seconds before a known endpoint is re-mirrored
    /// - `MIRROR_TIMEOUT`: Seconds an endpoint may stay mirroring
    /// - `CONTROLLER_TIMEOUT`: Seconds a controller poll may take
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("EXPECTED_SOURCE") {
            config.expected_source = val;
        }
        if let Ok(val) = std::env::var("CONTROLLER_TYPE") {
            config.controller_kind = val.parse().unwrap_or_default();
        }
        if let Ok(val) = std::env::var("CONTROLLER_URL") {
            config.controller_url = Some(val);
        }
        if let Ok(val) = std::env::var("MIRROR_PORTS") {
            config.mirror_ports = parse_mirror_ports(&val);
        }
        if let Ok(val) = std::env::var("MAX_CONCURRENT_REINVESTIGATIONS") {
            if let Ok(n) = val.parse() {
                config.max_concurrent_reinvestigations = n;
            }
        }
        if let Ok(val) = std::env::var("REINVESTIGATION_FREQUENCY") {
            if let Ok(secs) = val.parse() {
                config.reinvestigation_frequency = Duration::from_secs(secs);
            }
        }
        if let Ok(val) = std::env::var("MIRROR_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.mirror_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(val) = std::env::var("CONTROLLER_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.controller_timeout = Duration::from_secs(secs);
            }
        }

        config
    }
}

/// Parse `sw1:24,sw2:uplink` into a switch → mirror port map.
///
/// Malformed pairs are skipped with a warning.
#[must_use]
pub fn parse_mirror_ports(value: &str) -> BTreeMap<String, PortId> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| match pair.split_once(':') {
            Some((switch, port)) if !switch.trim().is_empty() && !port.trim().is_empty() => {
                Some((switch.trim().to_string(), PortId::parse(port)))
            }
            _ => {
                tracing::warn!(pair, "Ignoring malformed mirror port setting");
                None
            }
        })
        .collect()
}

/// One topology record reported by a controller.
///
/// Decoding is tolerant: the active flag may be a boolean or `0`/`1`, ports
/// and ids may be strings or numbers, and missing fields default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    /// Whether the controller currently sees the device.
    #[serde(default, deserialize_with = "flexible_bool")]
    pub active: bool,
    /// Name of the reporting instance.
    #[serde(default)]
    pub source: String,
    /// Role as last known to the controller.
    #[serde(default, deserialize_with = "flexible_string")]
    pub role: Option<String>,
    /// State as last known to the controller.
    #[serde(default, deserialize_with = "flexible_string")]
    pub state: Option<String>,
    /// IPv4 address.
    #[serde(default, deserialize_with = "flexible_string")]
    pub ipv4: Option<String>,
    /// IPv6 address.
    #[serde(default, deserialize_with = "flexible_string")]
    pub ipv6: Option<String>,
    /// Hardware address.
    #[serde(default)]
    pub mac: String,
    /// Tenant (segment the device was learned on).
    #[serde(default, deserialize_with = "flexible_string")]
    pub tenant: Option<String>,
    /// Switch port.
    #[serde(default, deserialize_with = "flexible_string")]
    pub port: Option<String>,
    /// Switch name.
    #[serde(default)]
    pub segment: String,
    /// Raw behavior code.
    #[serde(default, deserialize_with = "flexible_i64")]
    pub behavior: i64,
    /// Controller-assigned identifier.
    #[serde(default, deserialize_with = "flexible_string")]
    pub id: Option<String>,
}

fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    })
}

fn flexible_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn flexible_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        Value::Bool(b) => i64::from(b),
        _ => 0,
    })
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Machines dropped because their source did not match.
    pub foreign: usize,
    /// Inactive machines with no endpoint, skipped.
    pub skipped: usize,
    /// Endpoints created.
    pub created: usize,
    /// Endpoints that came back from `Inactive`.
    pub restored: usize,
    /// Endpoints moved to `Inactive`.
    pub deactivated: usize,
}

/// Outcome of one reinvestigation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReinvestigationReport {
    /// Mirroring endpoints returned to the queue after the mirror timeout.
    pub timed_out: usize,
    /// Endpoints moved into `Mirroring`.
    pub started: usize,
    /// Endpoints moved into `Queued` for lack of a slot.
    pub queued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_kind_parsing() {
        assert_eq!("faucet".parse::<ControllerKind>(), Ok(ControllerKind::Faucet));
        assert_eq!("BCF".parse::<ControllerKind>(), Ok(ControllerKind::Bcf));
        assert_eq!("None".parse::<ControllerKind>(), Ok(ControllerKind::None));
        assert_eq!("something".parse::<ControllerKind>(), Ok(ControllerKind::None));
    }

    #[test]
    fn mirror_port_parsing() {
        let ports = parse_mirror_ports("sw1:24, sw2:uplink,bad,:3");
        assert_eq!(ports.len(), 2);
        assert_eq!(ports["sw1"], PortId::Number(24));
        assert_eq!(ports["sw2"], PortId::Name("uplink".to_string()));
    }

    #[test]
    fn machine_decoding_is_tolerant() {
        let machine: Machine = serde_json::from_value(serde_json::json!({
            "active": 1,
            "source": "mirrorwatch",
            "tenant": "vlan1",
            "port": 1,
            "segment": "switch1",
            "ipv4": "123.123.123.123",
            "mac": "00:00:00:00:00:00",
            "id": "foo1",
            "behavior": 1,
            "ipv6": "0",
            "ipv4_os": "unknown"
        }))
        .unwrap();
        assert!(machine.active);
        assert_eq!(machine.port.as_deref(), Some("1"));
        assert_eq!(machine.ipv6.as_deref(), Some("0"));
        assert_eq!(machine.behavior, 1);

        let sparse: Machine = serde_json::from_value(serde_json::json!({"active": false})).unwrap();
        assert!(!sparse.active);
        assert!(sparse.ipv4.is_none());
    }

    #[test]
    fn defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.expected_source, "mirrorwatch");
        assert_eq!(config.controller_kind, ControllerKind::None);
        assert_eq!(config.max_concurrent_reinvestigations, 2);
    }
}
