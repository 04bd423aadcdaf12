//! Domain types stored in the database.
//!
//! These types represent the persisted state of tracked endpoints: their
//! identity and topology attributes, lifecycle state, transition history, and
//! timestamped classification snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use mirrorwatch_core::EndpointHash;
use serde::{Deserialize, Serialize};

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Snapshots for one address, keyed by observation time.
pub type SnapshotHistory = BTreeMap<Timestamp, ClassificationSnapshot>;

/// Lifecycle states for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EndpointState {
    /// Observed but not yet scheduled for investigation.
    Unknown = 1,
    /// Waiting for a free mirroring slot.
    Queued = 2,
    /// Traffic is being mirrored for inspection.
    Mirroring = 3,
    /// Classified by the decision engine.
    Known = 4,
    /// Excluded from investigation by an operator.
    Ignored = 5,
    /// No longer reported active by the controller.
    Inactive = 6,
}

impl EndpointState {
    /// Every state, in numeric order.
    pub const ALL: [Self; 6] = [
        Self::Unknown,
        Self::Queued,
        Self::Mirroring,
        Self::Known,
        Self::Ignored,
        Self::Inactive,
    ];

    /// Convert the state to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to an `EndpointState`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Unknown),
            2 => Some(Self::Queued),
            3 => Some(Self::Mirroring),
            4 => Some(Self::Known),
            5 => Some(Self::Ignored),
            6 => Some(Self::Inactive),
            _ => None,
        }
    }

    /// The lowercase name used in queries and metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Queued => "queued",
            Self::Mirroring => "mirroring",
            Self::Known => "known",
            Self::Ignored => "ignored",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == lower)
            .ok_or_else(|| format!("unknown endpoint state: {s}"))
    }
}

/// Topology attributes of an endpoint as last reported by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointData {
    /// Tenant (network segment) the device was learned on.
    pub tenant: String,
    /// Hardware address, lowercased.
    pub mac: String,
    /// Switch the device is attached to.
    pub segment: String,
    /// Switch port the device is attached to.
    pub port: String,
    /// Last known IPv4 address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    /// Last known IPv6 address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    /// Operator-assigned role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Identifier assigned by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Raw behavior code reported by the controller.
    #[serde(default)]
    pub behavior: i64,
}

/// One classification result for an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSnapshot {
    /// Classifier labels, most likely first.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Confidence for each label.
    #[serde(default)]
    pub confidences: Vec<f64>,
    /// Behavior verdict, `"None"` when not reported.
    #[serde(default = "ClassificationSnapshot::default_behavior")]
    pub behavior: String,
    /// Labels derived from the packet capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcap_labels: Option<String>,
    /// Detected operating system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

impl Default for ClassificationSnapshot {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            confidences: Vec::new(),
            behavior: Self::default_behavior(),
            pcap_labels: None,
            os: None,
        }
    }
}

impl ClassificationSnapshot {
    /// The verdict recorded when the decision engine reports none.
    pub const NO_BEHAVIOR: &'static str = "None";

    fn default_behavior() -> String {
        Self::NO_BEHAVIOR.to_string()
    }
}

/// Timestamped classification snapshots per address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointMetadata {
    /// Snapshots keyed by hardware address.
    #[serde(default)]
    pub mac_addresses: BTreeMap<String, SnapshotHistory>,
    /// Snapshots keyed by IPv4 address.
    #[serde(default)]
    pub ipv4_addresses: BTreeMap<String, SnapshotHistory>,
    /// Snapshots keyed by IPv6 address.
    #[serde(default)]
    pub ipv6_addresses: BTreeMap<String, SnapshotHistory>,
}

/// A recorded lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// State entered.
    pub state: EndpointState,
    /// When the state was entered.
    pub at: Timestamp,
}

/// An endpoint record stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Stable identity.
    pub hash: EndpointHash,
    /// Mutable lookup name, initially the hash hex.
    pub name: String,
    /// Topology attributes.
    pub data: EndpointData,
    /// Current lifecycle state.
    pub state: EndpointState,
    /// State to restore after leaving `Inactive` or `Ignored`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_state: Option<EndpointState>,
    /// State the endpoint is waiting to enter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_state: Option<EndpointState>,
    /// Every transition applied, oldest first.
    pub history: Vec<StateChange>,
    /// Classification snapshots.
    #[serde(default)]
    pub metadata: EndpointMetadata,
    /// First observation time.
    pub created_at: Timestamp,
}

impl Endpoint {
    /// Create a new endpoint in the `Unknown` state.
    #[must_use]
    pub fn new(mut data: EndpointData, now: Timestamp) -> Self {
        data.mac = mirrorwatch_core::normalize_mac(&data.mac);
        let hash = EndpointHash::compute(&data.tenant, &data.mac);
        Self {
            hash,
            name: hash.to_hex(),
            data,
            state: EndpointState::Unknown,
            prior_state: None,
            pending_state: None,
            history: vec![StateChange {
                state: EndpointState::Unknown,
                at: now,
            }],
            metadata: EndpointMetadata::default(),
            created_at: now,
        }
    }

    /// Time of the most recent transition.
    #[must_use]
    pub fn last_transition_at(&self) -> Timestamp {
        self.history.last().map_or(self.created_at, |c| c.at)
    }

    /// The newest snapshot recorded for this endpoint's hardware address.
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<&ClassificationSnapshot> {
        self.metadata
            .mac_addresses
            .values()
            .flat_map(|history| history.iter())
            .max_by_key(|(ts, _)| **ts)
            .map(|(_, snapshot)| snapshot)
    }

    /// The newest operating system reported for any of this endpoint's IP addresses.
    #[must_use]
    pub fn latest_os(&self) -> Option<&str> {
        self.metadata
            .ipv4_addresses
            .values()
            .chain(self.metadata.ipv6_addresses.values())
            .flat_map(|history| history.iter())
            .filter_map(|(ts, snapshot)| snapshot.os.as_deref().map(|os| (*ts, os)))
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, os)| os)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> EndpointData {
        EndpointData {
            tenant: "vlan10".to_string(),
            mac: "AA:BB:CC:00:00:01".to_string(),
            segment: "sw1".to_string(),
            port: "3".to_string(),
            ..EndpointData::default()
        }
    }

    #[test]
    fn new_endpoint_is_unknown_and_named_by_hash() {
        let endpoint = Endpoint::new(data(), 100);
        assert_eq!(endpoint.state, EndpointState::Unknown);
        assert_eq!(endpoint.name, endpoint.hash.to_hex());
        assert_eq!(endpoint.data.mac, "aa:bb:cc:00:00:01");
        assert_eq!(
            endpoint.history,
            vec![StateChange {
                state: EndpointState::Unknown,
                at: 100
            }]
        );
        assert_eq!(
            endpoint.hash,
            EndpointHash::compute("vlan10", "aa:bb:cc:00:00:01")
        );
    }

    #[test]
    fn state_names_roundtrip() {
        for state in EndpointState::ALL {
            assert_eq!(state.as_str().parse::<EndpointState>(), Ok(state));
            assert_eq!(EndpointState::from_u8(state.as_u8()), Some(state));
        }
        assert!("bogus".parse::<EndpointState>().is_err());
        assert_eq!(EndpointState::from_u8(0), None);
    }

    #[test]
    fn latest_snapshot_and_os() {
        let mut endpoint = Endpoint::new(data(), 0);
        let mac = endpoint.data.mac.clone();
        let history = endpoint.metadata.mac_addresses.entry(mac).or_default();
        history.insert(
            10,
            ClassificationSnapshot {
                labels: vec!["printer".to_string()],
                ..ClassificationSnapshot::default()
            },
        );
        history.insert(
            20,
            ClassificationSnapshot {
                labels: vec!["developer workstation".to_string()],
                ..ClassificationSnapshot::default()
            },
        );
        endpoint
            .metadata
            .ipv4_addresses
            .entry("10.0.0.1".to_string())
            .or_default()
            .insert(
                5,
                ClassificationSnapshot {
                    os: Some("Windows".to_string()),
                    ..ClassificationSnapshot::default()
                },
            );

        let latest = endpoint.latest_snapshot().unwrap();
        assert_eq!(latest.labels, vec!["developer workstation".to_string()]);
        assert_eq!(endpoint.latest_os(), Some("Windows"));
    }

    #[test]
    fn snapshot_behavior_defaults_to_none() {
        let snapshot: ClassificationSnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snapshot.behavior, "None");
        assert!(snapshot.labels.is_empty());
    }
}
