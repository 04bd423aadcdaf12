//! Switch configuration model.
//!
//! Only the keys the actuators act on are typed. Every other key is carried
//! through `extra` so that a read-modify-write cycle never drops settings it
//! does not understand.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_yaml::{Mapping, Value};

use crate::error::{ActuatorError, Result};

/// Untyped keys preserved verbatim.
pub type Extra = BTreeMap<String, Value>;

/// A switch port, addressed by number or by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortId {
    /// Numbered port.
    Number(u64),
    /// Named port.
    Name(String),
}

impl PortId {
    /// Parse a port from text, preferring the numeric form.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        s.parse::<u64>()
            .map_or_else(|_| Self::Name(s.to_string()), Self::Number)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<u64> for PortId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for PortId {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl Serialize for PortId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Number(n) => serializer.serialize_u64(*n),
            Self::Name(name) => serializer.serialize_str(name),
        }
    }
}

struct PortIdVisitor;

impl Visitor<'_> for PortIdVisitor {
    type Value = PortId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a port number or name")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<PortId, E> {
        Ok(PortId::Number(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<PortId, E> {
        u64::try_from(v)
            .map(PortId::Number)
            .map_err(|_| E::custom(format!("negative port number: {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<PortId, E> {
        Ok(PortId::parse(v))
    }
}

impl<'de> Deserialize<'de> for PortId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(PortIdVisitor)
    }
}

/// Mirror destinations, normalized to an ordered list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorPorts(Vec<PortId>);

impl MirrorPorts {
    /// No destinations; clears the mirror setting.
    #[must_use]
    pub const fn none() -> Self {
        Self(Vec::new())
    }

    /// Returns true if there are no destinations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The destinations in order.
    #[must_use]
    pub fn as_slice(&self) -> &[PortId] {
        &self.0
    }

    /// Consume into the underlying list.
    #[must_use]
    pub fn into_vec(self) -> Vec<PortId> {
        self.0
    }
}

impl From<PortId> for MirrorPorts {
    fn from(port: PortId) -> Self {
        Self(vec![port])
    }
}

impl From<Vec<PortId>> for MirrorPorts {
    fn from(ports: Vec<PortId>) -> Self {
        Self(ports)
    }
}

impl From<BTreeSet<PortId>> for MirrorPorts {
    fn from(ports: BTreeSet<PortId>) -> Self {
        Self(ports.into_iter().collect())
    }
}

/// Accept either a single port or a list of ports.
fn one_or_many<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Vec<PortId>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(PortId),
        Many(Vec<PortId>),
    }

    Ok(
        Option::<OneOrMany>::deserialize(deserializer)?.map(|v| match v {
            OneOrMany::One(port) => vec![port],
            OneOrMany::Many(ports) => ports,
        }),
    )
}

/// Configuration of one switch interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    /// Ports whose traffic is copied to this interface.
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub mirror: Option<Vec<PortId>>,
    /// Other interface settings.
    #[serde(flatten)]
    pub extra: Extra,
}

/// Stacking settings of a datapath.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Stacking priority; the lowest positive value is the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u64>,
    /// Other stacking settings.
    #[serde(flatten)]
    pub extra: Extra,
}

/// Configuration of one datapath (switch).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Datapath {
    /// Interfaces keyed by port.
    #[serde(default)]
    pub interfaces: BTreeMap<PortId, Interface>,
    /// Stacking settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<StackConfig>,
    /// Other datapath settings.
    #[serde(flatten)]
    pub extra: Extra,
}

impl Datapath {
    /// The configured stacking priority, if non-zero.
    #[must_use]
    pub fn stack_priority(&self) -> Option<u64> {
        self.stack
            .as_ref()
            .and_then(|s| s.priority)
            .filter(|p| *p > 0)
    }
}

/// The full switch configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Datapaths keyed by name.
    #[serde(default)]
    pub dps: BTreeMap<String, Datapath>,
    /// Access control lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acls: Option<Value>,
    /// Other top-level settings.
    #[serde(flatten)]
    pub extra: Extra,
}

impl SwitchConfig {
    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns `ActuatorError::ConfigUnavailable` if the document is empty,
    /// not a mapping, or does not describe a switch configuration.
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(ActuatorError::ConfigUnavailable(
                "document is empty".to_string(),
            ));
        }
        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| ActuatorError::ConfigUnavailable(format!("unparsable document: {e}")))?;
        Self::from_value(value)
    }

    /// Build a configuration from an already-parsed document.
    ///
    /// # Errors
    ///
    /// Returns `ActuatorError::ConfigUnavailable` if the value is null or not a mapping.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Err(ActuatorError::ConfigUnavailable(
                "document is empty".to_string(),
            )),
            Value::Mapping(_) => serde_yaml::from_value(value).map_err(|e| {
                ActuatorError::ConfigUnavailable(format!("invalid document: {e}"))
            }),
            _ => Err(ActuatorError::ConfigUnavailable(
                "document is not a mapping".to_string(),
            )),
        }
    }

    /// Encode the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ActuatorError::Serialization(e.to_string()))
    }

    /// Encode the configuration as a YAML value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        serde_yaml::to_value(self).map_err(|e| ActuatorError::Serialization(e.to_string()))
    }

    /// Deep-merge `partial` into this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged document no longer parses.
    pub fn merge(&mut self, partial: Value) -> Result<()> {
        let mut base = self.to_value()?;
        merge_yaml(&mut base, partial);
        *self = Self::from_value(base)?;
        Ok(())
    }
}

/// How a configuration write is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Replace the whole document.
    #[default]
    Replace,
    /// Deep-merge the written document into the existing one.
    Merge,
}

impl WriteMode {
    /// Returns true for merge writes.
    #[must_use]
    pub const fn is_merge(self) -> bool {
        matches!(self, Self::Merge)
    }
}

/// Recursively merge `overlay` into `base`. Mappings merge key by key; any
/// other value replaces what was there.
pub fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Build `{dps: {switch: partial}}`.
#[must_use]
pub fn switch_patch(switch: &str, partial: Mapping) -> Value {
    let mut dps = Mapping::new();
    dps.insert(Value::String(switch.to_string()), Value::Mapping(partial));
    let mut root = Mapping::new();
    root.insert(Value::String("dps".to_string()), Value::Mapping(dps));
    Value::Mapping(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r"
vlans:
  office:
    vid: 100
dps:
  sw1:
    dp_id: 1
    hardware: Open vSwitch
    stack:
      priority: 1
    interfaces:
      1:
        native_vlan: office
      2:
        native_vlan: office
        mirror: 1
      uplink:
        description: trunk
        mirror: [1, 3]
  sw2:
    dp_id: 2
    interfaces:
      1:
        native_vlan: office
";

    #[test]
    fn parses_and_preserves_unknown_keys() {
        let config = SwitchConfig::from_yaml(DOC).unwrap();
        assert!(config.extra.contains_key("vlans"));

        let sw1 = &config.dps["sw1"];
        assert_eq!(sw1.stack_priority(), Some(1));
        assert!(sw1.extra.contains_key("hardware"));
        assert_eq!(
            sw1.interfaces[&PortId::Number(2)].mirror,
            Some(vec![PortId::Number(1)])
        );
        assert_eq!(
            sw1.interfaces[&PortId::Name("uplink".to_string())].mirror,
            Some(vec![PortId::Number(1), PortId::Number(3)])
        );

        let reparsed = SwitchConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn empty_documents_are_unavailable() {
        for text in ["", "---\n", "null", "- 1\n- 2\n"] {
            let err = SwitchConfig::from_yaml(text).unwrap_err();
            assert!(err.is_fatal(), "{text:?} should be fatal");
        }
    }

    #[test]
    fn port_ids_normalize_numeric_text() {
        assert_eq!(PortId::parse("7"), PortId::Number(7));
        assert_eq!(PortId::parse(" eth0 "), PortId::Name("eth0".to_string()));
        assert_eq!(PortId::Number(7).to_string(), "7");
    }

    #[test]
    fn mirror_ports_normalize() {
        let one = MirrorPorts::from(PortId::Number(3));
        assert_eq!(one.as_slice(), &[PortId::Number(3)]);

        let set: BTreeSet<PortId> = [PortId::Number(5), PortId::Number(2)].into();
        assert_eq!(
            MirrorPorts::from(set).into_vec(),
            vec![PortId::Number(2), PortId::Number(5)]
        );
        assert!(MirrorPorts::none().is_empty());
    }

    #[test]
    fn merge_keeps_untouched_keys() {
        let mut config = SwitchConfig::from_yaml(DOC).unwrap();
        let patch: Value = serde_yaml::from_str("dps: {sw2: {description: lab}}").unwrap();
        config.merge(patch).unwrap();

        let sw2 = &config.dps["sw2"];
        assert_eq!(sw2.extra["description"], Value::String("lab".to_string()));
        assert!(sw2.extra.contains_key("dp_id"));
        assert_eq!(sw2.interfaces.len(), 1);
        assert_eq!(config.dps.len(), 2);
    }

    #[test]
    fn switch_patch_shape() {
        let mut partial = Mapping::new();
        partial.insert("dp_id".into(), 9.into());
        let patch = switch_patch("sw9", partial);
        assert_eq!(patch["dps"]["sw9"]["dp_id"], Value::from(9));
    }
}
