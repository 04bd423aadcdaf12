//! In-memory actuator for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_yaml::Mapping;

use crate::error::{ActuatorError, Result};
use crate::types::{switch_patch, Interface, PortId, SwitchConfig, WriteMode};
use crate::ConfigActuator;

/// A recorded per-port write.
#[derive(Debug, Clone, PartialEq)]
pub struct PortWrite {
    /// Target switch.
    pub switch: String,
    /// Target port.
    pub port: PortId,
    /// Interface configuration written.
    pub interface: Interface,
}

/// An actuator that keeps the document in memory and records every write.
#[derive(Default)]
pub struct MockActuator {
    config: Mutex<Option<SwitchConfig>>,
    document_writes: Mutex<Vec<WriteMode>>,
    port_writes: Mutex<Vec<PortWrite>>,
}

impl MockActuator {
    /// An actuator with no document; every read fails as unavailable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An actuator serving `config`.
    #[must_use]
    pub fn with_config(config: SwitchConfig) -> Self {
        let mock = Self::default();
        *mock.config.lock() = Some(config);
        mock
    }

    /// An actuator serving the YAML document `text`.
    ///
    /// # Panics
    ///
    /// Panics if `text` is not a valid configuration.
    #[must_use]
    pub fn from_yaml(text: &str) -> Self {
        Self::with_config(SwitchConfig::from_yaml(text).expect("valid test configuration"))
    }

    /// The current document.
    #[must_use]
    pub fn config(&self) -> Option<SwitchConfig> {
        self.config.lock().clone()
    }

    /// Drop the document so subsequent reads fail.
    pub fn clear(&self) {
        *self.config.lock() = None;
    }

    /// Number of full-document writes.
    #[must_use]
    pub fn document_write_count(&self) -> usize {
        self.document_writes.lock().len()
    }

    /// Every per-port write, oldest first.
    #[must_use]
    pub fn port_writes(&self) -> Vec<PortWrite> {
        self.port_writes.lock().clone()
    }

    /// The mirror list currently configured on a port.
    #[must_use]
    pub fn mirror_of(&self, switch: &str, port: &PortId) -> Option<Vec<PortId>> {
        self.config
            .lock()
            .as_ref()?
            .dps
            .get(switch)?
            .interfaces
            .get(port)?
            .mirror
            .clone()
    }
}

#[async_trait]
impl ConfigActuator for MockActuator {
    async fn read_config(&self) -> Result<SwitchConfig> {
        self.config
            .lock()
            .clone()
            .ok_or_else(|| ActuatorError::ConfigUnavailable("no document".to_string()))
    }

    async fn write_config(&self, config: &SwitchConfig, mode: WriteMode) -> Result<()> {
        let mut current = self.config.lock();
        let merged = match current.as_mut() {
            Some(existing) if mode.is_merge() => {
                existing.merge(config.to_value()?)?;
                true
            }
            _ => false,
        };
        if !merged {
            *current = Some(config.clone());
        }
        self.document_writes.lock().push(mode);
        Ok(())
    }

    async fn set_port_config(
        &self,
        switch: &str,
        port: &PortId,
        interface: &Interface,
    ) -> Result<()> {
        let mut current = self.config.lock();
        let dp = current
            .as_mut()
            .ok_or_else(|| ActuatorError::ConfigUnavailable("no document".to_string()))?
            .dps
            .get_mut(switch);
        if let Some(dp) = dp {
            dp.interfaces.insert(port.clone(), interface.clone());
        }
        self.port_writes.lock().push(PortWrite {
            switch: switch.to_string(),
            port: port.clone(),
            interface: interface.clone(),
        });
        Ok(())
    }

    async fn update_switch(&self, switch: &str, partial: Mapping) -> Result<()> {
        let mut current = self.config.lock();
        let config = current
            .as_mut()
            .ok_or_else(|| ActuatorError::ConfigUnavailable("no document".to_string()))?;
        config.merge(switch_patch(switch, partial))?;
        self.document_writes.lock().push(WriteMode::Merge);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MirrorPorts;

    const DOC: &str = "dps:\n  sw1:\n    interfaces:\n      1: {native_vlan: office}\n      24: {description: mirror}\n";

    #[tokio::test]
    async fn records_port_writes() {
        let mock = MockActuator::from_yaml(DOC);
        let port = PortId::Number(24);

        mock.set_mirror("sw1", &port, MirrorPorts::from(PortId::Number(1)))
            .await
            .unwrap();
        // Unchanged mirror lists are not rewritten
        mock.set_mirror("sw1", &port, MirrorPorts::from(PortId::Number(1)))
            .await
            .unwrap();

        assert_eq!(mock.port_writes().len(), 1);
        assert_eq!(mock.mirror_of("sw1", &port), Some(vec![PortId::Number(1)]));

        mock.set_mirror("sw1", &port, MirrorPorts::none())
            .await
            .unwrap();
        assert_eq!(mock.mirror_of("sw1", &port), None);
        assert_eq!(mock.port_writes().len(), 2);
    }

    #[tokio::test]
    async fn cleared_mock_is_unavailable() {
        let mock = MockActuator::from_yaml(DOC);
        mock.clear();
        assert!(mock.read_config().await.unwrap_err().is_fatal());
    }
}
