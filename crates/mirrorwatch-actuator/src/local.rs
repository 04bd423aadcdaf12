//! Actuation against a local YAML configuration file.
//!
//! Every call performs a full read-modify-write of the document. Writes go to
//! a sibling temporary file which is then renamed over the original.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_yaml::Mapping;

use crate::error::{ActuatorError, Result};
use crate::types::{merge_yaml, switch_patch, Interface, PortId, SwitchConfig, WriteMode};
use crate::ConfigActuator;

/// Actuator that edits a configuration file on local disk.
#[derive(Debug, Clone)]
pub struct LocalConfigActuator {
    path: PathBuf,
}

impl LocalConfigActuator {
    /// Create an actuator for the document at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the managed document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    async fn save(&self, config: &SwitchConfig) -> Result<()> {
        let text = config.to_yaml()?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "Wrote switch configuration");
        Ok(())
    }
}

#[async_trait]
impl ConfigActuator for LocalConfigActuator {
    async fn read_config(&self) -> Result<SwitchConfig> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            tracing::error!(path = %self.path.display(), error = %e, "Cannot read switch configuration");
            ActuatorError::ConfigUnavailable(format!("{}: {e}", self.path.display()))
        })?;

        SwitchConfig::from_yaml(&text).inspect_err(|e| {
            tracing::error!(path = %self.path.display(), error = %e, "Switch configuration is empty or invalid");
        })
    }

    async fn write_config(&self, config: &SwitchConfig, mode: WriteMode) -> Result<()> {
        match mode {
            WriteMode::Replace => self.save(config).await,
            WriteMode::Merge => {
                let mut current = self.read_config().await?.to_value()?;
                merge_yaml(&mut current, config.to_value()?);
                self.save(&SwitchConfig::from_value(current)?).await
            }
        }
    }

    async fn set_port_config(
        &self,
        switch: &str,
        port: &PortId,
        interface: &Interface,
    ) -> Result<()> {
        let mut config = self.read_config().await?;
        let Some(dp) = config.dps.get_mut(switch) else {
            tracing::error!(switch, port = %port, "Cannot configure port on unknown switch");
            return Ok(());
        };
        dp.interfaces.insert(port.clone(), interface.clone());
        self.save(&config).await
    }

    async fn update_switch(&self, switch: &str, partial: Mapping) -> Result<()> {
        let mut config = self.read_config().await?;
        if !config.dps.contains_key(switch) {
            tracing::error!(switch, "Cannot update unknown switch");
            return Ok(());
        }
        config.merge(switch_patch(switch, partial))?;
        self.save(&config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MirrorPorts;
    use serde_yaml::Value;
    use tempfile::TempDir;

    const DOC: &str = r"
dps:
  sw1:
    dp_id: 1
    timeout: 300
    interfaces:
      1:
        native_vlan: office
      24:
        description: mirror
        output_only: true
  sw2:
    dp_id: 2
    stack:
      priority: 2
    interfaces: {}
  sw3:
    dp_id: 3
    stack:
      priority: 1
    interfaces: {}
";

    fn setup(doc: &str) -> (LocalConfigActuator, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("faucet.yaml");
        std::fs::write(&path, doc).unwrap();
        (LocalConfigActuator::new(path), dir)
    }

    #[tokio::test]
    async fn set_mirror_replaces_list() {
        let (actuator, _dir) = setup(DOC);
        let port = PortId::Number(24);

        actuator
            .set_mirror("sw1", &port, MirrorPorts::from(PortId::Number(1)))
            .await
            .unwrap();
        actuator
            .set_mirror(
                "sw1",
                &port,
                MirrorPorts::from(vec![PortId::Number(1), PortId::Number(2)]),
            )
            .await
            .unwrap();

        let interface = actuator.get_port("sw1", &port).await.unwrap().unwrap();
        assert_eq!(
            interface.mirror,
            Some(vec![PortId::Number(1), PortId::Number(2)])
        );
        assert_eq!(interface.extra["output_only"], Value::Bool(true));
    }

    #[tokio::test]
    async fn clearing_mirror_keeps_other_settings() {
        let (actuator, _dir) = setup(DOC);
        let port = PortId::Number(24);
        actuator
            .set_mirror("sw1", &port, MirrorPorts::from(PortId::Number(1)))
            .await
            .unwrap();
        let before = actuator.get_switch("sw1").await.unwrap().unwrap();

        actuator
            .set_mirror("sw1", &port, MirrorPorts::none())
            .await
            .unwrap();

        let after = actuator.get_switch("sw1").await.unwrap().unwrap();
        assert_eq!(after.extra, before.extra);
        let interface = &after.interfaces[&port];
        assert!(interface.mirror.is_none());
        assert_eq!(interface.extra, before.interfaces[&port].extra);
        assert_eq!(after.interfaces[&PortId::Number(1)], before.interfaces[&PortId::Number(1)]);
    }

    #[tokio::test]
    async fn missing_port_is_a_noop() {
        let (actuator, dir) = setup(DOC);
        let before = std::fs::read_to_string(dir.path().join("faucet.yaml")).unwrap();

        actuator
            .set_mirror("sw1", &PortId::Number(99), MirrorPorts::from(PortId::Number(1)))
            .await
            .unwrap();
        actuator
            .set_mirror("nope", &PortId::Number(1), MirrorPorts::from(PortId::Number(1)))
            .await
            .unwrap();

        let after = std::fs::read_to_string(dir.path().join("faucet.yaml")).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn empty_document_is_fatal() {
        let (actuator, _dir) = setup("");
        let err = actuator.read_config().await.unwrap_err();
        assert!(err.is_fatal());

        let missing = LocalConfigActuator::new("/nonexistent/faucet.yaml");
        assert!(missing.read_config().await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn stack_root_is_lowest_priority() {
        let (actuator, _dir) = setup(DOC);
        assert_eq!(
            actuator.get_stack_root_switch().await.unwrap().as_deref(),
            Some("sw3")
        );

        let (unstacked, _dir2) = setup("dps:\n  sw1:\n    stack:\n      priority: 0\n");
        assert_eq!(unstacked.get_stack_root_switch().await.unwrap(), None);
    }

    #[tokio::test]
    async fn stack_root_ties_go_to_first_name() {
        let (actuator, _dir) = setup(
            "dps:\n  swb:\n    stack:\n      priority: 1\n  swa:\n    stack:\n      priority: 1\n  sw0:\n    stack:\n      priority: 0\n",
        );
        assert_eq!(
            actuator.get_stack_root_switch().await.unwrap().as_deref(),
            Some("swa")
        );
    }

    #[tokio::test]
    async fn update_switch_merges() {
        let (actuator, _dir) = setup(DOC);
        let mut partial = Mapping::new();
        partial.insert("timeout".into(), 600.into());

        actuator.update_switch("sw1", partial).await.unwrap();

        let sw1 = actuator.get_switch("sw1").await.unwrap().unwrap();
        assert_eq!(sw1.extra["timeout"], Value::from(600));
        assert_eq!(sw1.extra["dp_id"], Value::from(1));
        assert_eq!(sw1.interfaces.len(), 2);
    }

    #[tokio::test]
    async fn set_acls_writes_top_level() {
        let (actuator, _dir) = setup(DOC);
        let acls: Value = serde_yaml::from_str("block: [{rule: {actions: {allow: 0}}}]").unwrap();
        actuator.set_acls(acls.clone()).await.unwrap();

        let config = actuator.read_config().await.unwrap();
        assert_eq!(config.acls, Some(acls));
        assert_eq!(config.dps.len(), 3);
    }

    #[tokio::test]
    async fn merge_write_keeps_existing_switches() {
        let (actuator, _dir) = setup(DOC);
        let partial = SwitchConfig::from_yaml("dps:\n  sw4:\n    dp_id: 4\n").unwrap();
        actuator
            .write_config(&partial, WriteMode::Merge)
            .await
            .unwrap();

        let switches = actuator.get_switches().await.unwrap();
        assert_eq!(switches.len(), 4);
        assert!(switches.contains_key("sw1"));
    }
}
