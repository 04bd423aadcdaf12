//! Switch configuration actuators for mirrorwatch.
//!
//! This crate provides the [`ConfigActuator`] trait and two implementations
//! that translate investigation decisions into mirror-port configuration:
//!
//! - [`LocalConfigActuator`]: read-modify-write of a local YAML document
//! - [`RemoteConfigActuator`]: calls to a configuration RPC service over mutual TLS
//!
//! # Example
//!
//! ```no_run
//! use mirrorwatch_actuator::{ConfigActuator, LocalConfigActuator, MirrorPorts, PortId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let actuator = LocalConfigActuator::new("/etc/faucet/faucet.yaml");
//!
//! // Mirror port 3 of sw1 onto the mirror interface 24
//! actuator
//!     .set_mirror("sw1", &PortId::Number(24), MirrorPorts::from(PortId::Number(3)))
//!     .await?;
//!
//! // Clear it again; the rest of port 24's settings stay untouched
//! actuator.set_mirror("sw1", &PortId::Number(24), MirrorPorts::none()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature for the in-memory [`mock::MockActuator`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod local;
pub mod remote;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_yaml::{Mapping, Value};

pub use error::{ActuatorError, Result};
pub use local::LocalConfigActuator;
pub use remote::{RemoteActuatorConfig, RemoteConfigActuator};
pub use types::{Datapath, Interface, MirrorPorts, PortId, StackConfig, SwitchConfig, WriteMode};

/// Reads and writes switch configuration.
///
/// Implementors supply the four primitive operations; the query and mirror
/// helpers are built on top of them.
#[async_trait]
pub trait ConfigActuator: Send + Sync {
    // =========================================================================
    // Primitive operations
    // =========================================================================

    /// Load the full configuration document.
    ///
    /// # Errors
    ///
    /// Returns `ActuatorError::ConfigUnavailable` if the document is empty or unreadable.
    async fn read_config(&self) -> Result<SwitchConfig>;

    /// Save a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn write_config(&self, config: &SwitchConfig, mode: WriteMode) -> Result<()>;

    /// Replace the configuration of one port.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn set_port_config(&self, switch: &str, port: &PortId, interface: &Interface)
        -> Result<()>;

    /// Merge a partial datapath configuration into `switch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn update_switch(&self, switch: &str, partial: Mapping) -> Result<()>;

    // =========================================================================
    // Derived operations
    // =========================================================================

    /// All datapaths, keyed by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read.
    async fn get_switches(&self) -> Result<BTreeMap<String, Datapath>> {
        Ok(self.read_config().await?.dps)
    }

    /// One datapath by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read.
    async fn get_switch(&self, switch: &str) -> Result<Option<Datapath>> {
        Ok(self.get_switches().await?.remove(switch))
    }

    /// One interface of a datapath.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read.
    async fn get_port(&self, switch: &str, port: &PortId) -> Result<Option<Interface>> {
        Ok(self
            .get_switch(switch)
            .await?
            .and_then(|mut dp| dp.interfaces.remove(port)))
    }

    /// The datapath with the highest stacking priority.
    ///
    /// Priorities rank like Faucet's: the lowest non-zero value wins, ties go
    /// to the first name in order. Returns `None` when no switch is stacked.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read.
    async fn get_stack_root_switch(&self) -> Result<Option<String>> {
        Ok(self
            .get_switches()
            .await?
            .into_iter()
            .filter_map(|(name, dp)| dp.stack_priority().map(|p| (p, name)))
            .min()
            .map(|(_, name)| name))
    }

    /// Set or clear the mirror destinations of a port.
    ///
    /// A non-empty `destinations` replaces the port's `mirror` list. An empty
    /// one removes only the `mirror` key. A missing port is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read or written.
    async fn set_mirror(
        &self,
        switch: &str,
        port: &PortId,
        destinations: MirrorPorts,
    ) -> Result<()> {
        let Some(mut interface) = self.get_port(switch, port).await? else {
            tracing::error!(switch, port = %port, "Cannot set mirror on unknown port");
            return Ok(());
        };

        let changed = if destinations.is_empty() {
            interface.mirror.take().is_some()
        } else {
            let ports = destinations.into_vec();
            let changed = interface.mirror.as_ref() != Some(&ports);
            interface.mirror = Some(ports);
            changed
        };

        if !changed {
            tracing::debug!(switch, port = %port, "Mirror configuration unchanged");
            return Ok(());
        }

        tracing::info!(
            switch,
            port = %port,
            mirror = ?interface.mirror,
            "Updating mirror configuration"
        );
        self.set_port_config(switch, port, &interface).await
    }

    /// Replace the access control lists.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read or written.
    async fn set_acls(&self, acls: Value) -> Result<()> {
        let mut config = self.read_config().await?;
        config.acls = Some(acls);
        self.write_config(&config, WriteMode::Replace).await
    }
}
