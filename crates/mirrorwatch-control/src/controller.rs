//! SDN controller adapters.
//!
//! An adapter answers two questions for the sync engine: which machines the
//! controller currently sees, and how to start or stop mirroring one of them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirrorwatch_actuator::{ConfigActuator, MirrorPorts, PortId};
use mirrorwatch_store::Endpoint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ControlError, Result};
use crate::types::{ControlConfig, ControllerKind, Machine};

/// ACL rules keyed by name, as carried by `update_acls` messages.
pub type AclRules = BTreeMap<String, Vec<Value>>;

/// Capabilities of an SDN controller.
#[async_trait]
pub trait SdnController: Send + Sync {
    /// Which adapter this is.
    fn kind(&self) -> ControllerKind;

    /// Machines currently known to the controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller cannot be queried.
    async fn get_machines(&self) -> Result<Vec<Machine>>;

    /// Start mirroring the endpoint's switch port.
    ///
    /// Returns false if the endpoint's switch has no mirror destination.
    ///
    /// # Errors
    ///
    /// Returns an error if actuation fails.
    async fn mirror_endpoint(&self, endpoint: &Endpoint) -> Result<bool>;

    /// Stop mirroring the endpoint's switch port.
    ///
    /// # Errors
    ///
    /// Returns an error if actuation fails.
    async fn unmirror_endpoint(&self, endpoint: &Endpoint) -> Result<bool>;

    /// Replace the installed ACL rules.
    ///
    /// # Errors
    ///
    /// Returns an error if actuation fails.
    async fn update_acls(&self, acls: &AclRules) -> Result<()>;

    /// Feed a raw controller event to the adapter.
    fn ingest_event(&self, _event: &Value) {}
}

/// Select a controller adapter for `config`.
///
/// Faucet needs a configuration actuator and a REST controller needs a URL;
/// when either is missing the no-op adapter is used.
#[must_use]
pub fn resolve_controller(
    config: &ControlConfig,
    actuator: Option<Arc<dyn ConfigActuator>>,
) -> Arc<dyn SdnController> {
    match (config.controller_kind, actuator, config.controller_url.as_deref()) {
        (ControllerKind::Faucet, Some(actuator), _) => Arc::new(FaucetController::new(
            actuator,
            config.mirror_ports.clone(),
            config.expected_source.clone(),
        )),
        (ControllerKind::Bcf, _, Some(url)) => Arc::new(BcfController::new(
            url,
            config.expected_source.clone(),
            config.controller_timeout,
        )),
        (ControllerKind::None, _, _) => Arc::new(NoopController),
        (kind, _, _) => {
            tracing::warn!(controller = %kind, "Controller is not fully configured, using no-op controller");
            Arc::new(NoopController)
        }
    }
}

// =============================================================================
// Faucet
// =============================================================================

/// Faucet adapter.
///
/// Machines are learned from `L2_LEARN` and `L2_EXPIRE` events. Mirroring adds
/// the endpoint's port to the `mirror` list of the switch's mirror interface.
pub struct FaucetController {
    actuator: Arc<dyn ConfigActuator>,
    mirror_ports: BTreeMap<String, PortId>,
    source: String,
    learned: Mutex<BTreeMap<(String, String), Machine>>,
}

impl FaucetController {
    /// Create a Faucet adapter.
    #[must_use]
    pub fn new(
        actuator: Arc<dyn ConfigActuator>,
        mirror_ports: BTreeMap<String, PortId>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            actuator,
            mirror_ports,
            source: source.into(),
            learned: Mutex::new(BTreeMap::new()),
        }
    }

    fn mirror_target(&self, endpoint: &Endpoint) -> Option<(&str, &PortId, PortId)> {
        let switch = endpoint.data.segment.as_str();
        let Some(mirror_port) = self.mirror_ports.get(switch) else {
            tracing::warn!(endpoint = %endpoint.name, switch, "No mirror port configured for switch");
            return None;
        };
        Some((switch, mirror_port, PortId::parse(&endpoint.data.port)))
    }

    async fn edit_mirror_list(
        &self,
        endpoint: &Endpoint,
        edit: impl FnOnce(&mut Vec<PortId>, PortId) -> bool + Send,
    ) -> Result<bool> {
        let Some((switch, mirror_port, port)) = self.mirror_target(endpoint) else {
            return Ok(false);
        };

        let mut ports = self
            .actuator
            .get_port(switch, mirror_port)
            .await?
            .and_then(|iface| iface.mirror)
            .unwrap_or_default();

        if edit(&mut ports, port) {
            self.actuator
                .set_mirror(switch, mirror_port, MirrorPorts::from(ports))
                .await?;
        }
        Ok(true)
    }

    fn learn(&self, dp_name: &str, body: &Value, active: bool) {
        let Some(mac) = body.get("eth_src").and_then(Value::as_str) else {
            return;
        };
        let port = match body.get("port_no") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => return,
        };
        if self.mirror_ports.get(dp_name) == Some(&PortId::parse(&port)) {
            return;
        }

        let mac = mirrorwatch_core::normalize_mac(mac);
        let tenant = body
            .get("vid")
            .map(|v| match v {
                Value::String(s) => format!("VLAN{s}"),
                other => format!("VLAN{other}"),
            })
            .unwrap_or_default();
        let src_ip = body
            .get("l3_src_ip")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut learned = self.learned.lock();
        let machine = learned
            .entry((tenant.clone(), mac.clone()))
            .or_insert_with(|| Machine {
                source: self.source.clone(),
                mac: mac.clone(),
                tenant: Some(tenant.clone()),
                ..Machine::default()
            });
        machine.active = active;
        if active {
            machine.segment = dp_name.to_string();
            machine.port = Some(port);
            match src_ip {
                Some(ip) if ip.contains(':') => machine.ipv6 = Some(ip),
                Some(ip) => machine.ipv4 = Some(ip),
                None => {}
            }
        }
    }

    /// Number of machines learned so far.
    #[must_use]
    pub fn learned_count(&self) -> usize {
        self.learned.lock().len()
    }
}

#[async_trait]
impl SdnController for FaucetController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Faucet
    }

    async fn get_machines(&self) -> Result<Vec<Machine>> {
        Ok(self.learned.lock().values().cloned().collect())
    }

    async fn mirror_endpoint(&self, endpoint: &Endpoint) -> Result<bool> {
        self.edit_mirror_list(endpoint, |ports, port| {
            if ports.contains(&port) {
                false
            } else {
                ports.push(port);
                true
            }
        })
        .await
    }

    async fn unmirror_endpoint(&self, endpoint: &Endpoint) -> Result<bool> {
        self.edit_mirror_list(endpoint, |ports, port| {
            let before = ports.len();
            ports.retain(|p| *p != port);
            ports.len() != before
        })
        .await
    }

    async fn update_acls(&self, acls: &AclRules) -> Result<()> {
        let rules = serde_yaml::to_value(acls)
            .map_err(|e| ControlError::Internal(format!("cannot encode ACL rules: {e}")))?;
        tracing::info!(count = acls.len(), "Replacing ACLs");
        self.actuator.set_acls(rules).await?;
        Ok(())
    }

    fn ingest_event(&self, event: &Value) {
        let Some(dp_name) = event.get("dp_name").and_then(Value::as_str) else {
            return;
        };
        if let Some(body) = event.get("L2_LEARN") {
            self.learn(dp_name, body, true);
        } else if let Some(body) = event.get("L2_EXPIRE") {
            self.learn(dp_name, body, false);
        }
    }
}

// =============================================================================
// REST controller
// =============================================================================

/// Adapter for a REST controller that reports endpoints and manages span sessions.
#[derive(Debug, Clone)]
pub struct BcfController {
    client: reqwest::Client,
    base_url: String,
    source: String,
}

#[derive(Debug, Serialize)]
struct SpanRequest<'a> {
    action: &'a str,
    tenant: &'a str,
    segment: &'a str,
    port: &'a str,
    mac: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl BcfController {
    /// Create an adapter for the controller at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, source: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self::with_client(client, base_url, source)
    }

    /// Create an adapter with a custom reqwest client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            source: source.into(),
        }
    }

    /// Get the base URL of the controller.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("controller returned status {status}"));
        Err(ControlError::Controller(error))
    }

    async fn span(&self, action: &str, endpoint: &Endpoint) -> Result<bool> {
        let url = format!("{}/v1/span", self.base_url);
        let request = SpanRequest {
            action,
            tenant: &endpoint.data.tenant,
            segment: &endpoint.data.segment,
            port: &endpoint.data.port,
            mac: &endpoint.data.mac,
        };
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ControlError::Controller(format!("span request failed: {e}")))?;
        Self::check(response).await?;
        tracing::debug!(endpoint = %endpoint.name, action, "Updated span session");
        Ok(true)
    }
}

#[async_trait]
impl SdnController for BcfController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Bcf
    }

    async fn get_machines(&self) -> Result<Vec<Machine>> {
        let url = format!("{}/v1/endpoints", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ControlError::Controller(format!("endpoint request failed: {e}")))?;
        let mut machines: Vec<Machine> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ControlError::Controller(format!("failed to parse endpoints: {e}")))?;

        for machine in &mut machines {
            if machine.source.is_empty() {
                machine.source.clone_from(&self.source);
            }
        }
        Ok(machines)
    }

    async fn mirror_endpoint(&self, endpoint: &Endpoint) -> Result<bool> {
        self.span("add", endpoint).await
    }

    async fn unmirror_endpoint(&self, endpoint: &Endpoint) -> Result<bool> {
        self.span("remove", endpoint).await
    }

    async fn update_acls(&self, acls: &AclRules) -> Result<()> {
        let url = format!("{}/v1/acls", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(acls)
            .send()
            .await
            .map_err(|e| ControlError::Controller(format!("ACL request failed: {e}")))?;
        Self::check(response).await?;
        Ok(())
    }
}

// =============================================================================
// No-op
// =============================================================================

/// A controller that reports nothing and actuates nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopController;

#[async_trait]
impl SdnController for NoopController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::None
    }

    async fn get_machines(&self) -> Result<Vec<Machine>> {
        Ok(Vec::new())
    }

    async fn mirror_endpoint(&self, endpoint: &Endpoint) -> Result<bool> {
        tracing::warn!(
            endpoint = %endpoint.name,
            "NoopController: mirror_endpoint called but no controller configured"
        );
        Ok(false)
    }

    async fn unmirror_endpoint(&self, endpoint: &Endpoint) -> Result<bool> {
        tracing::warn!(
            endpoint = %endpoint.name,
            "NoopController: unmirror_endpoint called but no controller configured"
        );
        Ok(false)
    }

    async fn update_acls(&self, acls: &AclRules) -> Result<()> {
        tracing::warn!(
            count = acls.len(),
            "NoopController: update_acls called but no controller configured"
        );
        Ok(())
    }
}

/// A scripted controller for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;

    /// A controller that serves a fixed machine list and records actuation.
    #[derive(Default)]
    pub struct MockController {
        machines: Mutex<Vec<Machine>>,
        mirrored: Mutex<Vec<String>>,
        unmirrored: Mutex<Vec<String>>,
        acls: Mutex<Vec<AclRules>>,
        events: Mutex<Vec<Value>>,
        poll_delay: Mutex<Option<Duration>>,
    }

    impl MockController {
        /// Create a mock controller with no machines.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Replace the machine list.
        pub fn set_machines(&self, machines: Vec<Machine>) {
            *self.machines.lock() = machines;
        }

        /// Make every poll take `delay`.
        pub fn set_poll_delay(&self, delay: Duration) {
            *self.poll_delay.lock() = Some(delay);
        }

        /// Names of endpoints mirrored, in order.
        #[must_use]
        pub fn mirrored(&self) -> Vec<String> {
            self.mirrored.lock().clone()
        }

        /// Names of endpoints unmirrored, in order.
        #[must_use]
        pub fn unmirrored(&self) -> Vec<String> {
            self.unmirrored.lock().clone()
        }

        /// ACL updates received.
        #[must_use]
        pub fn acl_updates(&self) -> Vec<AclRules> {
            self.acls.lock().clone()
        }

        /// Raw events received.
        #[must_use]
        pub fn events(&self) -> Vec<Value> {
            self.events.lock().clone()
        }
    }

    #[async_trait]
    impl SdnController for MockController {
        fn kind(&self) -> ControllerKind {
            ControllerKind::None
        }

        async fn get_machines(&self) -> Result<Vec<Machine>> {
            let delay = *self.poll_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.machines.lock().clone())
        }

        async fn mirror_endpoint(&self, endpoint: &Endpoint) -> Result<bool> {
            self.mirrored.lock().push(endpoint.name.clone());
            Ok(true)
        }

        async fn unmirror_endpoint(&self, endpoint: &Endpoint) -> Result<bool> {
            self.unmirrored.lock().push(endpoint.name.clone());
            Ok(true)
        }

        async fn update_acls(&self, acls: &AclRules) -> Result<()> {
            self.acls.lock().push(acls.clone());
            Ok(())
        }

        fn ingest_event(&self, event: &Value) {
            self.events.lock().push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorwatch_actuator::mock::MockActuator;
    use mirrorwatch_store::EndpointData;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOC: &str = "dps:\n  sw1:\n    interfaces:\n      1: {native_vlan: office}\n      2: {native_vlan: office}\n      24: {description: mirror, output_only: true}\n";

    fn endpoint(port: &str) -> Endpoint {
        Endpoint::new(
            EndpointData {
                tenant: "VLAN100".to_string(),
                mac: format!("00:00:00:00:00:0{port}"),
                segment: "sw1".to_string(),
                port: port.to_string(),
                ..EndpointData::default()
            },
            0,
        )
    }

    fn faucet(actuator: Arc<MockActuator>) -> FaucetController {
        let mut mirror_ports = BTreeMap::new();
        mirror_ports.insert("sw1".to_string(), PortId::Number(24));
        FaucetController::new(actuator, mirror_ports, "mirrorwatch")
    }

    #[test]
    fn resolves_by_kind() {
        let mut config = ControlConfig::default();
        assert_eq!(resolve_controller(&config, None).kind(), ControllerKind::None);

        config.controller_kind = ControllerKind::Faucet;
        assert_eq!(resolve_controller(&config, None).kind(), ControllerKind::None);
        let actuator: Arc<dyn ConfigActuator> = Arc::new(MockActuator::from_yaml(DOC));
        assert_eq!(
            resolve_controller(&config, Some(actuator)).kind(),
            ControllerKind::Faucet
        );

        config.controller_kind = ControllerKind::Bcf;
        config.controller_url = Some("http://bcf:8000".to_string());
        assert_eq!(resolve_controller(&config, None).kind(), ControllerKind::Bcf);
    }

    #[tokio::test]
    async fn faucet_mirror_and_unmirror() {
        let actuator = Arc::new(MockActuator::from_yaml(DOC));
        let controller = faucet(actuator.clone());
        let mirror = PortId::Number(24);

        assert!(controller.mirror_endpoint(&endpoint("1")).await.unwrap());
        assert!(controller.mirror_endpoint(&endpoint("2")).await.unwrap());
        assert_eq!(
            actuator.mirror_of("sw1", &mirror),
            Some(vec![PortId::Number(1), PortId::Number(2)])
        );

        controller.unmirror_endpoint(&endpoint("1")).await.unwrap();
        assert_eq!(actuator.mirror_of("sw1", &mirror), Some(vec![PortId::Number(2)]));

        controller.unmirror_endpoint(&endpoint("2")).await.unwrap();
        assert_eq!(actuator.mirror_of("sw1", &mirror), None);

        let iface = actuator.get_port("sw1", &mirror).await.unwrap().unwrap();
        assert_eq!(iface.extra["output_only"], serde_yaml::Value::Bool(true));
    }

    #[tokio::test]
    async fn faucet_without_mirror_port_skips() {
        let actuator = Arc::new(MockActuator::from_yaml(DOC));
        let controller = FaucetController::new(actuator.clone(), BTreeMap::new(), "mirrorwatch");
        assert!(!controller.mirror_endpoint(&endpoint("1")).await.unwrap());
        assert!(actuator.port_writes().is_empty());
    }

    #[tokio::test]
    async fn faucet_learns_from_events() {
        let controller = faucet(Arc::new(MockActuator::from_yaml(DOC)));

        controller.ingest_event(&json!({
            "dp_name": "sw1",
            "L2_LEARN": {"port_no": 1, "vid": 100, "eth_src": "AA:00:00:00:00:01", "l3_src_ip": "10.0.0.1"}
        }));
        controller.ingest_event(&json!({
            "dp_name": "sw1",
            "L2_LEARN": {"port_no": 24, "vid": 100, "eth_src": "aa:00:00:00:00:02"}
        }));
        controller.ingest_event(&json!({"dp_name": "sw1", "PORT_CHANGE": {}}));

        let machines = controller.get_machines().await.unwrap();
        assert_eq!(machines.len(), 1);
        let machine = &machines[0];
        assert!(machine.active);
        assert_eq!(machine.mac, "aa:00:00:00:00:01");
        assert_eq!(machine.tenant.as_deref(), Some("VLAN100"));
        assert_eq!(machine.ipv4.as_deref(), Some("10.0.0.1"));
        assert_eq!(machine.source, "mirrorwatch");

        controller.ingest_event(&json!({
            "dp_name": "sw1",
            "L2_EXPIRE": {"port_no": 1, "vid": 100, "eth_src": "aa:00:00:00:00:01"}
        }));
        let machines = controller.get_machines().await.unwrap();
        assert!(!machines[0].active);
        assert_eq!(machines[0].ipv4.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn faucet_acls_replace_previous_rules() {
        let actuator = Arc::new(MockActuator::from_yaml(DOC));
        let controller = faucet(actuator.clone());

        let mut first = AclRules::new();
        first.insert("10.0.0.1".to_string(), vec![json!("old")]);
        controller.update_acls(&first).await.unwrap();

        let mut second = AclRules::new();
        second.insert("10.0.0.2".to_string(), vec![json!("new")]);
        controller.update_acls(&second).await.unwrap();

        let config = actuator.config().unwrap();
        let stored = config.acls.unwrap();
        assert!(stored.get("10.0.0.1").is_none());
        assert_eq!(
            stored["10.0.0.2"],
            serde_yaml::to_value(vec!["new"]).unwrap()
        );
        assert_eq!(config.dps.len(), 1);
    }

    #[tokio::test]
    async fn bcf_polls_and_spans() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/endpoints"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"active": 1, "mac": "00:00:00:00:00:01", "tenant": "t", "segment": "sw1", "port": 1},
                {"active": 0, "source": "other", "mac": "00:00:00:00:00:02"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/span"))
            .and(body_partial_json(json!({"action": "add", "segment": "sw1", "port": "1"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let controller = BcfController::with_client(reqwest::Client::new(), server.uri(), "mirrorwatch");
        let machines = controller.get_machines().await.unwrap();
        assert_eq!(machines.len(), 2);
        assert_eq!(machines[0].source, "mirrorwatch");
        assert_eq!(machines[1].source, "other");

        assert!(controller.mirror_endpoint(&endpoint("1")).await.unwrap());
    }

    #[tokio::test]
    async fn bcf_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/endpoints"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "down"})))
            .mount(&server)
            .await;

        let controller = BcfController::with_client(reqwest::Client::new(), server.uri(), "mirrorwatch");
        let err = controller.get_machines().await.unwrap_err();
        assert!(matches!(err, ControlError::Controller(ref msg) if msg == "down"));
    }
}
