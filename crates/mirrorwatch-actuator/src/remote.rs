//! Actuation through a configuration RPC service.
//!
//! The service is reached over HTTPS with a client certificate. Documents are
//! exchanged as YAML text inside JSON request bodies. File paths are reduced
//! to their base name before they leave the process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{ActuatorError, Result};
use crate::types::{switch_patch, Interface, PortId, SwitchConfig, WriteMode};
use crate::ConfigActuator;

/// Connection settings for the configuration RPC service.
#[derive(Debug, Clone)]
pub struct RemoteActuatorConfig {
    /// Base URL of the service, e.g. `https://confrpc:59999`.
    pub server_addr: String,
    /// PEM client certificate.
    pub client_cert: PathBuf,
    /// PEM client private key.
    pub client_key: PathBuf,
    /// PEM certificate authority for the server.
    pub ca_cert: PathBuf,
    /// Configuration document to manage.
    pub config_file: String,
    /// Request timeout.
    pub request_timeout: Duration,
}

impl RemoteActuatorConfig {
    /// Settings with the default timeout.
    #[must_use]
    pub fn new(
        server_addr: impl Into<String>,
        client_cert: impl Into<PathBuf>,
        client_key: impl Into<PathBuf>,
        ca_cert: impl Into<PathBuf>,
        config_file: impl Into<String>,
    ) -> Self {
        Self {
            server_addr: server_addr.into(),
            client_cert: client_cert.into(),
            client_key: client_key.into(),
            ca_cert: ca_cert.into(),
            config_file: config_file.into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Actuator backed by the configuration RPC service.
#[derive(Debug, Clone)]
pub struct RemoteConfigActuator {
    client: reqwest::Client,
    base_url: String,
    config_file: String,
}

/// Reduce a path to its final component.
#[must_use]
pub fn config_file_path(config_file: &str) -> String {
    Path::new(config_file)
        .file_name()
        .map_or_else(|| config_file.to_string(), |n| n.to_string_lossy().into_owned())
}

#[derive(Debug, Serialize)]
struct GetConfigRequest<'a> {
    config_filename: &'a str,
}

#[derive(Debug, Deserialize)]
struct GetConfigResponse {
    #[serde(default)]
    config_yaml: Option<String>,
}

#[derive(Debug, Serialize)]
struct SetConfigRequest<'a> {
    config_filename: &'a str,
    config_yaml: String,
    merge: bool,
}

#[derive(Debug, Serialize)]
struct DpInterface {
    dp_name: String,
    port: String,
    config_yaml: String,
}

#[derive(Debug, Serialize)]
struct SetDpInterfacesRequest<'a> {
    config_filename: &'a str,
    interfaces: Vec<DpInterface>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl RemoteConfigActuator {
    /// Build an actuator with mutual-TLS credentials loaded from disk.
    ///
    /// # Errors
    ///
    /// Returns `ActuatorError::InvalidSettings` if the credentials cannot be
    /// read or parsed, or the client cannot be built.
    pub fn new(config: &RemoteActuatorConfig) -> Result<Self> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|e| {
                ActuatorError::InvalidSettings(format!("cannot read {}: {e}", path.display()))
            })
        };

        let mut identity_pem = read(&config.client_cert)?;
        identity_pem.push(b'\n');
        identity_pem.extend(read(&config.client_key)?);
        let identity = reqwest::Identity::from_pem(&identity_pem)
            .map_err(|e| ActuatorError::InvalidSettings(format!("client identity: {e}")))?;
        let ca = reqwest::Certificate::from_pem(&read(&config.ca_cert)?)
            .map_err(|e| ActuatorError::InvalidSettings(format!("CA certificate: {e}")))?;

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .add_root_certificate(ca)
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ActuatorError::InvalidSettings(format!("HTTP client: {e}")))?;

        Ok(Self::with_client(
            client,
            config.server_addr.clone(),
            &config.config_file,
        ))
    }

    /// Create an actuator with a custom reqwest client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        config_file: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config_file: config_file_path(config_file),
        }
    }

    /// Base name of the managed document, as sent to the service.
    #[must_use]
    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ActuatorError::Rpc(format!("request to {path} failed: {e}")))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let error = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("service returned status {status}"));

        tracing::error!(path, status = %status, error = %error, "Configuration RPC failed");
        Err(ActuatorError::Rpc(error))
    }

    async fn set_config_yaml(&self, config_yaml: String, merge: bool) -> Result<()> {
        let request = SetConfigRequest {
            config_filename: &self.config_file,
            config_yaml,
            merge,
        };
        self.post("/v1/config/set", &request).await?;
        tracing::debug!(config_file = %self.config_file, merge, "Wrote switch configuration");
        Ok(())
    }
}

#[async_trait]
impl ConfigActuator for RemoteConfigActuator {
    async fn read_config(&self) -> Result<SwitchConfig> {
        let request = GetConfigRequest {
            config_filename: &self.config_file,
        };
        let response: GetConfigResponse = self
            .post("/v1/config/get", &request)
            .await?
            .json()
            .await
            .map_err(|e| ActuatorError::ConfigUnavailable(format!("unreadable response: {e}")))?;

        let text = response.config_yaml.unwrap_or_default();
        SwitchConfig::from_yaml(&text).inspect_err(|e| {
            tracing::error!(config_file = %self.config_file, error = %e, "Switch configuration is empty or invalid");
        })
    }

    async fn write_config(&self, config: &SwitchConfig, mode: WriteMode) -> Result<()> {
        self.set_config_yaml(config.to_yaml()?, mode.is_merge()).await
    }

    async fn set_port_config(
        &self,
        switch: &str,
        port: &PortId,
        interface: &Interface,
    ) -> Result<()> {
        let config_yaml = serde_yaml::to_string(interface)
            .map_err(|e| ActuatorError::Serialization(e.to_string()))?;
        let request = SetDpInterfacesRequest {
            config_filename: &self.config_file,
            interfaces: vec![DpInterface {
                dp_name: switch.to_string(),
                port: port.to_string(),
                config_yaml,
            }],
        };
        self.post("/v1/config/dp_interfaces", &request).await?;
        tracing::debug!(switch, port = %port, "Updated port configuration");
        Ok(())
    }

    async fn update_switch(&self, switch: &str, partial: Mapping) -> Result<()> {
        let patch: Value = switch_patch(switch, partial);
        let config_yaml =
            serde_yaml::to_string(&patch).map_err(|e| ActuatorError::Serialization(e.to_string()))?;
        self.set_config_yaml(config_yaml, true).await
    }
}
