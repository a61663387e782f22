//! Simulator configuration.
//!
//! Loaded once at startup from a YAML file and treated as immutable input.
//! Validation failures are fatal and reported before anything else runs.

use crate::error::ChargerError;
use evsim_ocpp::{ConnectorStatus, OcppVersion};
use serde::Deserialize;
use std::path::Path;

/// TLS certificate configuration for `wss://` endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    /// CA certificate used to verify the server certificate chain.
    #[serde(default)]
    pub ca_file: Option<String>,
    /// Trusted server certificate, for self-signed deployments.
    #[serde(default)]
    pub server_cert_file: Option<String>,
    /// Client certificate.
    #[serde(default)]
    pub cert_file: Option<String>,
    /// Client private key.
    #[serde(default)]
    pub key_file: Option<String>,
    /// Skip server certificate verification. Insecure.
    #[serde(default)]
    pub skip_verify: bool,
}

/// Charger simulator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ocpp_version: OcppVersion,
    pub charger_id: String,
    pub server_url: String,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default = "defaults::initial_status")]
    pub initial_status: ConnectorStatus,
    pub max_current: f64,
    pub max_power: f64,
    #[serde(default)]
    pub min_current: f64,
    #[serde(default)]
    pub min_power: f64,
    /// Mains voltage in V, used for the P = I·V coupling.
    #[serde(default = "defaults::voltage")]
    pub voltage: f64,
    #[serde(default = "defaults::connector_id")]
    pub connector_id: u32,
    /// Meter sampling interval in seconds.
    #[serde(default = "defaults::meter_values_interval")]
    pub meter_values_interval: u64,
    /// Heartbeat interval in seconds; 0 disables the heartbeat until the
    /// server supplies an interval in the BootNotification response.
    #[serde(default)]
    pub heartbeat_interval: u32,
    /// Initial battery State of Charge in percent.
    #[serde(default = "defaults::initial_soc")]
    pub initial_soc: f64,
    /// Battery capacity in Wh.
    #[serde(default = "defaults::battery_capacity")]
    pub battery_capacity: f64,
}

mod defaults {
    use evsim_ocpp::ConnectorStatus;

    pub fn initial_status() -> ConnectorStatus {
        ConnectorStatus::Available
    }

    pub fn voltage() -> f64 {
        230.0
    }

    pub fn connector_id() -> u32 {
        1
    }

    pub fn meter_values_interval() -> u64 {
        30
    }

    pub fn initial_soc() -> f64 {
        20.0
    }

    pub fn battery_capacity() -> f64 {
        60_000.0
    }
}

impl Config {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ChargerError> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ChargerError::ConfigInvalid(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Config = serde_yaml::from_str(&data)
            .map_err(|e| ChargerError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every configuration rule; returns the first violation.
    pub fn validate(&self) -> Result<(), ChargerError> {
        if self.charger_id.is_empty() {
            return Err(ChargerError::ConfigInvalid("charger_id is required".into()));
        }
        if self.server_url.is_empty() {
            return Err(ChargerError::ConfigInvalid("server_url is required".into()));
        }
        if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            return Err(ChargerError::ConfigInvalid(
                "server_url must use the ws:// or wss:// scheme".into(),
            ));
        }
        if self.max_current <= 0.0 {
            return Err(ChargerError::ConfigInvalid(
                "max_current must be positive".into(),
            ));
        }
        if self.max_power <= 0.0 {
            return Err(ChargerError::ConfigInvalid(
                "max_power must be positive".into(),
            ));
        }
        if self.min_current < 0.0 {
            return Err(ChargerError::ConfigInvalid(
                "min_current cannot be negative".into(),
            ));
        }
        if self.min_power < 0.0 {
            return Err(ChargerError::ConfigInvalid(
                "min_power cannot be negative".into(),
            ));
        }
        if self.min_current > self.max_current {
            return Err(ChargerError::ConfigInvalid(
                "min_current cannot exceed max_current".into(),
            ));
        }
        if self.min_power > self.max_power {
            return Err(ChargerError::ConfigInvalid(
                "min_power cannot exceed max_power".into(),
            ));
        }
        if self.voltage <= 0.0 {
            return Err(ChargerError::ConfigInvalid(
                "voltage must be positive".into(),
            ));
        }
        if self.meter_values_interval == 0 {
            return Err(ChargerError::ConfigInvalid(
                "meter_values_interval must be positive".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.initial_soc) {
            return Err(ChargerError::ConfigInvalid(
                "initial_soc must be between 0 and 100".into(),
            ));
        }
        if self.battery_capacity <= 0.0 {
            return Err(ChargerError::ConfigInvalid(
                "battery_capacity must be positive".into(),
            ));
        }
        if !self.initial_status.is_valid_for(self.ocpp_version) {
            return Err(ChargerError::ConfigInvalid(format!(
                "initial_status {} is not valid for OCPP {}",
                self.initial_status, self.ocpp_version
            )));
        }
        Ok(())
    }

    pub fn version(&self) -> OcppVersion {
        self.ocpp_version
    }

    pub fn is_v16(&self) -> bool {
        self.ocpp_version == OcppVersion::V16
    }

    /// Assemble the TLS connector from the configured material, if any.
    pub fn tls_connector(&self) -> Result<Option<native_tls::TlsConnector>, ChargerError> {
        let Some(tls) = &self.tls else {
            return Ok(None);
        };

        let mut builder = native_tls::TlsConnector::builder();
        if tls.skip_verify {
            builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca_file) = &tls.ca_file {
            builder.add_root_certificate(read_certificate(ca_file, "CA certificate")?);
        }
        if let Some(server_cert_file) = &tls.server_cert_file {
            builder.add_root_certificate(read_certificate(server_cert_file, "server certificate")?);
        }
        if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
            let cert = std::fs::read(cert_file).map_err(|e| {
                ChargerError::TlsMaterial(format!("failed to read client certificate: {e}"))
            })?;
            let key = std::fs::read(key_file).map_err(|e| {
                ChargerError::TlsMaterial(format!("failed to read client key: {e}"))
            })?;
            let identity = native_tls::Identity::from_pkcs8(&cert, &key).map_err(|e| {
                ChargerError::TlsMaterial(format!("failed to parse client identity: {e}"))
            })?;
            builder.identity(identity);
        }

        builder
            .build()
            .map(Some)
            .map_err(|e| ChargerError::TlsMaterial(e.to_string()))
    }
}

fn read_certificate(path: &str, what: &str) -> Result<native_tls::Certificate, ChargerError> {
    let pem = std::fs::read(path)
        .map_err(|e| ChargerError::TlsMaterial(format!("failed to read {what}: {e}")))?;
    native_tls::Certificate::from_pem(&pem)
        .map_err(|e| ChargerError::TlsMaterial(format!("failed to parse {what}: {e}")))
}
