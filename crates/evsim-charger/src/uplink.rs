//! Registration, liveness and vendor telemetry Calls.
//!
//! BootNotification, StatusNotification, the heartbeat ticker and the
//! license-plate DataTransfer all live here: everything the charger sends
//! that is not part of a transaction.

use crate::charger::Charger;
use crate::error::ChargerError;
use crate::rpc::CallResponse;
use chrono::{SecondsFormat, Utc};
use evsim_ocpp::{v16, v201, ConnectorStatus, OcppVersion, WireError};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const FIRMWARE_VERSION_V16: &str = "1.0.0";
const FIRMWARE_VERSION_V201: &str = "2.0.0";

/// RFC 3339 UTC timestamp with second precision, as OCPP expects.
pub(crate) fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LicensePlatePayload<'a> {
    license_plate: &'a str,
    connector_id: u32,
}

impl Charger {
    /// Register with the Central System. A positive `interval` in the
    /// response overrides the configured heartbeat interval.
    pub async fn boot_notification(&self) -> Result<(), ChargerError> {
        let response = match self.config().version() {
            OcppVersion::V16 => {
                let req = v16::BootNotificationRequest {
                    charge_point_vendor: "evsim".to_owned(),
                    charge_point_model: "EVSIM-1".to_owned(),
                    charge_point_serial_number: Some(self.config().charger_id.clone()),
                    charge_box_serial_number: None,
                    firmware_version: Some(FIRMWARE_VERSION_V16.to_owned()),
                    iccid: None,
                    imsi: None,
                    meter_type: None,
                    meter_serial_number: None,
                };
                self.send_call(v16::ACTION_BOOT_NOTIFICATION, &req).await?
            }
            OcppVersion::V201 => {
                let req = v201::BootNotificationRequest {
                    reason: "PowerUp".to_owned(),
                    charging_station: v201::ChargingStation {
                        serial_number: Some(self.config().charger_id.clone()),
                        model: "EVSIM-2".to_owned(),
                        vendor_name: "evsim".to_owned(),
                        firmware_version: Some(FIRMWARE_VERSION_V201.to_owned()),
                        modem: None,
                    },
                };
                self.send_call(v201::ACTION_BOOT_NOTIFICATION, &req).await?
            }
        };

        match response {
            CallResponse::Result(payload) => {
                let (status, interval) = match self.config().version() {
                    OcppVersion::V16 => {
                        let resp: v16::BootNotificationResponse =
                            serde_json::from_value(payload).map_err(WireError::from)?;
                        (resp.status, resp.interval)
                    }
                    OcppVersion::V201 => {
                        let resp: v201::BootNotificationResponse =
                            serde_json::from_value(payload).map_err(WireError::from)?;
                        (resp.status, resp.interval)
                    }
                };
                info!(?status, interval, "BootNotification acknowledged");
                if interval > 0 {
                    self.state_mut().heartbeat_interval_s = interval;
                    info!(interval, "heartbeat interval set by server");
                }
            }
            CallResponse::Error { code, description } => {
                warn!(%code, %description, "BootNotification rejected");
            }
        }
        Ok(())
    }

    /// Report a connector status to the server.
    pub(crate) async fn send_status_notification(
        &self,
        status: ConnectorStatus,
    ) -> Result<(), ChargerError> {
        let response = match self.config().version() {
            OcppVersion::V16 => {
                let req = v16::StatusNotificationRequest {
                    connector_id: self.config().connector_id,
                    error_code: "NoError".to_owned(),
                    status,
                    timestamp: Some(utc_timestamp()),
                    info: None,
                    vendor_id: None,
                    vendor_error_code: None,
                };
                self.send_call(v16::ACTION_STATUS_NOTIFICATION, &req).await?
            }
            OcppVersion::V201 => {
                let req = v201::StatusNotificationRequest {
                    timestamp: utc_timestamp(),
                    connector_status: status,
                    evse_id: self.config().connector_id,
                    connector_id: 1,
                };
                self.send_call(v201::ACTION_STATUS_NOTIFICATION, &req)
                    .await?
            }
        };
        match response {
            CallResponse::Result(_) => debug!(%status, "StatusNotification acknowledged"),
            CallResponse::Error { code, description } => {
                warn!(%code, %description, "StatusNotification rejected");
            }
        }
        Ok(())
    }

    /// Send one Heartbeat Call.
    pub async fn heartbeat(&self) -> Result<(), ChargerError> {
        if !self.is_connected() {
            return Err(ChargerError::NotConnected);
        }
        let response = match self.config().version() {
            OcppVersion::V16 => {
                self.send_call(v16::ACTION_HEARTBEAT, &v16::HeartbeatRequest {})
                    .await?
            }
            OcppVersion::V201 => {
                self.send_call(v201::ACTION_HEARTBEAT, &v201::HeartbeatRequest {})
                    .await?
            }
        };
        match response {
            CallResponse::Result(payload) => {
                let current_time = match self.config().version() {
                    OcppVersion::V16 => {
                        serde_json::from_value::<v16::HeartbeatResponse>(payload)
                            .map_err(WireError::from)?
                            .current_time
                    }
                    OcppVersion::V201 => {
                        serde_json::from_value::<v201::HeartbeatResponse>(payload)
                            .map_err(WireError::from)?
                            .current_time
                    }
                };
                debug!(%current_time, "Heartbeat acknowledged");
            }
            CallResponse::Error { code, description } => {
                warn!(%code, %description, "Heartbeat rejected");
            }
        }
        Ok(())
    }

    /// Start the heartbeat ticker. Runs only while connected and only when
    /// an interval is known; idempotent. Failures are logged and the ticker
    /// keeps going.
    pub(crate) fn start_heartbeat_ticker(&self) {
        let (interval_s, mut stop) = {
            let mut st = self.state_mut();
            if !st.connected || st.heartbeat_stop.is_some() {
                return;
            }
            if st.heartbeat_interval_s == 0 {
                info!("heartbeat disabled (no interval configured)");
                return;
            }
            let (stop_tx, stop_rx) = watch::channel(());
            st.heartbeat_stop = Some(stop_tx);
            (st.heartbeat_interval_s, stop_rx)
        };

        let charger = self.clone();
        let period = Duration::from_secs(u64::from(interval_s));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            info!(interval_s, "heartbeat ticker started");
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = charger.heartbeat().await {
                            warn!(error = %e, "heartbeat failed");
                        }
                    }
                }
            }
            info!("heartbeat ticker stopped");
        });
    }

    /// Attach a license plate to the charger and forward it to the server
    /// as a vendor DataTransfer.
    pub async fn set_license_plate(&self, plate: &str) -> Result<(), ChargerError> {
        let connected = {
            let mut st = self.state_mut();
            st.license_plate = Some(plate.to_owned());
            st.connected
        };
        info!(plate, "license plate set");
        if !connected {
            return Ok(());
        }

        let data = serde_json::to_string(&LicensePlatePayload {
            license_plate: plate,
            connector_id: self.config().connector_id,
        })
        .map_err(WireError::from)?;

        let response = match self.config().version() {
            OcppVersion::V16 => {
                let req = v16::DataTransferRequest {
                    vendor_id: "LicensePlate".to_owned(),
                    message_id: Some("EVLicensePlate".to_owned()),
                    data: Some(data),
                };
                self.send_call(v16::ACTION_DATA_TRANSFER, &req).await?
            }
            OcppVersion::V201 => {
                let req = v201::DataTransferRequest {
                    vendor_id: "LicensePlate".to_owned(),
                    message_id: Some("EVLicensePlate".to_owned()),
                    data: Some(data),
                };
                self.send_call(v201::ACTION_DATA_TRANSFER, &req).await?
            }
        };
        match response {
            CallResponse::Result(payload) => {
                let status = match self.config().version() {
                    OcppVersion::V16 => {
                        serde_json::from_value::<v16::DataTransferResponse>(payload)
                            .map_err(WireError::from)?
                            .status
                    }
                    OcppVersion::V201 => {
                        serde_json::from_value::<v201::DataTransferResponse>(payload)
                            .map_err(WireError::from)?
                            .status
                    }
                };
                info!(%status, "DataTransfer(LicensePlate) acknowledged");
            }
            CallResponse::Error { code, description } => {
                warn!(%code, %description, "DataTransfer(LicensePlate) rejected");
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn heartbeat_ticker_running(&self) -> bool {
        self.state().heartbeat_stop.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support;

    #[test]
    fn test_utc_timestamp_is_rfc3339() {
        let ts = utc_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[tokio::test]
    async fn test_heartbeat_requires_connection() {
        let charger = Charger::new(test_support::config(OcppVersion::V16)).unwrap();
        let err = charger.heartbeat().await.unwrap_err();
        assert!(matches!(err, ChargerError::NotConnected));
    }

    #[tokio::test]
    async fn test_heartbeat_ticker_needs_connection_and_interval() {
        let mut config = test_support::config(OcppVersion::V16);
        config.heartbeat_interval = 60;
        let charger = Charger::new(config).unwrap();

        // not connected: the ticker must not start
        charger.start_heartbeat_ticker();
        assert!(!charger.heartbeat_ticker_running());

        // connected but interval 0: disabled
        let charger = Charger::new(test_support::config(OcppVersion::V16)).unwrap();
        charger.state_mut().connected = true;
        charger.start_heartbeat_ticker();
        assert!(!charger.heartbeat_ticker_running());
    }

    #[tokio::test]
    async fn test_heartbeat_ticker_is_idempotent() {
        let mut config = test_support::config(OcppVersion::V16);
        config.heartbeat_interval = 60;
        let charger = Charger::new(config).unwrap();
        charger.state_mut().connected = true;

        charger.start_heartbeat_ticker();
        assert!(charger.heartbeat_ticker_running());
        charger.start_heartbeat_ticker();
        assert!(charger.heartbeat_ticker_running());
    }

    #[tokio::test]
    async fn test_license_plate_offline_sets_state_only() {
        let charger = Charger::new(test_support::config(OcppVersion::V16)).unwrap();
        charger.set_license_plate("AB-123-CD").await.unwrap();
        assert_eq!(
            charger.snapshot().license_plate.as_deref(),
            Some("AB-123-CD")
        );
    }
}
