//! Inbound Call handlers.
//!
//! Every handler follows the same pattern: parse the payload (log and bail
//! on failure, since the server-driven path never raises to a caller),
//! inspect the state under the lock, answer with exactly one CallResult,
//! and when the command was accepted, schedule the state-engine follow-up
//! after a short delay so the server sees the response before the next
//! outbound Call.

use crate::charger::{Charger, TransactionId, FOLLOW_UP_DELAY};
use evsim_ocpp::{v16, v201, CommandStatus, ConnectorStatus, OcppVersion};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

impl Charger {
    /// Route a server-initiated Call to its dialect handler. Unknown actions
    /// are logged and ignored; no CallError is returned.
    pub(crate) async fn handle_call(&self, unique_id: &str, action: &str, payload: Value) {
        match self.config().version() {
            OcppVersion::V16 => match action {
                v16::ACTION_REMOTE_START_TRANSACTION => {
                    self.handle_remote_start_v16(unique_id, payload).await;
                }
                v16::ACTION_REMOTE_STOP_TRANSACTION => {
                    self.handle_remote_stop_v16(unique_id, payload).await;
                }
                v16::ACTION_SET_CHARGING_PROFILE => {
                    self.handle_set_charging_profile_v16(unique_id, payload).await;
                }
                _ => warn!(%action, "unhandled action"),
            },
            OcppVersion::V201 => match action {
                v201::ACTION_REQUEST_START_TRANSACTION => {
                    self.handle_request_start_v201(unique_id, payload).await;
                }
                v201::ACTION_REQUEST_STOP_TRANSACTION => {
                    self.handle_request_stop_v201(unique_id, payload).await;
                }
                v201::ACTION_SET_CHARGING_PROFILE => {
                    self.handle_set_charging_profile_v201(unique_id, payload).await;
                }
                _ => warn!(%action, "unhandled action"),
            },
        }
    }

    async fn handle_remote_start_v16(&self, unique_id: &str, payload: Value) {
        let req: v16::RemoteStartTransactionRequest = match serde_json::from_value(payload) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "failed to parse RemoteStartTransaction");
                return;
            }
        };
        info!(id_tag = %req.id_tag, "received RemoteStartTransaction");

        let (observed, status) = {
            let mut st = self.state_mut();
            match st.status {
                ConnectorStatus::Available => {
                    // latch the authorization, the start happens on plugin
                    st.pending_remote_start_id_tag = Some(req.id_tag.clone());
                    info!("remote start accepted, waiting for the cable");
                    (ConnectorStatus::Available, CommandStatus::Accepted)
                }
                ConnectorStatus::Preparing => {
                    st.pending_remote_start_id_tag = None;
                    st.pending_remote_start_id = None;
                    (ConnectorStatus::Preparing, CommandStatus::Accepted)
                }
                other => {
                    info!(status = %other, "remote start rejected");
                    (other, CommandStatus::Rejected)
                }
            }
        };

        let resp = v16::RemoteStartTransactionResponse { status };
        if let Err(e) = self.send_call_result(unique_id, &resp).await {
            warn!(error = %e, "failed to answer RemoteStartTransaction");
            return;
        }

        if status == CommandStatus::Accepted && observed == ConnectorStatus::Preparing {
            self.defer_start(req.id_tag);
        }
    }

    async fn handle_request_start_v201(&self, unique_id: &str, payload: Value) {
        let req: v201::RequestStartTransactionRequest = match serde_json::from_value(payload) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "failed to parse RequestStartTransaction");
                return;
            }
        };
        info!(
            id_token = %req.id_token.id_token,
            remote_start_id = req.remote_start_id,
            "received RequestStartTransaction"
        );

        let (observed, status, transaction_id, status_info) = {
            let mut st = self.state_mut();
            match st.status {
                ConnectorStatus::Available => {
                    st.pending_remote_start_id_tag = Some(req.id_token.id_token.clone());
                    st.pending_remote_start_id = Some(req.remote_start_id);
                    // the response already names the transaction id
                    let id = Uuid::new_v4().to_string();
                    st.transaction_id = Some(TransactionId::Uuid(id.clone()));
                    info!("remote start accepted, waiting for the cable");
                    (
                        ConnectorStatus::Available,
                        CommandStatus::Accepted,
                        Some(id),
                        None,
                    )
                }
                ConnectorStatus::Occupied => {
                    st.pending_remote_start_id_tag = None;
                    // the Started event echoes the server's remoteStartId
                    st.pending_remote_start_id = Some(req.remote_start_id);
                    let id = Uuid::new_v4().to_string();
                    st.transaction_id = Some(TransactionId::Uuid(id.clone()));
                    (
                        ConnectorStatus::Occupied,
                        CommandStatus::Accepted,
                        Some(id),
                        None,
                    )
                }
                other => {
                    info!(status = %other, "remote start rejected");
                    let status_info = v201::StatusInfo {
                        reason_code: "Occupied".to_owned(),
                        additional_info: Some(format!(
                            "Charger is busy, current status: {other}"
                        )),
                    };
                    (other, CommandStatus::Rejected, None, Some(status_info))
                }
            }
        };

        let resp = v201::RequestStartTransactionResponse {
            status,
            transaction_id,
            status_info,
        };
        if let Err(e) = self.send_call_result(unique_id, &resp).await {
            warn!(error = %e, "failed to answer RequestStartTransaction");
            return;
        }

        if status == CommandStatus::Accepted && observed == ConnectorStatus::Occupied {
            self.defer_start(req.id_token.id_token);
        }
    }

    async fn handle_remote_stop_v16(&self, unique_id: &str, payload: Value) {
        let req: v16::RemoteStopTransactionRequest = match serde_json::from_value(payload) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "failed to parse RemoteStopTransaction");
                return;
            }
        };
        info!(transaction_id = req.transaction_id, "received RemoteStopTransaction");

        let matches = {
            let st = self.state();
            st.is_charging
                && st.transaction_id == Some(TransactionId::Seq(req.transaction_id))
        };
        let status = if matches {
            CommandStatus::Accepted
        } else {
            CommandStatus::Rejected
        };

        let resp = v16::RemoteStopTransactionResponse { status };
        if let Err(e) = self.send_call_result(unique_id, &resp).await {
            warn!(error = %e, "failed to answer RemoteStopTransaction");
            return;
        }

        if status == CommandStatus::Accepted {
            self.defer_stop();
        }
    }

    async fn handle_request_stop_v201(&self, unique_id: &str, payload: Value) {
        let req: v201::RequestStopTransactionRequest = match serde_json::from_value(payload) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "failed to parse RequestStopTransaction");
                return;
            }
        };
        info!(transaction_id = %req.transaction_id, "received RequestStopTransaction");

        let matches = {
            let st = self.state();
            st.is_charging
                && st.transaction_id == Some(TransactionId::Uuid(req.transaction_id.clone()))
        };
        let status = if matches {
            CommandStatus::Accepted
        } else {
            CommandStatus::Rejected
        };

        let resp = v201::RequestStopTransactionResponse {
            status,
            status_info: None,
        };
        if let Err(e) = self.send_call_result(unique_id, &resp).await {
            warn!(error = %e, "failed to answer RequestStopTransaction");
            return;
        }

        if status == CommandStatus::Accepted {
            self.defer_stop();
        }
    }

    async fn handle_set_charging_profile_v16(&self, unique_id: &str, payload: Value) {
        let req: v16::SetChargingProfileRequest = match serde_json::from_value(payload) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "failed to parse SetChargingProfile");
                return;
            }
        };
        info!(connector_id = req.connector_id, "received SetChargingProfile");

        let mut status = v16::ChargingProfileStatus::Accepted;
        let schedule = &req.cs_charging_profiles.charging_schedule;
        if let Some(period) = schedule.charging_schedule_period.first() {
            // 1.6 limits are applied in amps only
            if schedule.charging_rate_unit == "A" {
                if let Err(e) = self.set_current(period.limit).await {
                    warn!(error = %e, "failed to apply charging profile");
                    status = v16::ChargingProfileStatus::Rejected;
                }
            } else {
                warn!(unit = %schedule.charging_rate_unit, "unsupported chargingRateUnit");
                status = v16::ChargingProfileStatus::Rejected;
            }
        }

        let resp = v16::SetChargingProfileResponse { status };
        if let Err(e) = self.send_call_result(unique_id, &resp).await {
            warn!(error = %e, "failed to answer SetChargingProfile");
        }
    }

    async fn handle_set_charging_profile_v201(&self, unique_id: &str, payload: Value) {
        let req: v201::SetChargingProfileRequest = match serde_json::from_value(payload) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "failed to parse SetChargingProfile");
                return;
            }
        };
        info!(evse_id = req.evse_id, "received SetChargingProfile");

        let mut status = CommandStatus::Accepted;
        if let Some(schedule) = req.charging_profile.charging_schedule.first() {
            if let Some(period) = schedule.charging_schedule_period.first() {
                let amps = match schedule.charging_rate_unit.as_str() {
                    "A" => Some(period.limit),
                    "W" => Some(period.limit / self.config().voltage),
                    unit => {
                        warn!(%unit, "unsupported chargingRateUnit");
                        status = CommandStatus::Rejected;
                        None
                    }
                };
                if let Some(amps) = amps {
                    if let Err(e) = self.set_current(amps).await {
                        warn!(error = %e, "failed to apply charging profile");
                        status = CommandStatus::Rejected;
                    }
                }
            }
        }

        let resp = v201::SetChargingProfileResponse {
            status,
            status_info: None,
        };
        if let Err(e) = self.send_call_result(unique_id, &resp).await {
            warn!(error = %e, "failed to answer SetChargingProfile");
        }
    }

    fn defer_start(&self, id_tag: String) {
        let charger = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FOLLOW_UP_DELAY).await;
            if let Err(e) = charger.start_transaction(&id_tag).await {
                warn!(error = %e, "remote-started transaction failed");
            }
        });
    }

    fn defer_stop(&self) {
        let charger = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FOLLOW_UP_DELAY).await;
            if let Err(e) = charger.stop_transaction("Remote").await {
                warn!(error = %e, "remote-stopped transaction failed");
            }
        });
    }
}
