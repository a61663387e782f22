//! Transaction lifecycle and meter integration.
//!
//! The meter is a deterministic integrator: each tick converts the current
//! limit into power, accumulates energy over the sampling interval and
//! advances the battery SOC. OCPP 1.6 couples the ticker to the Charging
//! status; OCPP 2.0.1 couples it to the transaction itself.

use crate::charger::{Charger, ChargerState, TransactionId};
use crate::error::ChargerError;
use crate::rpc::CallResponse;
use crate::uplink::utc_timestamp;
use evsim_ocpp::{v16, v201, ConnectorStatus, OcppVersion, WireError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One meter sample, captured under the state lock.
struct MeterSample {
    meter_value: i64,
    soc: f64,
    current: f64,
    power: f64,
    seq_no: u64,
    transaction_id: Option<TransactionId>,
    connected: bool,
}

impl Charger {
    /// Start a transaction with the given authorization tag.
    ///
    /// Requires Preparing (1.6) or Occupied (2.0.1). Resets the meter and
    /// sequence counter, then emits the dialect's start message when
    /// connected: StartTransaction for 1.6 (the server assigns the id) or
    /// TransactionEvent(Started) for 2.0.1 (the id is a local UUID, kept if
    /// a remote-start handler already generated one).
    pub async fn start_transaction(&self, id_tag: &str) -> Result<(), ChargerError> {
        let version = self.config().version();
        let required = ConnectorStatus::occupied_for(version);
        let (connected, remote_start_id) = {
            let mut st = self.state_mut();
            if st.status != required {
                return Err(ChargerError::WrongStatus {
                    operation: "start transaction",
                    state: format!("status must be {required} (current: {})", st.status),
                });
            }
            st.id_tag = Some(id_tag.to_owned());
            st.meter_value = 0;
            st.seq_no = 0;
            st.is_charging = true;
            if version == OcppVersion::V201 {
                if !matches!(st.transaction_id, Some(TransactionId::Uuid(_))) {
                    st.transaction_id = Some(TransactionId::Uuid(Uuid::new_v4().to_string()));
                }
                // the connector status does not change, start the ticker here
                self.start_meter_ticker_locked(&mut st);
            }
            (st.connected, st.pending_remote_start_id.take())
        };
        info!(id_tag, "transaction started locally");

        match version {
            OcppVersion::V16 => {
                // entering Charging also starts the meter ticker
                self.set_status(ConnectorStatus::Charging).await?;
                if connected {
                    self.send_start_transaction(id_tag).await?;
                }
            }
            OcppVersion::V201 => {
                if connected {
                    self.send_transaction_event_started(id_tag, remote_start_id)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Stop the active transaction.
    ///
    /// Captures the final meter value and transaction id, then emits
    /// StopTransaction (1.6) or TransactionEvent(Ended) with a final energy
    /// sample (2.0.1).
    pub async fn stop_transaction(&self, reason: &str) -> Result<(), ChargerError> {
        let version = self.config().version();
        let (meter_value, transaction_id, id_tag, seq_no, connected, meter_stop) = {
            let mut st = self.state_mut();
            if !st.is_charging {
                return Err(ChargerError::WrongStatus {
                    operation: "stop transaction",
                    state: "no transaction is active".into(),
                });
            }
            st.is_charging = false;
            st.seq_no += 1;
            // 2.0.1 keeps the connector Occupied, stop the ticker directly
            let meter_stop = if version == OcppVersion::V201 {
                st.meter_stop.take()
            } else {
                None
            };
            (
                st.meter_value,
                st.transaction_id.take(),
                st.id_tag.take(),
                st.seq_no,
                st.connected,
                meter_stop,
            )
        };
        drop(meter_stop);
        info!(reason, "transaction stopped locally");

        match version {
            OcppVersion::V16 => {
                // leaving Charging also stops the meter ticker
                self.set_status(ConnectorStatus::Finishing).await?;
                if connected {
                    self.send_stop_transaction(meter_value, transaction_id, id_tag, reason)
                        .await?;
                }
            }
            OcppVersion::V201 => {
                if connected {
                    self.send_transaction_event_ended(meter_value, transaction_id, seq_no, reason)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Advance the meter by one sampling interval and report the sample.
    ///
    /// power = min(current · voltage, max_power); the energy increment is
    /// integrated into the cumulative register and into the battery SOC,
    /// clamped at 100 %.
    pub async fn meter_values(&self) -> Result<(), ChargerError> {
        let config = self.config();
        let version = config.version();
        let sample = {
            let mut st = self.state_mut();
            let power = (st.current * config.voltage).min(config.max_power);
            let energy_wh = (power * config.meter_values_interval as f64 / 3600.0).round() as i64;
            st.meter_value += energy_wh;
            st.soc = (st.soc + (energy_wh as f64 / config.battery_capacity) * 100.0).min(100.0);
            if version == OcppVersion::V201 {
                st.seq_no += 1;
            }
            MeterSample {
                meter_value: st.meter_value,
                soc: st.soc,
                current: st.current,
                power,
                seq_no: st.seq_no,
                transaction_id: st.transaction_id.clone(),
                connected: st.connected,
            }
        };
        info!(
            energy_wh = sample.meter_value,
            current = sample.current,
            power = sample.power,
            soc = sample.soc,
            "meter sample"
        );

        if !sample.connected {
            return Ok(());
        }
        match version {
            OcppVersion::V16 => self.send_meter_values(&sample).await,
            OcppVersion::V201 => self.send_transaction_event_updated(&sample).await,
        }
    }

    async fn send_start_transaction(&self, id_tag: &str) -> Result<(), ChargerError> {
        let req = v16::StartTransactionRequest {
            connector_id: self.config().connector_id,
            id_tag: id_tag.to_owned(),
            meter_start: 0,
            timestamp: utc_timestamp(),
            reservation_id: None,
        };
        match self.send_call(v16::ACTION_START_TRANSACTION, &req).await? {
            CallResponse::Result(payload) => {
                let resp: v16::StartTransactionResponse =
                    serde_json::from_value(payload).map_err(WireError::from)?;
                self.state_mut().transaction_id = Some(TransactionId::Seq(resp.transaction_id));
                info!(
                    transaction_id = resp.transaction_id,
                    status = %resp.id_tag_info.status,
                    "StartTransaction acknowledged"
                );
            }
            CallResponse::Error { code, description } => {
                warn!(%code, %description, "StartTransaction rejected");
            }
        }
        Ok(())
    }

    async fn send_transaction_event_started(
        &self,
        id_tag: &str,
        remote_start_id: Option<i64>,
    ) -> Result<(), ChargerError> {
        let Some(TransactionId::Uuid(transaction_id)) = self.state().transaction_id.clone() else {
            debug!("no transaction id, skipping TransactionEvent(Started)");
            return Ok(());
        };
        let req = v201::TransactionEventRequest {
            event_type: v201::TransactionEventType::Started,
            timestamp: utc_timestamp(),
            trigger_reason: v201::TriggerReason::Authorized,
            seq_no: 0,
            transaction_info: v201::Transaction {
                transaction_id: transaction_id.clone(),
                charging_state: Some(v201::ChargingState::Charging),
                time_spent_charging: None,
                stopped_reason: None,
                remote_start_id,
            },
            offline: None,
            number_of_phases_used: None,
            cable_max_current: None,
            reservation_id: None,
            evse: Some(v201::Evse {
                id: self.config().connector_id,
                connector_id: Some(1),
            }),
            id_token: Some(v201::IdToken {
                id_token: id_tag.to_owned(),
                token_type: "ISO14443".to_owned(),
            }),
            meter_value: None,
        };
        match self.send_call(v201::ACTION_TRANSACTION_EVENT, &req).await? {
            CallResponse::Result(_) => {
                info!(%transaction_id, "TransactionEvent(Started) acknowledged");
            }
            CallResponse::Error { code, description } => {
                warn!(%code, %description, "TransactionEvent(Started) rejected");
            }
        }
        Ok(())
    }

    async fn send_stop_transaction(
        &self,
        meter_value: i64,
        transaction_id: Option<TransactionId>,
        id_tag: Option<String>,
        reason: &str,
    ) -> Result<(), ChargerError> {
        let transaction_id = match transaction_id {
            Some(TransactionId::Seq(id)) => id,
            _ => 0,
        };
        let req = v16::StopTransactionRequest {
            id_tag,
            meter_stop: meter_value,
            timestamp: utc_timestamp(),
            transaction_id,
            reason: Some(reason.to_owned()),
            transaction_data: None,
        };
        match self.send_call(v16::ACTION_STOP_TRANSACTION, &req).await? {
            CallResponse::Result(_) => {
                info!(transaction_id, meter_stop = meter_value, reason, "StopTransaction acknowledged");
            }
            CallResponse::Error { code, description } => {
                warn!(%code, %description, "StopTransaction rejected");
            }
        }
        Ok(())
    }

    async fn send_transaction_event_ended(
        &self,
        meter_value: i64,
        transaction_id: Option<TransactionId>,
        seq_no: u64,
        reason: &str,
    ) -> Result<(), ChargerError> {
        let Some(TransactionId::Uuid(transaction_id)) = transaction_id else {
            debug!("no transaction id, skipping TransactionEvent(Ended)");
            return Ok(());
        };
        let timestamp = utc_timestamp();
        let req = v201::TransactionEventRequest {
            event_type: v201::TransactionEventType::Ended,
            timestamp: timestamp.clone(),
            trigger_reason: v201::TriggerReason::StopAuthorized,
            seq_no,
            transaction_info: v201::Transaction {
                transaction_id: transaction_id.clone(),
                charging_state: Some(v201::ChargingState::Idle),
                time_spent_charging: None,
                stopped_reason: Some(reason.to_owned()),
                remote_start_id: None,
            },
            offline: None,
            number_of_phases_used: None,
            cable_max_current: None,
            reservation_id: None,
            evse: None,
            id_token: None,
            meter_value: Some(vec![v201::MeterValue {
                timestamp,
                sampled_value: vec![v201::SampledValue::with_context(
                    meter_value as f64,
                    "Transaction.End",
                    "Energy.Active.Import.Register",
                    "Wh",
                )],
            }]),
        };
        match self.send_call(v201::ACTION_TRANSACTION_EVENT, &req).await? {
            CallResponse::Result(_) => {
                info!(%transaction_id, meter_stop = meter_value, reason, "TransactionEvent(Ended) acknowledged");
            }
            CallResponse::Error { code, description } => {
                warn!(%code, %description, "TransactionEvent(Ended) rejected");
            }
        }
        Ok(())
    }

    async fn send_meter_values(&self, sample: &MeterSample) -> Result<(), ChargerError> {
        let transaction_id = match &sample.transaction_id {
            Some(TransactionId::Seq(id)) => Some(*id),
            _ => None,
        };
        let req = v16::MeterValuesRequest {
            connector_id: self.config().connector_id,
            transaction_id,
            meter_value: vec![v16::MeterValue {
                timestamp: utc_timestamp(),
                sampled_value: vec![
                    v16::SampledValue::periodic(
                        format!("{}", sample.meter_value),
                        "Energy.Active.Import.Register",
                        "Wh",
                    ),
                    v16::SampledValue::periodic(
                        format!("{:.1}", self.config().voltage),
                        "Voltage",
                        "V",
                    ),
                    v16::SampledValue::periodic(
                        format!("{:.1}", sample.current),
                        "Current.Import",
                        "A",
                    ),
                    v16::SampledValue::periodic(
                        format!("{:.1}", sample.power),
                        "Power.Active.Import",
                        "W",
                    ),
                    v16::SampledValue::periodic(format!("{:.1}", sample.soc), "SoC", "Percent"),
                ],
            }],
        };
        match self.send_call(v16::ACTION_METER_VALUES, &req).await? {
            CallResponse::Result(_) => {
                debug!(energy_wh = sample.meter_value, "MeterValues acknowledged");
            }
            CallResponse::Error { code, description } => {
                warn!(%code, %description, "MeterValues rejected");
            }
        }
        Ok(())
    }

    async fn send_transaction_event_updated(&self, sample: &MeterSample) -> Result<(), ChargerError> {
        let Some(TransactionId::Uuid(transaction_id)) = sample.transaction_id.clone() else {
            debug!("no transaction id, skipping TransactionEvent(Updated)");
            return Ok(());
        };
        let timestamp = utc_timestamp();
        let req = v201::TransactionEventRequest {
            event_type: v201::TransactionEventType::Updated,
            timestamp: timestamp.clone(),
            trigger_reason: v201::TriggerReason::MeterValuePeriodic,
            seq_no: sample.seq_no,
            transaction_info: v201::Transaction {
                transaction_id,
                charging_state: Some(v201::ChargingState::Charging),
                time_spent_charging: None,
                stopped_reason: None,
                remote_start_id: None,
            },
            offline: None,
            number_of_phases_used: None,
            cable_max_current: None,
            reservation_id: None,
            evse: None,
            id_token: None,
            meter_value: Some(vec![v201::MeterValue {
                timestamp,
                sampled_value: vec![
                    v201::SampledValue::with_context(
                        sample.meter_value as f64,
                        "Sample.Periodic",
                        "Energy.Active.Import.Register",
                        "Wh",
                    ),
                    v201::SampledValue::with_context(
                        self.config().voltage,
                        "Sample.Periodic",
                        "Voltage",
                        "V",
                    ),
                    v201::SampledValue::with_context(
                        sample.current,
                        "Sample.Periodic",
                        "Current.Import",
                        "A",
                    ),
                    v201::SampledValue::with_context(
                        sample.power,
                        "Sample.Periodic",
                        "Power.Active.Import",
                        "W",
                    ),
                    v201::SampledValue::with_context(
                        sample.soc,
                        "Sample.Periodic",
                        "SoC",
                        "Percent",
                    ),
                ],
            }]),
        };
        match self.send_call(v201::ACTION_TRANSACTION_EVENT, &req).await? {
            CallResponse::Result(_) => {
                debug!(energy_wh = sample.meter_value, "TransactionEvent(Updated) acknowledged");
            }
            CallResponse::Error { code, description } => {
                warn!(%code, %description, "TransactionEvent(Updated) rejected");
            }
        }
        Ok(())
    }

    /// Start the meter ticker. Idempotent: a running ticker is left alone.
    ///
    /// Takes the already-held state lock so the ticker comes up atomically
    /// with the transition that demands it; the spawned task does not touch
    /// the lock until its first tick.
    pub(crate) fn start_meter_ticker_locked(&self, st: &mut ChargerState) {
        if st.meter_stop.is_some() {
            return;
        }
        let (stop_tx, mut stop) = watch::channel(());
        st.meter_stop = Some(stop_tx);

        let charger = self.clone();
        let period = Duration::from_secs(self.config().meter_values_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            info!(interval_s = period.as_secs(), "meter ticker started");
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = charger.meter_values().await {
                            warn!(error = %e, "periodic meter values failed");
                        }
                    }
                }
            }
            info!("meter ticker stopped");
        });
    }

    #[cfg(test)]
    pub(crate) fn meter_ticker_running(&self) -> bool {
        self.state().meter_stop.is_some()
    }
}
