//! OCPP 1.6-J payload types.
//!
//! Field names and enumerated spellings follow the OCPP 1.6-J specification
//! exactly; optional fields are omitted from the wire when empty.

use crate::status::ConnectorStatus;
use crate::{CommandStatus, RegistrationStatus};
use serde::{Deserialize, Serialize};

pub const ACTION_BOOT_NOTIFICATION: &str = "BootNotification";
pub const ACTION_STATUS_NOTIFICATION: &str = "StatusNotification";
pub const ACTION_START_TRANSACTION: &str = "StartTransaction";
pub const ACTION_STOP_TRANSACTION: &str = "StopTransaction";
pub const ACTION_METER_VALUES: &str = "MeterValues";
pub const ACTION_REMOTE_START_TRANSACTION: &str = "RemoteStartTransaction";
pub const ACTION_REMOTE_STOP_TRANSACTION: &str = "RemoteStopTransaction";
pub const ACTION_SET_CHARGING_PROFILE: &str = "SetChargingProfile";
pub const ACTION_HEARTBEAT: &str = "Heartbeat";
pub const ACTION_DATA_TRANSFER: &str = "DataTransfer";

/// BootNotification request sent once after connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_box_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
}

/// BootNotification response. An `interval` greater than zero overrides the
/// locally configured heartbeat interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub status: RegistrationStatus,
    pub current_time: String,
    pub interval: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub connector_id: u32,
    pub error_code: String,
    pub status: ConnectorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_error_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNotificationResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionRequest {
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: i64,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<i64>,
}

/// StartTransaction response; the Central System assigns the transaction id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionResponse {
    pub id_tag_info: IdTagInfo,
    pub transaction_id: i64,
}

/// Authorization verdict attached to transaction responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTagInfo {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_tag: Option<String>,
    pub meter_stop: i64,
    pub timestamp: String,
    pub transaction_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_data: Option<Vec<MeterValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_tag_info: Option<IdTagInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesRequest {
    pub connector_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i64>,
    pub meter_value: Vec<MeterValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValuesResponse {}

/// One timestamped batch of sampled values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: String,
    pub sampled_value: Vec<SampledValue>,
}

/// A single measurement. Values are strings in 1.6-J.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl SampledValue {
    /// A `Sample.Periodic` measurement with measurand and unit set.
    pub fn periodic(value: String, measurand: &str, unit: &str) -> Self {
        Self {
            value,
            context: Some("Sample.Periodic".to_owned()),
            format: None,
            measurand: Some(measurand.to_owned()),
            phase: None,
            location: None,
            unit: Some(unit.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartTransactionRequest {
    pub id_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging_profile: Option<ChargingProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartTransactionResponse {
    pub status: CommandStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStopTransactionRequest {
    pub transaction_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStopTransactionResponse {
    pub status: CommandStatus,
}

/// Server-imposed charging limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetChargingProfileRequest {
    pub connector_id: u32,
    #[serde(rename = "csChargingProfiles")]
    pub cs_charging_profiles: ChargingProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetChargingProfileResponse {
    pub status: ChargingProfileStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingProfileStatus {
    Accepted,
    Rejected,
    NotSupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingProfile {
    pub charging_profile_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i64>,
    pub stack_level: u32,
    pub charging_profile_purpose: String,
    pub charging_profile_kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrency_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,
    pub charging_schedule: ChargingSchedule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_schedule: Option<String>,
    /// `"A"` or `"W"`; this simulator only applies amp-denominated limits.
    pub charging_rate_unit: String,
    pub charging_schedule_period: Vec<ChargingSchedulePeriod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_charging_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedulePeriod {
    pub start_period: i64,
    pub limit: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_phases: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferRequest {
    pub vendor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_boot_notification_omits_empty_fields() {
        let req = BootNotificationRequest {
            charge_point_vendor: "evsim".into(),
            charge_point_model: "EVSIM-1".into(),
            charge_point_serial_number: Some("CP-42".into()),
            charge_box_serial_number: None,
            firmware_version: Some("1.0.0".into()),
            iccid: None,
            imsi: None,
            meter_type: None,
            meter_serial_number: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "chargePointVendor": "evsim",
                "chargePointModel": "EVSIM-1",
                "chargePointSerialNumber": "CP-42",
                "firmwareVersion": "1.0.0",
            })
        );
    }

    #[test]
    fn test_boot_notification_response_parse() {
        let resp: BootNotificationResponse = serde_json::from_value(json!({
            "status": "Accepted",
            "currentTime": "2024-05-01T10:00:00Z",
            "interval": 60,
        }))
        .unwrap();
        assert_eq!(resp.status, RegistrationStatus::Accepted);
        assert_eq!(resp.interval, 60);
    }

    #[test]
    fn test_status_notification_field_names() {
        let req = StatusNotificationRequest {
            connector_id: 1,
            error_code: "NoError".into(),
            status: ConnectorStatus::Preparing,
            timestamp: Some("2024-05-01T10:00:00Z".into()),
            info: None,
            vendor_id: None,
            vendor_error_code: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "connectorId": 1,
                "errorCode": "NoError",
                "status": "Preparing",
                "timestamp": "2024-05-01T10:00:00Z",
            })
        );
    }

    #[test]
    fn test_start_transaction_round_trip() {
        let req = StartTransactionRequest {
            connector_id: 1,
            id_tag: "tag1".into(),
            meter_start: 0,
            timestamp: "2024-05-01T10:00:00Z".into(),
            reservation_id: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "connectorId": 1,
                "idTag": "tag1",
                "meterStart": 0,
                "timestamp": "2024-05-01T10:00:00Z",
            })
        );
        let back: StartTransactionRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back, req);

        let resp: StartTransactionResponse = serde_json::from_value(json!({
            "idTagInfo": {"status": "Accepted"},
            "transactionId": 42,
        }))
        .unwrap();
        assert_eq!(resp.transaction_id, 42);
        assert_eq!(resp.id_tag_info.status, "Accepted");
    }

    #[test]
    fn test_stop_transaction_serialization() {
        let req = StopTransactionRequest {
            id_tag: Some("tag1".into()),
            meter_stop: 1234,
            timestamp: "2024-05-01T11:00:00Z".into(),
            transaction_id: 42,
            reason: Some("Local".into()),
            transaction_data: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "idTag": "tag1",
                "meterStop": 1234,
                "timestamp": "2024-05-01T11:00:00Z",
                "transactionId": 42,
                "reason": "Local",
            })
        );
    }

    #[test]
    fn test_meter_values_sample_bundle() {
        let req = MeterValuesRequest {
            connector_id: 1,
            transaction_id: Some(42),
            meter_value: vec![MeterValue {
                timestamp: "2024-05-01T10:30:00Z".into(),
                sampled_value: vec![
                    SampledValue::periodic("64".into(), "Energy.Active.Import.Register", "Wh"),
                    SampledValue::periodic("230.0".into(), "Voltage", "V"),
                ],
            }],
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["meterValue"][0]["sampledValue"][0]["value"], "64");
        assert_eq!(
            value["meterValue"][0]["sampledValue"][0]["context"],
            "Sample.Periodic"
        );
        assert_eq!(
            value["meterValue"][0]["sampledValue"][0]["measurand"],
            "Energy.Active.Import.Register"
        );
        assert_eq!(value["meterValue"][0]["sampledValue"][0]["unit"], "Wh");
        // optional fields stay off the wire
        assert!(value["meterValue"][0]["sampledValue"][0]
            .as_object()
            .unwrap()
            .get("phase")
            .is_none());
    }

    #[test]
    fn test_set_charging_profile_parse() {
        let req: SetChargingProfileRequest = serde_json::from_value(json!({
            "connectorId": 1,
            "csChargingProfiles": {
                "chargingProfileId": 7,
                "stackLevel": 0,
                "chargingProfilePurpose": "TxProfile",
                "chargingProfileKind": "Absolute",
                "chargingSchedule": {
                    "chargingRateUnit": "A",
                    "chargingSchedulePeriod": [{"startPeriod": 0, "limit": 16.0}],
                },
            },
        }))
        .unwrap();
        let schedule = &req.cs_charging_profiles.charging_schedule;
        assert_eq!(schedule.charging_rate_unit, "A");
        assert_eq!(schedule.charging_schedule_period[0].limit, 16.0);
    }

    #[test]
    fn test_remote_start_stop_parse() {
        let start: RemoteStartTransactionRequest =
            serde_json::from_value(json!({"idTag": "rfid-7"})).unwrap();
        assert_eq!(start.id_tag, "rfid-7");
        assert!(start.connector_id.is_none());

        let stop: RemoteStopTransactionRequest =
            serde_json::from_value(json!({"transactionId": 99})).unwrap();
        assert_eq!(stop.transaction_id, 99);

        assert_eq!(
            serde_json::to_value(RemoteStopTransactionResponse {
                status: CommandStatus::Rejected,
            })
            .unwrap(),
            json!({"status": "Rejected"})
        );
    }

    #[test]
    fn test_data_transfer_serialization() {
        let req = DataTransferRequest {
            vendor_id: "LicensePlate".into(),
            message_id: Some("EVLicensePlate".into()),
            data: Some(r#"{"licensePlate":"AB-123","connectorId":1}"#.into()),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["vendorId"], "LicensePlate");
        assert_eq!(value["messageId"], "EVLicensePlate");
    }

    #[test]
    fn test_empty_payloads() {
        assert_eq!(
            serde_json::to_value(HeartbeatRequest {}).unwrap(),
            json!({})
        );
        assert_eq!(
            serde_json::to_value(StatusNotificationResponse {}).unwrap(),
            json!({})
        );
    }
}
