//! # evsim-ocpp
//!
//! Message framing and payload types for the two OCPP dialects spoken by the
//! simulator: OCPP 1.6-J and OCPP 2.0.1. Both dialects share the same outer
//! frame format (a position-sensitive JSON array); the per-dialect payload
//! shapes live in [`v16`] and [`v201`].

pub mod frame;
pub mod status;
pub mod v16;
pub mod v201;

pub use frame::Frame;
pub use status::ConnectorStatus;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the wire layer.
#[derive(Debug, Error)]
pub enum WireError {
    /// The outer frame could not be decoded as an OCPP message.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A payload failed to serialize or deserialize.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// OCPP protocol dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcppVersion {
    /// OCPP 1.6-J
    #[serde(rename = "1.6")]
    V16,
    /// OCPP 2.0.1
    #[serde(rename = "2.0.1")]
    V201,
}

impl OcppVersion {
    /// WebSocket sub-protocol name negotiated during the handshake.
    pub fn subprotocol(self) -> &'static str {
        match self {
            OcppVersion::V16 => "ocpp1.6",
            OcppVersion::V201 => "ocpp2.0.1",
        }
    }
}

impl std::fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcppVersion::V16 => write!(f, "1.6"),
            OcppVersion::V201 => write!(f, "2.0.1"),
        }
    }
}

/// Registration result in a BootNotification response, identical in both
/// dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

/// Accept/reject result for remote commands, identical in both dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Accepted,
    Rejected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_display_and_subprotocol() {
        assert_eq!(OcppVersion::V16.to_string(), "1.6");
        assert_eq!(OcppVersion::V201.to_string(), "2.0.1");
        assert_eq!(OcppVersion::V16.subprotocol(), "ocpp1.6");
        assert_eq!(OcppVersion::V201.subprotocol(), "ocpp2.0.1");
    }

    #[test]
    fn test_version_serialization() {
        assert_eq!(serde_json::to_string(&OcppVersion::V16).unwrap(), "\"1.6\"");
        assert_eq!(
            serde_json::to_string(&OcppVersion::V201).unwrap(),
            "\"2.0.1\""
        );
        let parsed: OcppVersion = serde_json::from_str("\"1.6\"").unwrap();
        assert_eq!(parsed, OcppVersion::V16);
    }

    #[test]
    fn test_registration_status_spelling() {
        assert_eq!(
            serde_json::to_string(&RegistrationStatus::Accepted).unwrap(),
            "\"Accepted\""
        );
        assert_eq!(
            serde_json::to_string(&CommandStatus::Rejected).unwrap(),
            "\"Rejected\""
        );
    }
}
