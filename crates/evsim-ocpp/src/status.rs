//! Connector status symbols and their per-dialect domains.

use crate::OcppVersion;
use serde::{Deserialize, Serialize};

/// Connector operational status.
///
/// The union of both dialects' vocabularies. OCPP 1.6 distinguishes the
/// phases of an occupied connector (Preparing, Charging, the suspended
/// states, Finishing); OCPP 2.0.1 collapses them into `Occupied` and moves
/// the charging state into TransactionEvent. [`ConnectorStatus::is_valid_for`]
/// checks a symbol against a dialect's domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEVSE,
    SuspendedEV,
    Finishing,
    Reserved,
    Occupied,
    Unavailable,
    Faulted,
}

impl ConnectorStatus {
    /// The wire spelling of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectorStatus::Available => "Available",
            ConnectorStatus::Preparing => "Preparing",
            ConnectorStatus::Charging => "Charging",
            ConnectorStatus::SuspendedEVSE => "SuspendedEVSE",
            ConnectorStatus::SuspendedEV => "SuspendedEV",
            ConnectorStatus::Finishing => "Finishing",
            ConnectorStatus::Reserved => "Reserved",
            ConnectorStatus::Occupied => "Occupied",
            ConnectorStatus::Unavailable => "Unavailable",
            ConnectorStatus::Faulted => "Faulted",
        }
    }

    /// Whether this symbol belongs to the given dialect's status domain.
    pub fn is_valid_for(self, version: OcppVersion) -> bool {
        match version {
            OcppVersion::V16 => !matches!(self, ConnectorStatus::Occupied),
            OcppVersion::V201 => matches!(
                self,
                ConnectorStatus::Available
                    | ConnectorStatus::Occupied
                    | ConnectorStatus::Reserved
                    | ConnectorStatus::Unavailable
                    | ConnectorStatus::Faulted
            ),
        }
    }

    /// Parse a status symbol, accepting only the given dialect's domain.
    pub fn parse(s: &str, version: OcppVersion) -> Option<Self> {
        let status: ConnectorStatus = s.parse().ok()?;
        status.is_valid_for(version).then_some(status)
    }

    /// The full status domain of a dialect, for help output.
    pub fn domain(version: OcppVersion) -> &'static [ConnectorStatus] {
        match version {
            OcppVersion::V16 => &[
                ConnectorStatus::Available,
                ConnectorStatus::Preparing,
                ConnectorStatus::Charging,
                ConnectorStatus::SuspendedEVSE,
                ConnectorStatus::SuspendedEV,
                ConnectorStatus::Finishing,
                ConnectorStatus::Reserved,
                ConnectorStatus::Unavailable,
                ConnectorStatus::Faulted,
            ],
            OcppVersion::V201 => &[
                ConnectorStatus::Available,
                ConnectorStatus::Occupied,
                ConnectorStatus::Reserved,
                ConnectorStatus::Unavailable,
                ConnectorStatus::Faulted,
            ],
        }
    }

    /// The state a connector enters when a cable is plugged in.
    pub fn occupied_for(version: OcppVersion) -> Self {
        match version {
            OcppVersion::V16 => ConnectorStatus::Preparing,
            OcppVersion::V201 => ConnectorStatus::Occupied,
        }
    }
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectorStatus {
    type Err = String;

    /// Parse any status symbol regardless of dialect; dialect validity is
    /// checked separately via [`ConnectorStatus::is_valid_for`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Available" => Ok(ConnectorStatus::Available),
            "Preparing" => Ok(ConnectorStatus::Preparing),
            "Charging" => Ok(ConnectorStatus::Charging),
            "SuspendedEVSE" => Ok(ConnectorStatus::SuspendedEVSE),
            "SuspendedEV" => Ok(ConnectorStatus::SuspendedEV),
            "Finishing" => Ok(ConnectorStatus::Finishing),
            "Reserved" => Ok(ConnectorStatus::Reserved),
            "Occupied" => Ok(ConnectorStatus::Occupied),
            "Unavailable" => Ok(ConnectorStatus::Unavailable),
            "Faulted" => Ok(ConnectorStatus::Faulted),
            other => Err(format!("unknown status: {other}")),
        }
    }
}
