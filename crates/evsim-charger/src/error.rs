//! Error types for charger operations.

use evsim_ocpp::{OcppVersion, WireError};
use thiserror::Error;

/// Errors raised by the charger core.
///
/// Operator-facing operations surface these to the CLI; errors on the
/// server-driven path are logged and swallowed by the handlers so the
/// Central System always receives its CallResult.
#[derive(Debug, Error)]
pub enum ChargerError {
    /// Configuration file missing required keys or failing validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// TLS certificate or key material could not be read or parsed.
    #[error("tls material: {0}")]
    TlsMaterial(String),

    /// Dial, handshake, send or read failure on the WebSocket transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation requires a live connection.
    #[error("not connected to server")]
    NotConnected,

    /// `connect` while a connection is already up.
    #[error("already connected")]
    AlreadyConnected,

    /// Operator action incompatible with the current connector state.
    #[error("cannot {operation}: {state}")]
    WrongStatus {
        operation: &'static str,
        state: String,
    },

    /// Status symbol outside the dialect's domain.
    #[error("invalid status for OCPP {version}: {status}")]
    InvalidStatus {
        status: String,
        version: OcppVersion,
    },

    /// SOC, current or power outside the configured bounds.
    #[error("{quantity} {value} out of range [{min}, {max}]")]
    OutOfRange {
        quantity: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// An OCPP frame or payload could not be decoded.
    #[error(transparent)]
    MalformedFrame(#[from] WireError),

    /// No response to an outbound Call within the deadline.
    #[error("timed out waiting for response")]
    RpcTimeout,
}

impl From<tokio_tungstenite::tungstenite::Error> for ChargerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChargerError::Transport(err.to_string())
    }
}
