//! # evsim-charger
//!
//! The simulator core: an OCPP charge point state engine with its WebSocket
//! transport, outbound RPC dispatcher, background task supervision and
//! inbound action handlers. The operator-facing surface lives on
//! [`Charger`]; the CLI binary is a thin read-eval loop over it.

pub mod charger;
pub mod config;
pub mod error;
mod handlers;
mod rpc;
mod session;
mod transport;
mod uplink;

pub use charger::{Charger, ChargerSnapshot, TransactionId};
pub use config::{Config, TlsConfig};
pub use error::ChargerError;
