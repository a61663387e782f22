//! Outbound RPC dispatch.
//!
//! Every outbound Call is correlated with its response through a table of
//! single-capacity slots keyed by unique id. The table has its own lock so
//! the charger state lock is never held across network I/O.

use crate::charger::Charger;
use crate::error::ChargerError;
use dashmap::DashMap;
use evsim_ocpp::frame;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// How long a Call waits for its CallResult or CallError.
pub(crate) const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolution of an outbound Call.
#[derive(Debug)]
pub(crate) enum CallResponse {
    /// CallResult payload.
    Result(Value),
    /// CallError; the Call completed but the server rejected it.
    Error { code: String, description: String },
}

/// Table of outstanding outbound Calls.
pub(crate) struct PendingCalls {
    calls: DashMap<String, oneshot::Sender<CallResponse>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Register a response slot for a fresh unique id.
    pub(crate) fn register(&self, unique_id: &str) -> oneshot::Receiver<CallResponse> {
        let (tx, rx) = oneshot::channel();
        self.calls.insert(unique_id.to_owned(), tx);
        rx
    }

    /// Fulfil a slot with a CallResult payload. Returns false when no call
    /// is outstanding under this id (late or unsolicited responses).
    pub(crate) fn complete_result(&self, unique_id: &str, payload: Value) -> bool {
        self.complete(unique_id, CallResponse::Result(payload))
    }

    /// Fulfil a slot with a CallError.
    pub(crate) fn complete_error(&self, unique_id: &str, code: String, description: String) -> bool {
        self.complete(unique_id, CallResponse::Error { code, description })
    }

    fn complete(&self, unique_id: &str, response: CallResponse) -> bool {
        match self.calls.remove(unique_id) {
            Some((_, slot)) => slot.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop a slot, e.g. after the waiter timed out.
    pub(crate) fn cancel(&self, unique_id: &str) {
        self.calls.remove(unique_id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl Charger {
    /// Send a Call and wait for the matching response.
    ///
    /// Generates a fresh unique id, registers the response slot, writes the
    /// frame and suspends until the receive loop fulfils the slot or the
    /// deadline elapses. On timeout the slot is removed so a late response
    /// is dropped instead of delivered.
    pub(crate) async fn send_call<T: Serialize>(
        &self,
        action: &str,
        payload: &T,
    ) -> Result<CallResponse, ChargerError> {
        let unique_id = Uuid::new_v4().to_string();
        let text = frame::marshal_call(&unique_id, action, payload)?;
        let slot = self.pending().register(&unique_id);

        debug!(frame = %text, "sending");
        if let Err(e) = self.send_text(&text).await {
            self.pending().cancel(&unique_id);
            return Err(e);
        }

        self.await_response(&unique_id, slot, CALL_TIMEOUT).await
    }

    pub(crate) async fn await_response(
        &self,
        unique_id: &str,
        slot: oneshot::Receiver<CallResponse>,
        deadline: Duration,
    ) -> Result<CallResponse, ChargerError> {
        match tokio::time::timeout(deadline, slot).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) | Err(_) => {
                self.pending().cancel(unique_id);
                Err(ChargerError::RpcTimeout)
            }
        }
    }

    /// Send a CallResult in reply to a server-initiated Call.
    pub(crate) async fn send_call_result<T: Serialize>(
        &self,
        unique_id: &str,
        payload: &T,
    ) -> Result<(), ChargerError> {
        let text = frame::marshal_call_result(unique_id, payload)?;
        debug!(frame = %text, "sending");
        self.send_text(&text).await
    }
}
