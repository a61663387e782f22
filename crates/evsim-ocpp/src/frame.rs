//! OCPP message framing.
//!
//! Every OCPP message, in both dialects, is a JSON array whose first element
//! identifies the kind: `[2, id, action, payload]` for a Call,
//! `[3, id, payload]` for a CallResult, `[4, id, code, description, details]`
//! for a CallError. Payloads stay as raw [`serde_json::Value`]s here; the
//! dialect modules define their concrete shapes.

use crate::WireError;
use serde::Serialize;
use serde_json::Value;

/// Message type id for a Call (request).
pub const MESSAGE_TYPE_CALL: u64 = 2;
/// Message type id for a CallResult (response).
pub const MESSAGE_TYPE_CALL_RESULT: u64 = 3;
/// Message type id for a CallError (error response).
pub const MESSAGE_TYPE_CALL_ERROR: u64 = 4;

/// A parsed OCPP frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        code: String,
        description: String,
        details: Value,
    },
}

impl Frame {
    /// The unique id correlating this frame with its peer.
    pub fn unique_id(&self) -> &str {
        match self {
            Frame::Call { unique_id, .. }
            | Frame::CallResult { unique_id, .. }
            | Frame::CallError { unique_id, .. } => unique_id,
        }
    }
}

/// Encode a Call frame.
pub fn marshal_call<T: Serialize>(
    unique_id: &str,
    action: &str,
    payload: &T,
) -> Result<String, WireError> {
    let payload = serde_json::to_value(payload)?;
    let msg = Value::Array(vec![
        Value::from(MESSAGE_TYPE_CALL),
        Value::from(unique_id),
        Value::from(action),
        payload,
    ]);
    Ok(msg.to_string())
}

/// Encode a CallResult frame.
pub fn marshal_call_result<T: Serialize>(
    unique_id: &str,
    payload: &T,
) -> Result<String, WireError> {
    let payload = serde_json::to_value(payload)?;
    let msg = Value::Array(vec![
        Value::from(MESSAGE_TYPE_CALL_RESULT),
        Value::from(unique_id),
        payload,
    ]);
    Ok(msg.to_string())
}

/// Encode a CallError frame.
pub fn marshal_call_error(
    unique_id: &str,
    code: &str,
    description: &str,
    details: Value,
) -> Result<String, WireError> {
    let msg = Value::Array(vec![
        Value::from(MESSAGE_TYPE_CALL_ERROR),
        Value::from(unique_id),
        Value::from(code),
        Value::from(description),
        details,
    ]);
    Ok(msg.to_string())
}

/// Decode a frame received from the wire.
///
/// Fails with [`WireError::MalformedFrame`] when the text is not a JSON array
/// of at least three elements, when the message type is not 2, 3 or 4, when a
/// Call carries fewer than four elements, or when a required positional field
/// has the wrong JSON type.
pub fn parse(data: &str) -> Result<Frame, WireError> {
    let raw: Value = serde_json::from_str(data)
        .map_err(|e| WireError::MalformedFrame(format!("invalid json: {e}")))?;
    let elements = raw
        .as_array()
        .ok_or_else(|| WireError::MalformedFrame("not a json array".into()))?;
    if elements.len() < 3 {
        return Err(WireError::MalformedFrame(format!(
            "expected at least 3 elements, got {}",
            elements.len()
        )));
    }

    let message_type = elements[0]
        .as_u64()
        .ok_or_else(|| WireError::MalformedFrame("message type is not an integer".into()))?;
    let unique_id = elements[1]
        .as_str()
        .ok_or_else(|| WireError::MalformedFrame("unique id is not a string".into()))?
        .to_owned();

    match message_type {
        MESSAGE_TYPE_CALL => {
            if elements.len() < 4 {
                return Err(WireError::MalformedFrame(
                    "Call frame requires 4 elements".into(),
                ));
            }
            let action = elements[2]
                .as_str()
                .ok_or_else(|| WireError::MalformedFrame("action is not a string".into()))?
                .to_owned();
            Ok(Frame::Call {
                unique_id,
                action,
                payload: elements[3].clone(),
            })
        }
        MESSAGE_TYPE_CALL_RESULT => Ok(Frame::CallResult {
            unique_id,
            payload: elements[2].clone(),
        }),
        MESSAGE_TYPE_CALL_ERROR => {
            let code = elements[2]
                .as_str()
                .ok_or_else(|| WireError::MalformedFrame("error code is not a string".into()))?
                .to_owned();
            let description = match elements.get(3) {
                None => String::new(),
                Some(v) => v
                    .as_str()
                    .ok_or_else(|| {
                        WireError::MalformedFrame("error description is not a string".into())
                    })?
                    .to_owned(),
            };
            let details = elements.get(4).cloned().unwrap_or(Value::Null);
            Ok(Frame::CallError {
                unique_id,
                code,
                description,
                details,
            })
        }
        other => Err(WireError::MalformedFrame(format!(
            "unknown message type: {other}"
        ))),
    }
}
