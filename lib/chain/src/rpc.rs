//! JSON-RPC framing for the pubsub websocket.

use crate::error::ChainError;
use serde_json::{Value as JsonValue, json};

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Successful reply to a request.
    Response { id: u64, result: JsonValue },
    /// Error reply to a request.
    Error { id: u64, code: i64, message: String },
    /// Subscription notification.
    Notification {
        subscription: u64,
        slot: u64,
        value: JsonValue,
    },
}

/// Encodes a request frame.
#[must_use]
pub fn request_frame(id: u64, method: &str, params: &JsonValue) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string()
}

/// Decodes an inbound text frame.
///
/// # Errors
///
/// Returns an error if the frame is not JSON-RPC or lacks required fields.
pub fn parse_frame(text: &str) -> Result<Incoming, ChainError> {
    let frame: JsonValue = serde_json::from_str(text).map_err(|e| ChainError::Protocol {
        reason: format!("invalid json: {e}"),
    })?;

    if let Some(method) = frame.get("method").and_then(JsonValue::as_str) {
        if !method.ends_with("Notification") {
            return Err(ChainError::Protocol {
                reason: format!("unexpected method {method}"),
            });
        }
        let params = &frame["params"];
        let subscription = params["subscription"]
            .as_u64()
            .ok_or_else(|| missing("params.subscription"))?;
        let slot = params["result"]["context"]["slot"]
            .as_u64()
            .ok_or_else(|| missing("params.result.context.slot"))?;
        return Ok(Incoming::Notification {
            subscription,
            slot,
            value: params["result"]["value"].clone(),
        });
    }

    let id = frame
        .get("id")
        .and_then(JsonValue::as_u64)
        .ok_or_else(|| missing("id"))?;
    if let Some(error) = frame.get("error") {
        return Ok(Incoming::Error {
            id,
            code: error["code"].as_i64().unwrap_or_default(),
            message: error["message"].as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(Incoming::Response {
        id,
        result: frame.get("result").cloned().unwrap_or(JsonValue::Null),
    })
}

fn missing(field: &str) -> ChainError {
    ChainError::Protocol {
        reason: format!("missing {field}"),
    }
}
