//! Wire envelope for the Electrum JSON dialect.
//!
//! Requests are `{"id": <uint>, "method": <string>, "params": [...]}`.
//! Responses carry `id` plus exactly one of `result` / `error`, where
//! `error` is a plain string (this dialect predates JSON-RPC 2.0 error
//! objects). Notifications carry `method` and `params` but no `id`.

use serde_json::Value;

#[derive(serde::Serialize)]
pub(crate) struct Request<'a> {
    pub(crate) id: u64,
    pub(crate) method: &'a str,
    pub(crate) params: &'a [Value],
}

#[derive(serde::Deserialize)]
struct Envelope {
    id: Option<u64>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<String>,
}

/// A decoded inbound frame, classified for routing.
#[derive(Debug)]
pub(crate) enum Routed {
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: u64,
        /// The decoded result, or the server's error string.
        outcome: Result<Value, String>,
    },
}

/// A frame that did not decode. If an `id` could still be recovered, the
/// pending request under that id is failed fast instead of left hanging.
#[derive(Debug)]
pub(crate) struct DecodeFailure {
    pub(crate) id: Option<u64>,
    pub(crate) reason: String,
}

pub(crate) fn decode(raw: &str) -> Result<Routed, DecodeFailure> {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            return Err(DecodeFailure {
                id: recover_id(raw),
                reason: err.to_string(),
            })
        }
    };

    if let Some(method) = envelope.method {
        return Ok(Routed::Notification {
            method,
            params: envelope.params.unwrap_or(Value::Null),
        });
    }

    match envelope.id {
        Some(id) => {
            let outcome = match envelope.error {
                Some(message) => Err(message),
                None => Ok(envelope.result.unwrap_or(Value::Null)),
            };
            Ok(Routed::Response { id, outcome })
        }
        None => Err(DecodeFailure {
            id: None,
            reason: "envelope carries neither method nor id".to_owned(),
        }),
    }
}

/// Best-effort id extraction from a frame that failed envelope decoding.
fn recover_id(raw: &str) -> Option<u64> {
    serde_json::from_str::<Value>(raw).ok()?.get("id")?.as_u64()
}
