//! Wire shape of a stratum frame and its newline-delimited JSON encoding.
//!
//! One struct covers requests, notifications and responses. Which one a frame
//! is follows from the fields present:
//!
//! | kind         | `id`   | `method` | payload              |
//! |--------------|--------|----------|----------------------|
//! | request      | `!= 0` | set      | `params`             |
//! | notification | `0`    | set      | `params`             |
//! | response     | `!= 0` | absent   | `result` or `error`  |
//!
//! An explicit `"id": 0`, `"id": null` and a missing id all mean "no id".
use crate::error::StratumErrors;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Byte terminating every frame. Never embedded in an encoded payload since
/// JSON strings escape it.
pub const FRAME_DELIMITER: u8 = b'\n';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
    Response,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "id_is_absent")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Vec<Value>>,
}

fn id_is_absent(id: &Option<u64>) -> bool {
    id.map_or(true, |id| id == 0)
}

/// Error payload of a failed response, sent as `[code, message, null]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyError {
    pub code: i64,
    pub message: String,
}

impl ReplyError {
    pub const UNAUTHORIZED_WORKER: i64 = 24;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        ReplyError {
            code,
            message: message.into(),
        }
    }

    pub fn to_wire(&self) -> Vec<Value> {
        vec![json!(self.code), json!(self.message), Value::Null]
    }
}

impl Message {
    pub fn request(id: u64, method: &str, params: Vec<Value>) -> Self {
        Message {
            id: Some(id),
            method: Some(method.to_string()),
            params: Some(params),
            ..Default::default()
        }
    }

    pub fn notification(method: &str, params: Vec<Value>) -> Self {
        Message {
            method: Some(method.to_string()),
            params: Some(params),
            ..Default::default()
        }
    }

    pub fn response(id: u64, result: Value) -> Self {
        Message {
            id: Some(id),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn error_response(id: u64, error: &ReplyError) -> Self {
        Message {
            id: Some(id),
            error: Some(error.to_wire()),
            ..Default::default()
        }
    }

    /// Correlation id, `0` when the frame carries none.
    pub fn id(&self) -> u64 {
        self.id.unwrap_or(0)
    }

    pub fn kind(&self) -> MessageKind {
        match (&self.method, self.id()) {
            (Some(_), 0) => MessageKind::Notification,
            (Some(_), _) => MessageKind::Request,
            (None, _) => MessageKind::Response,
        }
    }

    pub fn params(&self) -> &[Value] {
        self.params.as_deref().unwrap_or(&[])
    }

    /// Human readable part of an error response. Stratum peers send
    /// `[code, message, traceback]`; anything shorter yields an empty string.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|error| {
            error
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
    }

    /// Parses a single frame. Trailing delimiter and whitespace are tolerated.
    pub fn decode(frame: &[u8]) -> Result<Message, StratumErrors> {
        let value: Value =
            serde_json::from_slice(frame).map_err(|error| StratumErrors::MalformedMessage {
                error: error.to_string(),
            })?;
        if !value.is_object() {
            return Err(StratumErrors::MalformedMessage {
                error: format!("expected a JSON object, found {}", value),
            });
        }
        let mut message: Message =
            serde_json::from_value(value).map_err(|error| StratumErrors::MalformedMessage {
                error: error.to_string(),
            })?;
        if message.id == Some(0) {
            message.id = None;
        }
        if message.method.as_deref() == Some("") {
            message.method = None;
        }
        if message.method.is_none() && message.id.is_none() {
            return Err(StratumErrors::MalformedMessage {
                error: "frame carries neither a method nor an id".to_string(),
            });
        }
        Ok(message)
    }

    /// Serializes the message followed by [`FRAME_DELIMITER`].
    pub fn encode(&self) -> Result<Vec<u8>, StratumErrors> {
        let mut frame =
            serde_json::to_vec(self).map_err(|error| StratumErrors::EncodeFailed { error })?;
        frame.push(FRAME_DELIMITER);
        Ok(frame)
    }
}
