//! Command envelope and response shapes.
//!
//! Inbound:
//! ```text
//! { "action": "<non-empty>", "payload": { ... }, "requestId": "<optional>" }
//! ```
//! Outbound (only when `requestId` was given):
//! ```text
//! { "requestId": "...", "type": "<action>", "ok": true|false, ...fields }
//! ```

use serde_json::{Map, Value};

/// Message placed in the rejection sent for remote mutations in edit mode.
pub const EDIT_MODE_REJECTION: &str = "Remote control is disabled in Edit Mode";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Envelope is not an object")]
    NotAnObject,

    #[error("Envelope has no action")]
    MissingAction,
}

/// A validated inbound command.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub action: String,
    pub payload: Map<String, Value>,
    pub request_id: Option<String>,
}

impl Envelope {
    /// Validate the envelope shape.
    ///
    /// A missing or non-object `payload` becomes `{}`; a non-string
    /// `requestId` is treated as absent.
    pub fn parse(message: &Value) -> Result<Self, EnvelopeError> {
        let object = message.as_object().ok_or(EnvelopeError::NotAnObject)?;
        let action = object
            .get("action")
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty())
            .ok_or(EnvelopeError::MissingAction)?;
        let payload = match object.get("payload") {
            Some(Value::Object(payload)) => payload.clone(),
            _ => Map::new(),
        };
        let request_id = object
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            action: action.to_string(),
            payload,
            request_id,
        })
    }
}

/// Builder for a correlated response.
#[derive(Debug, Clone)]
pub struct Reply {
    fields: Map<String, Value>,
}

impl Reply {
    pub fn new(action: &str, ok: bool) -> Self {
        let mut fields = Map::new();
        fields.insert("type".into(), Value::String(action.to_string()));
        fields.insert("ok".into(), Value::Bool(ok));
        Self { fields }
    }

    pub fn ok(action: &str) -> Self {
        Self::new(action, true)
    }

    pub fn failed(action: &str, error: impl ToString) -> Self {
        Self::new(action, false).with("error", Value::String(error.to_string()))
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Final wire form, with the request id echoed.
    pub fn into_response(mut self, request_id: &str) -> Value {
        self.fields
            .insert("requestId".into(), Value::String(request_id.to_string()));
        Value::Object(self.fields)
    }
}

/// The response for a remote mutation refused in edit mode. Carries no
/// `type`.
pub fn edit_mode_rejection(request_id: &str) -> Value {
    serde_json::json!({
        "requestId": request_id,
        "ok": false,
        "error": EDIT_MODE_REJECTION,
    })
}
