//! Shared frame model and JSON codec for the gateway WS transport.
//!
//! This crate owns the wire representation spoken with the gateway. Every
//! socket message is one JSON object tagged by `type`:
//!
//! ```text
//! {"type":"req","id":"..","method":"..","params":..}
//! {"type":"res","id":"..","ok":true,"payload":{..}}
//! {"type":"res","id":"..","ok":false,"error":{"code":"..","message":".."}}
//! {"type":"event","event":"dot.topic","payload":{..}}
//! ```
//!
//! DESIGN
//! ======
//! Validation is additive: required fields are checked and typed, every other
//! top-level field is kept verbatim in `extra` so frames from a newer gateway
//! survive a decode/encode pass untouched.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

// =============================================================================
// TYPE TAGS
// =============================================================================

/// `type` tag of a request frame.
pub const TYPE_REQUEST: &str = "req";

/// `type` tag of a response frame.
pub const TYPE_RESPONSE: &str = "res";

/// `type` tag of an event frame.
pub const TYPE_EVENT: &str = "event";

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by [`parse_frame`] and [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The raw text was not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON value does not have the shape of a frame.
    #[error("invalid frame at `{path}`: {reason}")]
    InvalidFrame { path: String, reason: String },
}

impl FrameError {
    fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFrame { path: path.into(), reason: reason.into() }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// A single message on the gateway wire protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Request(RequestFrame),
    Response(ResponseFrame),
    Event(EventFrame),
}

/// Client → gateway call.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestFrame {
    /// Opaque correlation id echoed back by the matching response.
    pub id: String,
    /// Gateway method name, e.g. `"health"` or `"chat.send"`.
    pub method: String,
    /// Arbitrary parameters; `null` when the sender omitted them.
    pub params: Value,
    /// Unrecognized top-level fields, preserved as received.
    pub extra: Map<String, Value>,
}

/// Gateway → client answer to a [`RequestFrame`].
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseFrame {
    /// Id of the request this answers.
    pub id: String,
    /// Payload on success, error object on failure.
    pub outcome: ResponseOutcome,
    /// Unrecognized top-level fields, preserved as received.
    pub extra: Map<String, Value>,
}

/// Success or failure of a response, discriminated on the wire by `ok`.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseOutcome {
    /// `ok: true`. A missing `payload` decodes as `null`.
    Ok(Value),
    /// `ok: false`.
    Err(ErrorShape),
}

/// The `error` object of a failed response.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorShape {
    /// Grepable error code. Numeric codes are rendered as decimal strings.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Any other fields of the error object, preserved as received.
    pub extra: Map<String, Value>,
}

/// Gateway → client push notification.
#[derive(Clone, Debug, PartialEq)]
pub struct EventFrame {
    /// Dot-delimited topic, e.g. `"agent.status"`.
    pub event: String,
    /// Event body, required on the wire and possibly `null`.
    pub payload: Value,
    /// Unrecognized top-level fields, preserved as received.
    pub extra: Map<String, Value>,
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl RequestFrame {
    #[must_use]
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self { id: id.into(), method: method.into(), params, extra: Map::new() }
    }
}

impl ResponseFrame {
    /// Create a success response.
    #[must_use]
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Self { id: id.into(), outcome: ResponseOutcome::Ok(payload), extra: Map::new() }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: ResponseOutcome::Err(ErrorShape { code: code.into(), message: message.into(), extra: Map::new() }),
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Ok(_))
    }
}

impl EventFrame {
    #[must_use]
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self { event: event.into(), payload, extra: Map::new() }
    }
}

impl Frame {
    /// Wire `type` tag for this frame.
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Request(_) => TYPE_REQUEST,
            Self::Response(_) => TYPE_RESPONSE,
            Self::Event(_) => TYPE_EVENT,
        }
    }

    /// Build the JSON object for this frame. Known fields win over any
    /// same-named entry in `extra`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut out = match self {
            Self::Request(f) => f.extra.clone(),
            Self::Response(f) => f.extra.clone(),
            Self::Event(f) => f.extra.clone(),
        };
        out.insert("type".into(), Value::String(self.type_tag().into()));

        match self {
            Self::Request(f) => {
                out.insert("id".into(), Value::String(f.id.clone()));
                out.insert("method".into(), Value::String(f.method.clone()));
                out.insert("params".into(), f.params.clone());
            }
            Self::Response(f) => {
                out.insert("id".into(), Value::String(f.id.clone()));
                match &f.outcome {
                    ResponseOutcome::Ok(payload) => {
                        out.insert("ok".into(), Value::Bool(true));
                        if !payload.is_null() {
                            out.insert("payload".into(), payload.clone());
                        }
                    }
                    ResponseOutcome::Err(err) => {
                        out.insert("ok".into(), Value::Bool(false));
                        let mut error = err.extra.clone();
                        error.insert("code".into(), Value::String(err.code.clone()));
                        error.insert("message".into(), Value::String(err.message.clone()));
                        out.insert("error".into(), Value::Object(error));
                    }
                }
            }
            Self::Event(f) => {
                out.insert("event".into(), Value::String(f.event.clone()));
                out.insert("payload".into(), f.payload.clone());
            }
        }

        Value::Object(out)
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl From<RequestFrame> for Frame {
    fn from(frame: RequestFrame) -> Self {
        Self::Request(frame)
    }
}

impl From<ResponseFrame> for Frame {
    fn from(frame: ResponseFrame) -> Self {
        Self::Response(frame)
    }
}

impl From<EventFrame> for Frame {
    fn from(frame: EventFrame) -> Self {
        Self::Event(frame)
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode a frame as JSON text for a WS text message.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    frame.to_value().to_string()
}

/// Decode a WS text message into a frame.
///
/// # Errors
///
/// Returns [`FrameError::Json`] for text that is not JSON and
/// [`FrameError::InvalidFrame`] for JSON that is not a frame.
pub fn decode_frame(text: &str) -> Result<Frame, FrameError> {
    let raw: Value = serde_json::from_str(text)?;
    parse_frame(&raw)
}

/// Validate an arbitrary JSON value as a frame.
///
/// # Errors
///
/// Returns [`FrameError::InvalidFrame`] naming the first offending field when
/// the value is not an object, the `type` tag is missing or unknown, or a
/// field required by that type is missing or has the wrong JSON type.
pub fn parse_frame(raw: &Value) -> Result<Frame, FrameError> {
    let Value::Object(obj) = raw else {
        return Err(FrameError::invalid("$", format!("expected object, got {}", json_kind(raw))));
    };

    let tag = match obj.get("type") {
        Some(Value::String(tag)) => tag.as_str(),
        Some(other) => return Err(FrameError::invalid("type", format!("expected string, got {}", json_kind(other)))),
        None => return Err(FrameError::invalid("type", "missing")),
    };

    match tag {
        TYPE_REQUEST => parse_request(obj).map(Frame::Request),
        TYPE_RESPONSE => parse_response(obj).map(Frame::Response),
        TYPE_EVENT => parse_event(obj).map(Frame::Event),
        other => Err(FrameError::invalid("type", format!("unknown frame type {other:?}"))),
    }
}

fn parse_request(obj: &Map<String, Value>) -> Result<RequestFrame, FrameError> {
    let id = required_str(obj, "id", "id")?;
    let method = required_str(obj, "method", "method")?;
    let params = obj.get("params").cloned().unwrap_or(Value::Null);

    Ok(RequestFrame { id, method, params, extra: extra_fields(obj, &["type", "id", "method", "params"]) })
}

fn parse_response(obj: &Map<String, Value>) -> Result<ResponseFrame, FrameError> {
    let id = required_str(obj, "id", "id")?;
    let ok = match obj.get("ok") {
        Some(Value::Bool(ok)) => *ok,
        Some(other) => return Err(FrameError::invalid("ok", format!("expected bool, got {}", json_kind(other)))),
        None => return Err(FrameError::invalid("ok", "missing")),
    };

    // Only the field belonging to the `ok` branch is consumed; the other one,
    // if a gateway sends it anyway, rides along in `extra`.
    if ok {
        let payload = obj.get("payload").cloned().unwrap_or(Value::Null);
        Ok(ResponseFrame {
            id,
            outcome: ResponseOutcome::Ok(payload),
            extra: extra_fields(obj, &["type", "id", "ok", "payload"]),
        })
    } else {
        let error = match obj.get("error") {
            Some(Value::Object(error)) => parse_error_shape(error)?,
            Some(other) => {
                return Err(FrameError::invalid("error", format!("expected object, got {}", json_kind(other))));
            }
            None => return Err(FrameError::invalid("error", "required when ok is false")),
        };
        Ok(ResponseFrame {
            id,
            outcome: ResponseOutcome::Err(error),
            extra: extra_fields(obj, &["type", "id", "ok", "error"]),
        })
    }
}

fn parse_error_shape(obj: &Map<String, Value>) -> Result<ErrorShape, FrameError> {
    let code = match obj.get("code") {
        Some(Value::String(code)) => code.clone(),
        Some(Value::Number(code)) => code.to_string(),
        Some(other) => {
            return Err(FrameError::invalid(
                "error.code",
                format!("expected string or number, got {}", json_kind(other)),
            ));
        }
        None => return Err(FrameError::invalid("error.code", "missing")),
    };
    let message = required_str(obj, "message", "error.message")?;

    Ok(ErrorShape { code, message, extra: extra_fields(obj, &["code", "message"]) })
}

fn parse_event(obj: &Map<String, Value>) -> Result<EventFrame, FrameError> {
    let event = required_str(obj, "event", "event")?;
    let Some(payload) = obj.get("payload") else {
        return Err(FrameError::invalid("payload", "missing"));
    };

    Ok(EventFrame { event, payload: payload.clone(), extra: extra_fields(obj, &["type", "event", "payload"]) })
}

// =============================================================================
// HELPERS
// =============================================================================

fn required_str(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, FrameError> {
    match obj.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(FrameError::invalid(path, format!("expected string, got {}", json_kind(other)))),
        None => Err(FrameError::invalid(path, "missing")),
    }
}

fn extra_fields(obj: &Map<String, Value>, known: &[&str]) -> Map<String, Value> {
    obj.iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
