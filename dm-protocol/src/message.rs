//! JSON envelopes exchanged on management topics
//!
//! Every request carries an opaque `reqId` that the peer echoes verbatim in
//! its response. Responses add an integer `rc` and optionally a `message`
//! and a `d` data object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::code::ResponseCode;
use crate::error::{ProtocolError, Result};

/// Key under which the request id travels
pub const REQ_ID: &str = "reqId";

// ============================================================================
// Envelopes
// ============================================================================

/// Request received from the server on a command topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "reqId")]
    pub req_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl Request {
    /// Decode a server request; a missing `reqId` is a protocol error
    pub fn parse(payload: &[u8]) -> Result<Request> {
        let value: Value = serde_json::from_slice(payload)?;
        if value.get(REQ_ID).and_then(Value::as_str).is_none() {
            return Err(ProtocolError::MissingReqId);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Response to a request, in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "reqId")]
    pub req_id: String,

    pub rc: ResponseCode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl Response {
    pub fn new(req_id: impl Into<String>, rc: ResponseCode) -> Self {
        Self {
            req_id: req_id.into(),
            rc,
            message: None,
            d: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, d: Value) -> Self {
        self.d = Some(d);
        self
    }

    /// Decode a response; a missing `reqId` is a protocol error
    pub fn parse(payload: &[u8]) -> Result<Response> {
        let value: Value = serde_json::from_slice(payload)?;
        if value.get(REQ_ID).and_then(Value::as_str).is_none() {
            return Err(ProtocolError::MissingReqId);
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Insert a request id into an outbound payload object
pub fn with_req_id(payload: Value, req_id: &str) -> Result<Value> {
    match payload {
        Value::Object(mut map) => {
            map.insert(REQ_ID.to_string(), Value::String(req_id.to_string()));
            Ok(Value::Object(map))
        }
        Value::Null => {
            let mut map = Map::new();
            map.insert(REQ_ID.to_string(), Value::String(req_id.to_string()));
            Ok(Value::Object(map))
        }
        other => Err(ProtocolError::InvalidValue {
            kind: "request payload",
            value: other.to_string(),
        }),
    }
}

/// Wrap a data object as `{"d": ...}`
pub fn data(d: Value) -> Value {
    let mut map = Map::new();
    map.insert("d".to_string(), d);
    Value::Object(map)
}

// ============================================================================
// Payload bodies
// ============================================================================

/// Capabilities declared in the manage request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supports {
    pub device_actions: bool,
    pub firmware_actions: bool,
}

/// Body of the manage request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageBody {
    pub supports: Supports,
    pub device_info: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Seconds until the session expires; omitted for sessions that never expire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<u64>,
}

impl ManageBody {
    pub fn to_payload(&self) -> Result<Value> {
        Ok(data(serde_json::to_value(self)?))
    }
}

/// A named field and its value, as used by observe, cancel, notify and update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub field: String,
    #[serde(default)]
    pub value: Value,
}

/// `{"fields": [...]}` body of observe, notify and device-update messages
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldList {
    #[serde(default)]
    pub fields: Vec<FieldValue>,
}

impl FieldList {
    pub fn from_value(d: &Value) -> Result<FieldList> {
        Ok(serde_json::from_value(d.clone())?)
    }

    pub fn to_payload(&self) -> Result<Value> {
        Ok(data(serde_json::to_value(self)?))
    }
}

/// `{"data": [{"field": ...}]}` body of a cancel request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub data: Vec<FieldValue>,
}
