//! Request and response envelopes spoken by the appliance gateway.
//!
//! Every request is a flat JSON document with a single `m2m:rqp` key; every
//! reply carries a single `m2m:rsp` key with a numeric result code (`rsc`)
//! and, on success, a payload under `pc`.
//!
//! ```text
//! {"m2m:rqp":{"op":2,"to":"/[0]/MNAE/1/Sensor/IndoorTemperature/la","fr":"/unitbridge","rqi":"5f3a…"}}
//! {"m2m:rsp":{"rsc":2000,"rqi":"5f3a…","pc":{"m2m:cin":{"con":"21.5", …}}}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Top-level key of a request envelope.
pub const REQUEST_KEY: &str = "m2m:rqp";
/// Top-level key of a response envelope.
pub const RESPONSE_KEY: &str = "m2m:rsp";

/// Result code of a successful retrieve.
pub const CODE_OK: u32 = 2000;
/// Result code of a successful create (property write).
pub const CODE_CREATED: u32 = 2001;

/// Prefix every device-relative path is resolved against.
pub const DEVICE_ROOT: &str = "/[0]/MNAE";
/// Node answering identity queries.
pub const DEVICE_INFO_TARGET: &str = "/[0]/MNCSE-node/deviceInfo";
/// Return address announced in every request.
pub const DEFAULT_ORIGIN: &str = "/unitbridge";

/// Suffix selecting the latest content instance of a resource.
pub const LATEST: &str = "/la";

/// Operation codes used by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create = 1,
    Retrieve = 2,
}

/// Generate a fresh correlation token.
pub fn correlation_token() -> String {
    format!("{:x}", rand::random::<u64>())
}

/// An outbound request envelope.
#[derive(Debug, Clone)]
pub struct Request {
    pub operation: Operation,
    pub target: String,
    pub origin: String,
    pub token: String,
    content: Option<String>,
}

impl Request {
    /// Retrieve the resource at a device-relative path.
    pub fn retrieve(path: &str) -> Self {
        Self::new(Operation::Retrieve, format!("{}/{}", DEVICE_ROOT, path), None)
    }

    /// Create a new content instance (a write) at a device-relative path.
    pub fn write(path: &str, value: impl Into<String>) -> Self {
        Self::new(
            Operation::Create,
            format!("{}/{}", DEVICE_ROOT, path),
            Some(value.into()),
        )
    }

    /// Ask the gateway node for its identity.
    pub fn device_info() -> Self {
        Self::new(Operation::Retrieve, DEVICE_INFO_TARGET.to_string(), None)
    }

    fn new(operation: Operation, target: String, content: Option<String>) -> Self {
        Self {
            operation,
            target,
            origin: DEFAULT_ORIGIN.to_string(),
            token: correlation_token(),
            content,
        }
    }

    /// Override the return address.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Render the envelope as the JSON text sent over the socket.
    pub fn encode(&self) -> String {
        let mut body = json!({
            "op": self.operation as u8,
            "to": self.target,
            "fr": self.origin,
            "rqi": self.token,
        });
        if let (Some(content), Some(obj)) = (&self.content, body.as_object_mut()) {
            obj.insert("ty".to_string(), json!(4));
            obj.insert(
                "pc".to_string(),
                json!({ "m2m:cin": { "con": content, "cnf": "text/plain:0" } }),
            );
        }
        json!({ REQUEST_KEY: body }).to_string()
    }
}

/// Why an inbound message was not accepted as a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Reply is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Reply is not a JSON object")]
    NotAnObject,

    #[error("Reply has no 'm2m:rsp' object")]
    MissingEnvelope,

    #[error("Reply has no numeric result code")]
    MissingCode,
}

/// A parsed response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Numeric result code (`rsc`).
    pub code: u32,
    /// Correlation token echoed by the gateway, if any.
    pub token: Option<String>,
    body: Map<String, Value>,
}

impl Response {
    /// Parse the text of one inbound message.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let root: Value =
            serde_json::from_str(text).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
        let Value::Object(mut root) = root else {
            return Err(EnvelopeError::NotAnObject);
        };
        let Some(Value::Object(body)) = root.remove(RESPONSE_KEY) else {
            return Err(EnvelopeError::MissingEnvelope);
        };
        let code = body
            .get("rsc")
            .and_then(number_as_u32)
            .ok_or(EnvelopeError::MissingCode)?;
        let token = body.get("rqi").and_then(Value::as_str).map(str::to_string);

        Ok(Self { code, token, body })
    }

    /// `2000`-class result codes signal success.
    pub fn is_success(&self) -> bool {
        (2000..3000).contains(&self.code)
    }

    /// Follow a chain of keys below the envelope body.
    pub fn at(&self, keys: &[&str]) -> Option<&Value> {
        let (first, rest) = keys.split_first()?;
        let mut node = self.body.get(*first)?;
        for key in rest {
            node = node.as_object()?.get(*key)?;
        }
        Some(node)
    }

    /// Text content of a content instance (`pc.m2m:cin.con`).
    pub fn content(&self) -> Option<String> {
        match self.at(&["pc", "m2m:cin", "con"])? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Container label (`pc.m2m:cnt.lbl`), only when it is a scalar.
    pub fn label(&self) -> Option<String> {
        match self.at(&["pc", "m2m:cnt", "lbl"])? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

fn number_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Identity of the gateway as reported by `deviceInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInformation {
    #[serde(rename = "dlb")]
    pub id: String,
    #[serde(rename = "mod")]
    pub model: String,
    #[serde(rename = "dty")]
    pub device_type: String,
    #[serde(rename = "fwv")]
    pub firmware: String,
    #[serde(rename = "swv")]
    pub software: String,
    #[serde(rename = "hwv")]
    pub hardware: String,
}

impl DeviceInformation {
    /// Extract the identity from a `deviceInfo` reply.
    pub fn from_response(response: &Response) -> Option<Self> {
        let node = response.at(&["pc", "m2m:dvi"])?;
        serde_json::from_value(node.clone()).ok()
    }
}

impl std::fmt::Display for DeviceInformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (model {}, type {}, firmware {}, software {}, hardware {})",
            self.id, self.model, self.device_type, self.firmware, self.software, self.hardware
        )
    }
}
