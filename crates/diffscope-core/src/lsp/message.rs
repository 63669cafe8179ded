//! JSON-RPC 2.0 message classification and builders.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Request id. clangd uses numbers; strings are legal and passed through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// The `error` member of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// A frame body from the server, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to one of our requests.
    Response {
        id: RequestId,
        result: Result<Value, ResponseError>,
    },
    /// Server-initiated request that expects a reply.
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification { method: String, params: Value },
}

/// A frame that is valid JSON but not a JSON-RPC message we can route.
#[derive(Debug, thiserror::Error)]
#[error("invalid JSON-RPC message: {reason}")]
pub struct MessageError {
    reason: String,
}

impl MessageError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Incoming {
    /// Classify a decoded frame.
    ///
    /// `method` and `id` make a request, `method` alone a notification,
    /// `id` alone a response. Anything else is a protocol violation.
    pub fn classify(value: Value) -> Result<Self, MessageError> {
        let Value::Object(mut obj) = value else {
            return Err(MessageError::new("message is not an object"));
        };

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<RequestId>(raw)
                    .map_err(|_| MessageError::new("id is neither a number nor a string"))?,
            ),
        };
        let method = match obj.remove("method") {
            None => None,
            Some(Value::String(m)) => Some(m),
            Some(_) => return Err(MessageError::new("method is not a string")),
        };
        let params = obj.remove("params").unwrap_or(Value::Null);

        match (method, id) {
            (Some(method), Some(id)) => Ok(Self::Request { id, method, params }),
            (Some(method), None) => Ok(Self::Notification { method, params }),
            (None, Some(id)) => {
                let result = match obj.remove("error") {
                    Some(Value::Null) | None => Ok(obj.remove("result").unwrap_or(Value::Null)),
                    Some(err) => Err(serde_json::from_value::<ResponseError>(err)
                        .map_err(|_| MessageError::new("malformed error object"))?),
                };
                Ok(Self::Response { id, result })
            }
            (None, None) => Err(MessageError::new("neither method nor id present")),
        }
    }
}

pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

pub fn response(id: &RequestId, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}
