//! JSON-RPC 2.0 envelope and conversions between typed calls and wire methods.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// A closed set of wire methods one side of the bridge accepts.
///
/// Implementors are enums serialized as `{"method": <Variant>, "params": {..}}`
/// so every variant maps to exactly one case-sensitive method name.
pub trait WireCall: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Every method name this enum can decode.
    const METHODS: &'static [&'static str];

    /// Method name of this call.
    fn method(&self) -> &'static str;
}

/// Request identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

/// One line on the wire, before it is classified
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// A decoded incoming message
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: RequestId,
        outcome: Result<Value, ErrorObject>,
    },
}

impl RawMessage {
    fn empty() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    /// Creates a request expecting a response.
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(id),
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    /// Creates a fire-and-forget notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    /// Creates the response to a request.
    pub fn response(id: RequestId, outcome: Result<Value, ErrorObject>) -> Self {
        match outcome {
            Ok(result) => Self {
                id: Some(id),
                result: Some(result),
                ..Self::empty()
            },
            Err(error) => Self {
                id: Some(id),
                error: Some(error),
                ..Self::empty()
            },
        }
    }

    /// Sorts the message into request, notification or response.
    pub fn classify(self) -> Result<Incoming, String> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(format!("unsupported jsonrpc version '{}'", self.jsonrpc));
        }

        match (self.id, self.method) {
            (Some(id), Some(method)) => Ok(Incoming::Request {
                id,
                method,
                params: self.params.unwrap_or(Value::Null),
            }),
            (None, Some(method)) => Ok(Incoming::Notification {
                method,
                params: self.params.unwrap_or(Value::Null),
            }),
            (Some(id), None) => {
                let outcome = match self.error {
                    Some(error) => Err(error),
                    // `"result": null` deserializes as None
                    None => Ok(self.result.unwrap_or(Value::Null)),
                };
                Ok(Incoming::Response { id, outcome })
            }
            (None, None) => Err("message has neither id nor method".to_string()),
        }
    }
}

/// Serializes a message as a single newline-terminated line.
pub fn encode_line(message: &RawMessage) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Splits a typed call into its method name and params object.
pub fn split_call<C: WireCall>(call: &C) -> Result<(String, Option<Value>), serde_json::Error> {
    let value = serde_json::to_value(call)?;
    let Value::Object(mut object) = value else {
        return Err(serde::ser::Error::custom("call did not serialize to an object"));
    };

    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        _ => return Err(serde::ser::Error::custom("call is missing its method tag")),
    };

    Ok((method, object.remove("params")))
}

/// Rebuilds a typed call from a method name and params.
pub fn join_call<C: WireCall>(method: &str, params: Value) -> Result<C, serde_json::Error> {
    let mut object = Map::new();
    object.insert("method".to_string(), Value::String(method.to_string()));
    if !params.is_null() {
        object.insert("params".to_string(), params);
    }
    serde_json::from_value(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_messages() {
        let request: RawMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 3, "method": "Ping"})).unwrap();
        assert_eq!(
            request.classify().unwrap(),
            Incoming::Request {
                id: RequestId::Number(3),
                method: "Ping".to_string(),
                params: Value::Null,
            }
        );

        let response: RawMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 3, "result": null})).unwrap();
        assert_eq!(
            response.classify().unwrap(),
            Incoming::Response {
                id: RequestId::Number(3),
                outcome: Ok(Value::Null),
            }
        );

        let failed: RawMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": "a",
            "error": {"code": -32601, "message": "nope"}
        }))
        .unwrap();
        match failed.classify().unwrap() {
            Incoming::Response { outcome: Err(error), .. } => assert_eq!(error.code, METHOD_NOT_FOUND),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejects_bad_envelopes() {
        let no_version: RawMessage =
            serde_json::from_value(json!({"jsonrpc": "1.0", "method": "Ping"})).unwrap();
        assert!(no_version.classify().is_err());

        let empty: RawMessage = serde_json::from_value(json!({"jsonrpc": "2.0"})).unwrap();
        assert!(empty.classify().is_err());
    }

    #[test]
    fn test_notification_omits_id() {
        let line = encode_line(&RawMessage::notification("CloseHost", None)).unwrap();
        assert_eq!(line, "{\"jsonrpc\":\"2.0\",\"method\":\"CloseHost\"}\n");
    }
}
