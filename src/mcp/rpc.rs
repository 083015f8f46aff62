//! JSON-RPC envelope types
//!
//! A response carries exactly one of `result` or `error`; the [`Outcome`]
//! enum is flattened into the envelope so the two cannot coexist.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent or `null` marks a notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: Option<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    pub fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(id: Option<Value>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Error(error),
        }
    }

    /// Serializes `result`, falling back to an internal error if that fails.
    pub fn serialized<T: Serialize>(id: Option<Value>, result: &T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self::result(id, value),
            Err(err) => Self::error(
                id,
                ErrorObject::internal_error("failed to encode result", Some(json!(err.to_string()))),
            ),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    pub fn error_code(&self) -> Option<i32> {
        match &self.outcome {
            Outcome::Error(error) => Some(error.code),
            Outcome::Result(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request", None)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"), None)
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, "Invalid params", Some(Value::String(detail.into())))
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(
            INVALID_PARAMS,
            format!("Unknown tool: {name}"),
            Some(json!({ "name": name })),
        )
    }

    pub fn internal_error(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(INTERNAL_ERROR, message, data)
    }
}

/// `tools/call` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// Canonical correlation key for an id: strings verbatim, everything else as
/// compact JSON (so `7` → `"7"`).
pub fn request_key(id: &Value) -> String {
    match id {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_null_ids_are_notifications() {
        let missing: Request =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .expect("decode");
        let null: Request =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).expect("decode");
        let numbered: Request =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#).expect("decode");

        assert!(missing.is_notification());
        assert!(null.is_notification());
        assert_eq!(numbered.id, Some(json!(7)));
    }

    #[test]
    fn response_serializes_exactly_one_outcome() {
        let ok = serde_json::to_value(Response::result(Some(json!(7)), json!({"status": "ok"})))
            .expect("serialize");
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 7, "result": {"status": "ok"}}));

        let failed = serde_json::to_value(Response::error(
            Some(json!("a")),
            ErrorObject::method_not_found("nope"),
        ))
        .expect("serialize");
        assert_eq!(failed["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(failed["error"]["message"], "Method not found: nope");
        assert!(failed.get("result").is_none());
        assert!(failed["error"].get("data").is_none());
    }

    #[test]
    fn request_key_coerces_scalars() {
        assert_eq!(request_key(&json!(7)), "7");
        assert_eq!(request_key(&json!("req-7")), "req-7");
        assert_eq!(request_key(&json!(1.5)), "1.5");
        assert_eq!(request_key(&json!(true)), "true");
    }
}
