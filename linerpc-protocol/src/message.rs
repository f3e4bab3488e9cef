//! JSON message types for RPC requests and responses.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request message.
///
/// On the wire: `{"func_name": "add", "args": [2, 3], "kwargs": {}}`. Both
/// `args` and `kwargs` may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Name of the registered function to invoke.
    pub func_name: String,

    /// Positional arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,

    /// Keyword arguments.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,
}

impl Request {
    pub fn new(func_name: impl Into<String>) -> Self {
        Self {
            func_name: func_name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Parses and validates a decoded frame.
    ///
    /// Distinguishes frames that are not JSON objects from objects that are
    /// not valid requests, so the error message tells the caller which.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(line)?;
        Self::from_value(value)
    }

    /// Validates an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let mut object = match value {
            Value::Object(map) => map,
            other => return Err(ProtocolError::NotAnObject(json_kind(&other))),
        };

        let func_name = match object.remove("func_name") {
            None | Some(Value::Null) => return Err(ProtocolError::MissingField("func_name")),
            Some(Value::String(name)) => name,
            Some(_) => {
                return Err(ProtocolError::InvalidField {
                    field: "func_name",
                    expected: "a string",
                })
            }
        };

        let args = match object.remove("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args,
            Some(_) => {
                return Err(ProtocolError::InvalidField {
                    field: "args",
                    expected: "an array",
                })
            }
        };

        let kwargs = match object.remove("kwargs") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(kwargs)) => kwargs,
            Some(_) => {
                return Err(ProtocolError::InvalidField {
                    field: "kwargs",
                    expected: "an object",
                })
            }
        };

        Ok(Self {
            func_name,
            args,
            kwargs,
        })
    }
}

/// Response message.
///
/// Serializes to `{"result": ...}` or `{"error": "..."}`. Being an enum, a
/// response can never carry both keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Result(Value),
    Error(String),
}

impl Response {
    pub fn ok(result: impl Into<Value>) -> Self {
        Response::Result(result.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Result(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Returns the result value, if any.
    pub fn result(&self) -> Option<&Value> {
        match self {
            Response::Result(value) => Some(value),
            Response::Error(_) => None,
        }
    }

    /// Returns the error message, if any.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Response::Result(_) => None,
            Response::Error(message) => Some(message),
        }
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self {
            Response::Result(value) => Ok(value),
            Response::Error(message) => Err(message),
        }
    }
}

/// Returns a short name for the JSON type of a value.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_request() {
        let request =
            Request::parse(r#"{"func_name": "add", "args": [2, 3], "kwargs": {"x": true}}"#)
                .unwrap();
        assert_eq!(request.func_name, "add");
        assert_eq!(request.args, vec![json!(2), json!(3)]);
        assert_eq!(request.kwargs["x"], json!(true));
    }

    #[test]
    fn test_parse_defaults() {
        let request = Request::parse(r#"{"func_name": "ping"}"#).unwrap();
        assert!(request.args.is_empty());
        assert!(request.kwargs.is_empty());

        let request = Request::parse(r#"{"func_name": "ping", "args": null}"#).unwrap();
        assert!(request.args.is_empty());
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = Request::parse("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }

    #[test]
    fn test_parse_not_an_object() {
        let err = Request::parse("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, ProtocolError::NotAnObject("array")));

        let err = Request::parse("\"add\"").unwrap_err();
        assert!(matches!(err, ProtocolError::NotAnObject("string")));
    }

    #[test]
    fn test_parse_missing_func_name() {
        let err = Request::parse(r#"{"args": [1]}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("func_name")));
    }

    #[test]
    fn test_parse_invalid_fields() {
        let err = Request::parse(r#"{"func_name": 5}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidField {
                field: "func_name",
                ..
            }
        ));

        let err = Request::parse(r#"{"func_name": "add", "args": 5}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "args", .. }));

        let err = Request::parse(r#"{"func_name": "add", "kwargs": [1]}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidField {
                field: "kwargs",
                ..
            }
        ));
    }

    #[test]
    fn test_request_serialization_skips_empty() {
        let request = Request::new("upper").with_arg("hi");
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"func_name":"upper","args":["hi"]}"#);

        let request = Request::new("sleep").with_kwarg("seconds", 1);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"func_name":"sleep","kwargs":{"seconds":1}}"#);
    }

    #[test]
    fn test_response_wire_shape() {
        let json = serde_json::to_value(Response::ok(5)).unwrap();
        assert_eq!(json, json!({"result": 5}));

        let json = serde_json::to_value(Response::ok(Value::Null)).unwrap();
        assert_eq!(json, json!({"result": null}));

        let json = serde_json::to_value(Response::error("boom")).unwrap();
        assert_eq!(json, json!({"error": "boom"}));
    }

    #[test]
    fn test_response_deserialize() {
        let response: Response = serde_json::from_str(r#"{"result": "HELLO"}"#).unwrap();
        assert_eq!(response.result(), Some(&json!("HELLO")));
        assert!(response.is_ok());

        let response: Response = serde_json::from_str(r#"{"error": "nope"}"#).unwrap();
        assert_eq!(response.error_message(), Some("nope"));
        assert!(response.is_error());
    }

    #[test]
    fn test_response_rejects_both_keys() {
        let parsed = serde_json::from_str::<Response>(r#"{"result": 1, "error": "x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_response_into_result() {
        assert_eq!(Response::ok(1).into_result(), Ok(json!(1)));
        assert_eq!(
            Response::error("bad").into_result(),
            Err("bad".to_string())
        );
    }
}
