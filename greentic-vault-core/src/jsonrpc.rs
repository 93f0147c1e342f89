//! JSON-RPC 2.0 envelope used between callers, the gateway and DON nodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const CODE_PARSE_ERROR: i64 = -32700;
pub const CODE_INVALID_REQUEST: i64 = -32600;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_INTERNAL_ERROR: i64 = -32603;
/// Start of the implementation-defined server error range.
pub const CODE_SERVER_ERROR: i64 = -32000;

fn version() -> String {
    JSONRPC_VERSION.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(default = "version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: version(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Builds a request whose params are the JSON encoding of `params`.
    pub fn with_params<T: Serialize>(
        id: impl Into<String>,
        method: impl Into<String>,
        params: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self::new(id, method, Some(serde_json::to_value(params)?)))
    }

    /// Decodes the params into `T`; absent params decode like an empty document.
    pub fn decode_params<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        match &self.params {
            Some(value) => T::deserialize(value),
            None => serde_json::from_slice(b""),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    #[serde(default = "version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn success(id: impl Into<String>, method: Option<String>, result: Value) -> Self {
        Self {
            jsonrpc: version(),
            id: id.into(),
            method,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: version(),
            id: id.into(),
            method: None,
            result: None,
            error: Some(WireError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

pub fn encode_response(response: &Response) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_params_fail_to_decode() {
        let request = Request::new("1", "vault.secrets.create", None);
        let err = request
            .decode_params::<crate::types::CreateSecretsRequest>()
            .unwrap_err();
        assert!(err.is_eof());
    }

    #[test]
    fn failure_omits_result() {
        let response = Response::failure("7", CODE_INVALID_PARAMS, "bad");
        let value = serde_json::to_value(&response).expect("encode");
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": "7", "error": {"code": -32602, "message": "bad"}})
        );
    }
}
