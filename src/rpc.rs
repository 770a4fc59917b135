//! RPC wire types: request envelope, response codes, response rendering

use crate::error::Lwm2mError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol response code carried in the `result` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Content,
    Changed,
    Created,
    Deleted,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    InternalServerError,
}

impl ResponseCode {
    pub fn name(&self) -> &'static str {
        match self {
            ResponseCode::Content => "CONTENT",
            ResponseCode::Changed => "CHANGED",
            ResponseCode::Created => "CREATED",
            ResponseCode::Deleted => "DELETED",
            ResponseCode::BadRequest => "BAD_REQUEST",
            ResponseCode::NotFound => "NOT_FOUND",
            ResponseCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ResponseCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ResponseCode::Content
                | ResponseCode::Changed
                | ResponseCode::Created
                | ResponseCode::Deleted
        )
    }
}

/// Incoming RPC request envelope
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        RpcRequest {
            method: method.into(),
            params,
        }
    }
}

/// Outgoing RPC response: `result` plus exactly one of `value`/`error`,
/// or neither for codes like DELETED
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub result: ResponseCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn content(value: impl Into<String>) -> Self {
        RpcResponse {
            result: ResponseCode::Content,
            value: Some(value.into()),
            error: None,
        }
    }

    pub fn changed() -> Self {
        RpcResponse {
            result: ResponseCode::Changed,
            value: None,
            error: None,
        }
    }

    pub fn created() -> Self {
        RpcResponse {
            result: ResponseCode::Created,
            value: None,
            error: None,
        }
    }

    pub fn deleted() -> Self {
        RpcResponse {
            result: ResponseCode::Deleted,
            value: None,
            error: None,
        }
    }

    pub fn error(result: ResponseCode, message: impl Into<String>) -> Self {
        RpcResponse {
            result,
            value: None,
            error: Some(message.into()),
        }
    }
}

impl From<Lwm2mError> for RpcResponse {
    fn from(err: Lwm2mError) -> Self {
        let code = match err {
            Lwm2mError::BadRequest(_) | Lwm2mError::Json(_) => ResponseCode::BadRequest,
            Lwm2mError::NotFound(_) => ResponseCode::NotFound,
            Lwm2mError::MethodNotAllowed(_) => ResponseCode::MethodNotAllowed,
            Lwm2mError::Internal(_) | Lwm2mError::Io(_) => ResponseCode::InternalServerError,
        };
        RpcResponse::error(code, err.to_string())
    }
}

/// The fixed method table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Read,
    ReadComposite,
    WriteReplace,
    WriteUpdate,
    WriteAttributes,
    WriteComposite,
    Execute,
    Discover,
    DiscoverAll,
    Create,
    Delete,
    Observe,
    ObserveCancel,
    ObserveCancelAll,
    ObserveComposite,
    ObserveCompositeCancel,
    ObserveReadAll,
}

impl OperationType {
    /// Look up a method by its exact wire name
    pub fn from_name(name: &str) -> std::result::Result<Self, RpcResponse> {
        let op = match name {
            "Read" => OperationType::Read,
            "ReadComposite" => OperationType::ReadComposite,
            "WriteReplace" => OperationType::WriteReplace,
            "WriteUpdate" => OperationType::WriteUpdate,
            "WriteAttributes" => OperationType::WriteAttributes,
            "WriteComposite" => OperationType::WriteComposite,
            "Execute" => OperationType::Execute,
            "Discover" => OperationType::Discover,
            "DiscoverAll" => OperationType::DiscoverAll,
            "Create" => OperationType::Create,
            "Delete" => OperationType::Delete,
            "Observe" => OperationType::Observe,
            "ObserveCancel" => OperationType::ObserveCancel,
            "ObserveCancelAll" => OperationType::ObserveCancelAll,
            "ObserveComposite" => OperationType::ObserveComposite,
            "ObserveCompositeCancel" => OperationType::ObserveCompositeCancel,
            "ObserveReadAll" => OperationType::ObserveReadAll,
            other => {
                return Err(RpcResponse::error(
                    ResponseCode::MethodNotAllowed,
                    format!("Unsupported operation type: {}", other),
                ));
            }
        };
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_serialization_shapes() {
        let ok = serde_json::to_value(RpcResponse::content("42")).unwrap();
        assert_eq!(ok, serde_json::json!({"result": "CONTENT", "value": "42"}));

        let err = serde_json::to_value(RpcResponse::error(
            ResponseCode::BadRequest,
            "bad path",
        ))
        .unwrap();
        assert_eq!(
            err,
            serde_json::json!({"result": "BAD_REQUEST", "error": "bad path"})
        );

        let deleted = serde_json::to_value(RpcResponse::deleted()).unwrap();
        assert_eq!(deleted, serde_json::json!({"result": "DELETED"}));
    }

    #[test]
    fn test_code_names() {
        assert_eq!(ResponseCode::MethodNotAllowed.name(), "METHOD_NOT_ALLOWED");
        assert!(ResponseCode::Content.is_success());
        assert!(!ResponseCode::BadRequest.is_success());
    }

    #[test]
    fn test_method_table() {
        assert_eq!(
            OperationType::from_name("ObserveCompositeCancel").unwrap(),
            OperationType::ObserveCompositeCancel
        );
        let err = OperationType::from_name("Reboot").unwrap_err();
        assert_eq!(err.result, ResponseCode::MethodNotAllowed);
        assert_eq!(
            err.error.as_deref(),
            Some("Unsupported operation type: Reboot")
        );
    }

    #[test]
    fn test_request_deserialization() {
        let request: RpcRequest =
            serde_json::from_str(r#"{"method": "Read", "params": {"id": "/3/0/9"}}"#).unwrap();
        assert_eq!(request.method, "Read");
        assert_eq!(request.params["id"], "/3/0/9");
    }
}
