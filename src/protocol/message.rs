use crate::{CorrelationId, ErrorBody};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Request body as seen by the target service: `{id, event, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub id: CorrelationId,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Outbound request as emitted to the hub: `{targetService, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRequest {
    pub target_service: String,
    pub payload: RequestPayload,
}

/// Reply in either direction: `{id, response}`.
///
/// `response` is application data, or `{error: {code, message, errorData}}`
/// when the responder failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub id: CorrelationId,
    #[serde(default)]
    pub response: Value,
}

impl ResponseMessage {
    // ---
    pub fn ok(id: CorrelationId, response: Value) -> Self {
        Self { id, response }
    }

    pub fn failure(id: CorrelationId, error: ErrorBody) -> Self {
        // ---
        // ErrorBody serialization cannot fail: it is plain strings and a Value.
        let error = serde_json::to_value(error).unwrap_or(Value::Null);
        Self {
            id,
            response: json!({ "error": error }),
        }
    }

    /// The `error` field of the reply, if present and non-null.
    pub fn error(&self) -> Option<&Value> {
        self.response.get("error").filter(|v| !v.is_null())
    }

    /// Split the reply into application data or a structured error.
    pub fn into_outcome(self) -> std::result::Result<Value, ErrorBody> {
        // ---
        match self.error() {
            Some(err) => Err(ErrorBody::from_wire(err.clone())),
            None => Ok(self.response),
        }
    }
}

/// Liveness signal: `{serviceName}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub service_name: String,
}

/// Payload of a `connect_error` event.
///
/// `data` is present when the hub rejected the connection for a structured
/// reason (such as a duplicate service name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectErrorData {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorBody>,
}

impl ConnectErrorData {
    /// Error code carried in `data`, if any.
    pub fn code(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.code.as_str())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::codes;

    #[test]
    fn test_outbound_request_shape() {
        // ---
        let req = OutboundRequest {
            target_service: "billing".into(),
            payload: RequestPayload {
                id: CorrelationId::from("r-1"),
                event: "ping".into(),
                data: json!({"n": 1}),
            },
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"targetService": "billing", "payload": {"id": "r-1", "event": "ping", "data": {"n": 1}}})
        );
    }

    #[test]
    fn test_request_without_data_decodes() {
        // ---
        let req: RequestPayload = serde_json::from_value(json!({"id": "r-2", "event": "status"})).unwrap();
        assert_eq!(req.data, Value::Null);
    }

    #[test]
    fn test_outcome_success() {
        // ---
        let msg = ResponseMessage::ok(CorrelationId::from("a"), json!({"n": 2}));
        assert_eq!(msg.into_outcome().unwrap(), json!({"n": 2}));
    }

    #[test]
    fn test_outcome_error() {
        // ---
        let msg = ResponseMessage::failure(
            CorrelationId::from("a"),
            ErrorBody::new(codes::EVENT_NOT_FOUND, "nope", None),
        );
        assert_eq!(
            msg.response,
            json!({"error": {"code": "EVENT_NOT_FOUND", "message": "nope"}})
        );
        let err = msg.into_outcome().unwrap_err();
        assert_eq!(err.code, codes::EVENT_NOT_FOUND);
    }

    #[test]
    fn test_null_error_field_is_success() {
        // ---
        let msg = ResponseMessage::ok(CorrelationId::from("a"), json!({"error": null, "v": 1}));
        assert!(msg.error().is_none());
        assert!(msg.into_outcome().is_ok());
    }

    #[test]
    fn test_scalar_response_is_success() {
        // ---
        let msg = ResponseMessage::ok(CorrelationId::from("a"), json!(42));
        assert_eq!(msg.into_outcome().unwrap(), json!(42));
    }
}
