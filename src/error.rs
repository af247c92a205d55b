// src/error.rs

//! Error types.
//!
//! Call failures travel as data: every failure a caller of
//! [`HubClient::send_request`](crate::HubClient::send_request) can observe
//! carries a structured [`ErrorBody`] whose `code` is one of the constants in
//! [`codes`] (or whatever code a remote service chose to report).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol error codes.
pub mod codes {
    /// No reply arrived within the request timeout.
    pub const REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";

    /// The remote service has no handler for the requested event.
    pub const EVENT_NOT_FOUND: &str = "EVENT_NOT_FOUND";

    /// The remote handler failed while processing the request.
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";

    /// The hub already has a live connection under this service name.
    pub const DUPLICATE_SERVICE_REGISTRATION: &str = "DUPLICATE_SERVICE_REGISTRATION";
}

/// Structured error value carried on the wire as `{code, message, errorData}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    // ---
    pub code: String,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_data: Option<Value>,
}

impl ErrorBody {
    // ---
    pub fn new(code: impl Into<String>, message: impl Into<String>, error_data: Option<Value>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            error_data,
        }
    }

    /// Interpret an arbitrary `error` field from a reply.
    ///
    /// Well-formed bodies decode directly. Anything else (a bare string, a
    /// number, an object missing `code`) is wrapped so the caller still gets
    /// a structured value.
    pub fn from_wire(value: Value) -> Self {
        // ---
        match serde_json::from_value::<ErrorBody>(value.clone()) {
            Ok(body) => body,
            Err(_) => {
                let message = match &value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Self {
                    code: codes::INTERNAL_SERVER_ERROR.to_string(),
                    message,
                    error_data: Some(value),
                }
            }
        }
    }
}

/// Errors that can occur during RPC operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// No reply within the request timeout.
    ///
    /// `error_data` carries `{targetService, event, data}`.
    #[error("request timed out: {}", .0.message)]
    Timeout(ErrorBody),

    /// The remote service answered with an `error` field.
    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(ErrorBody),

    /// The hub connection dropped while the call was pending.
    #[error("connection to hub lost")]
    ConnectionLost,

    /// The client was dropped or shut down before the call settled.
    #[error("client closed before the request settled")]
    ConnectionClosed,

    /// The hub rejected this client's service name. Fatal for the instance.
    #[error("service name already registered with hub: {0}")]
    DuplicateService(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Required configuration was not provided.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Configuration value could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RpcError {
    // ---
    /// Protocol code for call-failure kinds that carry one.
    pub fn code(&self) -> Option<&str> {
        match self {
            RpcError::Timeout(body) | RpcError::Remote(body) => Some(body.code.as_str()),
            RpcError::DuplicateService(_) => Some(codes::DUPLICATE_SERVICE_REGISTRATION),
            _ => None,
        }
    }

    /// Structured body for call-failure kinds.
    pub fn body(&self) -> Option<&ErrorBody> {
        match self {
            RpcError::Timeout(body) | RpcError::Remote(body) => Some(body),
            _ => None,
        }
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
