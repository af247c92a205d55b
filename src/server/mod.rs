//! Inbound request dispatch.
//!
//! Routes request-shaped messages (`{id, event, data}`) to locally registered
//! handlers and turns every outcome into exactly one reply:
//!
//! - handler returned normally: `{id, response: <value>}`
//! - handler failed or panicked: `{id, response: {error: INTERNAL_SERVER_ERROR}}`
//! - no handler for the event: `{id, response: {error: EVENT_NOT_FOUND}}`
//!
//! Failures are caught here and never escape to the receive loop.
mod handler;

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::protocol::{RequestPayload, ResponseMessage};
use crate::sync::{read_ignore_poison, write_ignore_poison};
use crate::{codes, log_debug, log_error, log_warn, ErrorBody};
use handler::{wrap_handler, BoxedHandler};

/// Event name to handler table.
///
/// At most one handler per event; registering again replaces the previous
/// one.
pub struct HandlerRegistry {
    // ---
    service_name: String,
    handlers: RwLock<HashMap<String, BoxedHandler>>,
}

impl HandlerRegistry {
    // ---
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the handler for `event`.
    ///
    /// Returns `true` if an earlier handler was replaced.
    pub fn register<F, Req, Resp, E>(&self, event: &str, handler: F) -> bool
    where
        F: Fn(Req) -> std::result::Result<Resp, E> + Send + Sync + 'static,
        Req: DeserializeOwned + 'static,
        Resp: Serialize + 'static,
        E: Display + 'static,
    {
        // ---
        let replaced = write_ignore_poison(&self.handlers)
            .insert(event.to_string(), wrap_handler(handler))
            .is_some();

        if replaced {
            log_debug!("{}: replaced handler for '{event}'", self.service_name);
        } else {
            log_debug!("{}: registered handler for '{event}'", self.service_name);
        }
        replaced
    }

    pub fn contains(&self, event: &str) -> bool {
        read_ignore_poison(&self.handlers).contains_key(event)
    }

    /// Run the handler for an inbound request and build the reply.
    pub fn dispatch(&self, request: RequestPayload) -> ResponseMessage {
        // ---
        let RequestPayload { id, event, data } = request;

        log_debug!("{}: received request for '{event}' ({id})", self.service_name);

        let handler = read_ignore_poison(&self.handlers).get(&event).cloned();

        let Some(handler) = handler else {
            log_warn!("{}: no handler found for '{event}' ({id})", self.service_name);
            let body = ErrorBody::new(
                codes::EVENT_NOT_FOUND,
                format!("Event '{event}' not found"),
                Some(json!({
                    "event": event,
                    "requestID": id,
                    "serviceName": self.service_name,
                })),
            );
            return ResponseMessage::failure(id, body);
        };

        let failure = match catch_unwind(AssertUnwindSafe(|| handler(data))) {
            Ok(Ok(response)) => {
                log_debug!("{}: sending response for '{event}' ({id})", self.service_name);
                return ResponseMessage::ok(id, response);
            }
            Ok(Err(message)) => message,
            Err(panic) => panic_message(panic.as_ref()),
        };

        log_error!(
            "{}: error handling request for '{event}' ({id}): {failure}",
            self.service_name
        );

        let body = ErrorBody::new(
            codes::INTERNAL_SERVER_ERROR,
            "Internal server error",
            Some(json!({
                "event": event,
                "requestID": id,
                "originalErrorMessage": failure,
            })),
        );
        ResponseMessage::failure(id, body)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    // ---
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
