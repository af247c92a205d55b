use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::sync::Arc;

/// Failure raised while running a handler, as text for the error reply.
pub(super) type HandlerFailure = String;

/// Type-erased handler function.
///
/// Takes the request `data` and returns the response value, or a message
/// describing why it failed. Wrapped in `Arc` so dispatch can clone it out of
/// the registry and release the lock before running it.
pub(super) type BoxedHandler =
    Arc<dyn Fn(Value) -> std::result::Result<Value, HandlerFailure> + Send + Sync>;

/// Wrap a typed handler into a type-erased one.
///
/// Request decoding and response encoding failures are reported the same way
/// as a handler returning `Err`: they all mean the handler could not produce
/// a reply.
pub(super) fn wrap_handler<F, Req, Resp, E>(handler: F) -> BoxedHandler
where
    F: Fn(Req) -> std::result::Result<Resp, E> + Send + Sync + 'static,
    Req: DeserializeOwned + 'static,
    Resp: Serialize + 'static,
    E: Display + 'static,
{
    // ---
    Arc::new(move |data: Value| {
        let req: Req = serde_json::from_value(data)
            .map_err(|e| format!("invalid request payload: {e}"))?;

        let resp = handler(req).map_err(|e| e.to_string())?;

        serde_json::to_value(resp).map_err(|e| format!("unserializable response: {e}"))
    })
}
