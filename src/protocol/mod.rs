//! Wire message shapes.
//!
//! Every identity-bearing message exchanged with the hub is defined here.
//! Field names follow the hub's JSON conventions (`camelCase`).
mod message;

pub use message::{ConnectErrorData, Heartbeat, OutboundRequest, RequestPayload, ResponseMessage};
