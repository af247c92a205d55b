// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the narrow interface the correlation core uses to talk
//! to the hub. It intentionally avoids any reference to concrete protocols or
//! client libraries.
//!
//! The transport is responsible only for:
//! - establishing the duplex channel and reporting lifecycle events,
//! - emitting outbound messages (fire-and-forget),
//! - delivering inbound messages fully decoded.
//!
//! Correlation, timeouts and handler dispatch are handled elsewhere.
//!
//! Concrete implementations of this interface live under `src/transport/`.
use crate::protocol::{ConnectErrorData, Heartbeat, OutboundRequest, RequestPayload, ResponseMessage};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use tokio::sync::mpsc;

/// Shared base state for all transport implementations.
///
/// Each concrete transport embeds this as a field named `base` so that the
/// default `Transport` accessors can delegate to it.
pub struct TransportBase {
    /// Service name this transport connects as.
    pub service_name: String,
    /// Hub URL the transport was created for.
    pub hub_url: String,
}

impl From<&TransportConfig> for TransportBase {
    fn from(config: &TransportConfig) -> Self {
        // ---
        Self {
            service_name: config.service_name.clone(),
            hub_url: config.hub_url.clone(),
        }
    }
}

/// Configuration for creating a transport instance.
///
/// Passed to transport factory functions (`create_*_transport()`).
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Hub URL (e.g. `"memory://"`).
    pub hub_url: String,
    /// Name this client registers under at the hub.
    pub service_name: String,
}

/// An inbound event delivered on the duplex channel.
///
/// Each variant corresponds to one event subscription on the hub channel
/// (`connect`, `disconnect`, `request`, `response`, `connect_error`) and
/// carries exactly one decoded payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum ChannelEvent {
    Connect,
    Disconnect,
    Request(RequestPayload),
    Response(ResponseMessage),
    ConnectError(ConnectErrorData),
}

/// An outbound message emitted to the hub.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum OutboundMessage {
    Request(OutboundRequest),
    Response(ResponseMessage),
    Heartbeat(Heartbeat),
}

/// Handle returned from a successful `connect()`.
///
/// The inbox stays open until the transport is closed or the hub drops the
/// connection. Dropping the handle stops delivery.
pub struct ChannelHandle {
    // ---
    /// Receiver for decoded inbound events.
    pub inbox: mpsc::Receiver<ChannelEvent>,
}

/// Transport abstraction.
///
/// A `Transport` provides a persistent duplex channel to the hub. The
/// correlation core consumes it through three calls only.
///
/// Implementations must ensure that:
/// - Events are delivered in the order the hub produced them for this
///   service; no ordering is promised across different calls.
/// - `emit()` does not wait for any acknowledgment beyond handing the message
///   to the channel.
/// - Reconnect, retry and framing stay inside the transport.
///
/// The in-memory transport serves as the reference implementation of these
/// semantics.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Service name this transport connects as.
    fn service_name(&self) -> &str {
        &self.base().service_name
    }

    /// Hub URL this transport targets.
    fn hub_url(&self) -> &str {
        &self.base().hub_url
    }

    /// Open the channel and return the inbound event stream.
    ///
    /// The first event delivered is `Connect` or `ConnectError`.
    async fn connect(&self) -> Result<ChannelHandle>;

    /// Emit an outbound message (fire-and-forget).
    async fn emit(&self, msg: OutboundMessage) -> Result<()>;

    /// Close the channel and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// `.clone()` only bumps a reference count; clones share one connection.
pub type TransportPtr = Arc<dyn Transport>;
