//! Request/response RPC over a persistent duplex connection to a hub.
//!
//! Services connect to a central hub under a name and exchange
//! identity-stamped messages through it. This library provides the client
//! side: correlation ID generation, request/response matching, timeouts,
//! late-reply tracking, inbound handler dispatch and heartbeats.
//!

// Import all sub modules once...
mod client_builder;
mod config;
mod domain;
mod heartbeat;
mod hub_client;
mod logging;
mod server;
mod sync;
mod tracker;
mod transport;

pub mod protocol;

mod correlation;
mod error;
mod macros;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client_builder::HubClientBuilder;
pub use hub_client::{HubClient, RequestOptions};
pub use server::HandlerRegistry;
pub use tracker::{
    // ---
    IssuedCall,
    LateOutcome,
    LateReply,
    LateReplyObserver,
    LateReplyOptions,
    PendingReply,
    ReplyDisposition,
    RequestTracker,
};

pub use config::{
    // ---
    ClientConfig,
    DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_LATE_REPLY_RETENTION,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use logging::LogLevel;

#[cfg(feature = "logging")]
pub use logging::init_logging;

pub use correlation::CorrelationId;
pub use error::{codes, ErrorBody, Result, RpcError};

pub use transport::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};

// --- public re-exports
pub use domain::{
    //
    ChannelEvent,
    ChannelHandle,
    OutboundMessage,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

/// Create the transport selected by `config.hub_url`.
///
/// `memory://` URLs connect to the process-global in-memory hub. No network
/// transport ships with this crate; plug one in through [`Transport`] and
/// [`HubClientBuilder::new`].
pub async fn create_transport(config: &ClientConfig) -> Result<TransportPtr> {
    // ---
    config.validate()?;

    let transport_config = TransportConfig {
        hub_url: config.hub_url.clone(),
        service_name: config.service_name.clone(),
    };

    if config.hub_url.starts_with("memory://") {
        return create_memory_transport(transport_config).await;
    }

    Err(RpcError::InvalidConfig(format!(
        "unsupported hub URL scheme: {}",
        config.hub_url
    )))
}
