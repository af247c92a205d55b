//! Hub client builder.
//!
//! Provides a fluent builder API for configuring [`HubClient`] instances
//! with timeout, heartbeat and late-reply settings.

use std::time::Duration;

use crate::config::{
    // ---
    DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_LATE_REPLY_RETENTION,
    DEFAULT_REQUEST_TIMEOUT,
};
use crate::hub_client::ClientSettings;
use crate::{ClientConfig, HubClient, Result, TransportPtr};

/// Builder for creating hub clients.
///
/// Accepts a transport and allows configuration of the request timeout,
/// heartbeats, late-reply retention and disconnect behavior.
///
/// # Examples
///
/// ```no_run
/// use hub_rpc::{create_memory_transport, HubClientBuilder, TransportConfig};
/// use std::time::Duration;
///
/// # async fn example() -> hub_rpc::Result<()> {
/// let transport = create_memory_transport(TransportConfig {
///     hub_url: "memory://".into(),
///     service_name: "billing".into(),
/// })
/// .await?;
///
/// let client = HubClientBuilder::new(transport)
///     .request_timeout(Duration::from_millis(500))
///     .heartbeat_interval(Duration::ZERO)
///     .fail_pending_on_disconnect(true)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct HubClientBuilder {
    // ---
    transport: TransportPtr,
    service_name: Option<String>,

    request_timeout: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    late_reply_retention: Option<Option<Duration>>,
    fail_pending_on_disconnect: Option<bool>,
}

impl HubClientBuilder {
    /// Create a new client builder.
    ///
    /// The client's service name defaults to `transport.service_name()`.
    pub fn new(transport: TransportPtr) -> Self {
        // ---
        Self {
            transport,
            service_name: None,
            request_timeout: None,
            heartbeat_interval: None,
            late_reply_retention: None,
            fail_pending_on_disconnect: None,
        }
    }

    /// Create a builder with every setting taken from `config`.
    pub fn from_config(transport: TransportPtr, config: &ClientConfig) -> Self {
        // ---
        Self::new(transport)
            .service_name(config.service_name.clone())
            .request_timeout(config.request_timeout)
            .heartbeat_interval(config.heartbeat_interval)
            .late_reply_retention(config.late_reply_retention)
            .fail_pending_on_disconnect(config.fail_pending_on_disconnect)
    }

    /// Override the service name used in logs and error data.
    ///
    /// The name the hub sees is always the transport's.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Set the default reply window per call.
    ///
    /// Default: 5s.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the heartbeat interval. `Duration::ZERO` disables heartbeats.
    ///
    /// Default: 5s.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Bound late-reply retention, or pass `None` to keep timed-out calls
    /// until a reply arrives.
    ///
    /// Default: 60s.
    pub fn late_reply_retention(mut self, retention: Option<Duration>) -> Self {
        self.late_reply_retention = Some(retention);
        self
    }

    /// Fail pending calls with `ConnectionLost` when the hub disconnects.
    ///
    /// Default: false (pending calls run to their own timeout).
    pub fn fail_pending_on_disconnect(mut self, enabled: bool) -> Self {
        self.fail_pending_on_disconnect = Some(enabled);
        self
    }

    /// Connect the transport and start the client (consumes self).
    pub async fn build(self) -> Result<HubClient> {
        // ---
        let service_name = self
            .service_name
            .unwrap_or_else(|| self.transport.service_name().to_string());

        let settings = ClientSettings {
            service_name,
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            heartbeat_interval: self
                .heartbeat_interval
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL),
            late_reply_retention: self
                .late_reply_retention
                .unwrap_or(Some(DEFAULT_LATE_REPLY_RETENTION)),
            fail_pending_on_disconnect: self.fail_pending_on_disconnect.unwrap_or(false),
        };

        HubClient::start(self.transport, settings).await
    }
}
