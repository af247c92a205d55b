//! Public client configuration.
//!
//! This type contains no transport-specific concepts. The hub URL scheme
//! selects a transport in [`create_transport`](crate::create_transport);
//! everything else configures the client itself.

use std::env;
use std::time::Duration;

use crate::logging::LogLevel;
use crate::{Result, RpcError};

/// Default reply window for a call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5000);

/// Default time a timed-out call keeps waiting for a late reply.
pub const DEFAULT_LATE_REPLY_RETENTION: Duration = Duration::from_secs(60);

/// Client configuration and connection parameters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // ---
    /// Hub URL. `memory://` selects the in-process hub.
    pub hub_url: String,

    /// Name this client registers under at the hub.
    pub service_name: String,

    /// How long a call waits for its reply.
    ///
    /// Default: 5 seconds
    pub request_timeout: Duration,

    /// Interval between heartbeats while connected. Zero disables them.
    ///
    /// Default: 5 seconds
    pub heartbeat_interval: Duration,

    /// Log verbosity. [`HubClient::connect`](crate::HubClient::connect)
    /// installs the subscriber at this level.
    ///
    /// Default: info
    pub log_level: LogLevel,

    /// How long a timed-out call that opted in to late replies stays
    /// tracked. `None` keeps it until a reply arrives.
    ///
    /// Default: 60 seconds
    pub late_reply_retention: Option<Duration>,

    /// Fail every pending call with [`RpcError::ConnectionLost`] when the hub
    /// connection drops, instead of letting each one time out.
    ///
    /// Default: false
    pub fail_pending_on_disconnect: bool,
}

impl ClientConfig {
    /// Create a config for `service_name` on the hub at `hub_url`, with all
    /// other settings at their defaults.
    pub fn new(hub_url: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            service_name: service_name.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            log_level: LogLevel::default(),
            late_reply_retention: Some(DEFAULT_LATE_REPLY_RETENTION),
            fail_pending_on_disconnect: false,
        }
    }

    /// Create a config for the process-global in-memory hub.
    pub fn memory(service_name: impl Into<String>) -> Self {
        Self::new("memory://", service_name)
    }

    /// Set the per-call reply window.
    ///
    /// # Example
    ///
    /// ```
    /// use hub_rpc::ClientConfig;
    /// use std::time::Duration;
    ///
    /// let config = ClientConfig::memory("billing")
    ///     .with_request_timeout(Duration::from_secs(10));
    /// ```
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the heartbeat interval. `Duration::ZERO` disables heartbeats.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Bound (or with `None`, unbound) late-reply retention.
    pub fn with_late_reply_retention(mut self, retention: Option<Duration>) -> Self {
        self.late_reply_retention = retention;
        self
    }

    pub fn with_fail_pending_on_disconnect(mut self, enabled: bool) -> Self {
        self.fail_pending_on_disconnect = enabled;
        self
    }

    /// Check that the required fields are present.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.hub_url.trim().is_empty() {
            return Err(RpcError::MissingConfig("hub_url".into()));
        }
        if self.service_name.trim().is_empty() {
            return Err(RpcError::MissingConfig("service_name".into()));
        }
        Ok(())
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HUB_URL`: hub URL (required)
    /// - `SERVICE_NAME`: service name (required)
    /// - `REQUEST_TIMEOUT_MS`: reply window (default: 5000)
    /// - `HEARTBEAT_INTERVAL_MS`: heartbeat interval, 0 or negative disables (default: 5000)
    /// - `LOG_LEVEL`: debug, info, warn, error or silent (default: info)
    /// - `LATE_REPLY_RETENTION_MS`: late-reply retention, 0 means unbounded (default: 60000)
    /// - `FAIL_PENDING_ON_DISCONNECT`: true/false (default: false)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Same keys and rules as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // ---
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| RpcError::MissingConfig(key.to_string()))
        };

        let mut config = Self::new(required("HUB_URL")?, required("SERVICE_NAME")?);

        if let Some(ms) = lookup("REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(parse_millis("REQUEST_TIMEOUT_MS", &ms)?);
        }

        if let Some(ms) = lookup("HEARTBEAT_INTERVAL_MS") {
            let ms: i64 = ms
                .trim()
                .parse()
                .map_err(|_| invalid("HEARTBEAT_INTERVAL_MS", &ms))?;
            config.heartbeat_interval = Duration::from_millis(ms.max(0) as u64);
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level.parse()?;
        }

        if let Some(ms) = lookup("LATE_REPLY_RETENTION_MS") {
            config.late_reply_retention = match parse_millis("LATE_REPLY_RETENTION_MS", &ms)? {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            };
        }

        if let Some(flag) = lookup("FAIL_PENDING_ON_DISCONNECT") {
            config.fail_pending_on_disconnect = match flag.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => return Err(invalid("FAIL_PENDING_ON_DISCONNECT", &flag)),
            };
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> RpcError {
    RpcError::InvalidConfig(format!("{key}={value:?}"))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        // ---
        let config = ClientConfig::memory("billing");
        assert_eq!(config.hub_url, "memory://");
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(5000));
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.late_reply_retention, Some(Duration::from_secs(60)));
        assert!(!config.fail_pending_on_disconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        // ---
        let err = ClientConfig::new("", "billing").validate().unwrap_err();
        assert!(matches!(err, RpcError::MissingConfig(ref f) if f == "hub_url"));

        let err = ClientConfig::new("memory://", "  ").validate().unwrap_err();
        assert!(matches!(err, RpcError::MissingConfig(ref f) if f == "service_name"));
    }

    #[test]
    fn test_from_lookup_full() {
        // ---
        let config = ClientConfig::from_lookup(lookup(&[
            ("HUB_URL", "memory://"),
            ("SERVICE_NAME", "orders"),
            ("REQUEST_TIMEOUT_MS", "250"),
            ("HEARTBEAT_INTERVAL_MS", "1000"),
            ("LOG_LEVEL", "debug"),
            ("LATE_REPLY_RETENTION_MS", "0"),
            ("FAIL_PENDING_ON_DISCONNECT", "true"),
        ]))
        .unwrap();

        assert_eq!(config.service_name, "orders");
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.late_reply_retention, None);
        assert!(config.fail_pending_on_disconnect);
    }

    #[test]
    fn test_negative_heartbeat_disables() {
        // ---
        let config = ClientConfig::from_lookup(lookup(&[
            ("HUB_URL", "memory://"),
            ("SERVICE_NAME", "orders"),
            ("HEARTBEAT_INTERVAL_MS", "-1"),
        ]))
        .unwrap();
        assert_eq!(config.heartbeat_interval, Duration::ZERO);
    }

    #[test]
    fn test_from_lookup_missing_service() {
        // ---
        let err = ClientConfig::from_lookup(lookup(&[("HUB_URL", "memory://")])).unwrap_err();
        assert!(matches!(err, RpcError::MissingConfig(ref k) if k == "SERVICE_NAME"));
    }

    #[test]
    fn test_from_lookup_bad_number() {
        // ---
        let err = ClientConfig::from_lookup(lookup(&[
            ("HUB_URL", "memory://"),
            ("SERVICE_NAME", "orders"),
            ("REQUEST_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, RpcError::InvalidConfig(_)));
    }
}
