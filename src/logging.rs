//! Log level selection and subscriber setup.

use std::fmt;
use std::str::FromStr;

use crate::RpcError;

/// Verbosity for the crate's log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    /// No output at all.
    Silent,
}

impl LogLevel {
    /// `EnvFilter` directive for this level, or `None` for [`LogLevel::Silent`].
    pub fn directive(self) -> Option<&'static str> {
        match self {
            LogLevel::Debug => Some("debug"),
            LogLevel::Info => Some("info"),
            LogLevel::Warn => Some("warn"),
            LogLevel::Error => Some("error"),
            LogLevel::Silent => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive().unwrap_or("silent"))
    }
}

impl FromStr for LogLevel {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" | "off" | "none" => Ok(LogLevel::Silent),
            other => Err(RpcError::InvalidConfig(format!("unknown log level {other:?}"))),
        }
    }
}

/// Install a `tracing-subscriber` fmt subscriber at `level`.
///
/// `RUST_LOG`, when set, overrides `level`. [`LogLevel::Silent`] installs
/// nothing. Calling this after a global subscriber is already set is a no-op.
///
/// [`HubClient::connect`](crate::HubClient::connect) calls this with the
/// configured level.
#[cfg(feature = "logging")]
pub fn init_logging(level: LogLevel) {
    // ---
    let Some(filter) = env_filter(level, std::env::var("RUST_LOG").ok()) else {
        return;
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Filter for `level`, with `env_override` taking precedence when it parses.
#[cfg(feature = "logging")]
fn env_filter(level: LogLevel, env_override: Option<String>) -> Option<tracing_subscriber::EnvFilter> {
    // ---
    use tracing_subscriber::EnvFilter;

    let directive = level.directive()?;
    let filter = env_override
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(directive));
    Some(filter)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_parse_levels() {
        // ---
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("silent".parse::<LogLevel>().unwrap(), LogLevel::Silent);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_silent_has_no_directive() {
        assert_eq!(LogLevel::Silent.directive(), None);
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[cfg(feature = "logging")]
    #[test]
    fn test_filter_follows_configured_level() {
        // ---
        use tracing_subscriber::filter::LevelFilter;

        let hint = |level, env: Option<&str>| {
            env_filter(level, env.map(String::from)).map(|f| f.max_level_hint())
        };

        assert_eq!(hint(LogLevel::Silent, None), None);
        assert_eq!(hint(LogLevel::Silent, Some("debug")), None);
        assert_eq!(hint(LogLevel::Debug, None), Some(Some(LevelFilter::DEBUG)));
        assert_eq!(hint(LogLevel::Warn, None), Some(Some(LevelFilter::WARN)));

        // RUST_LOG wins over the configured level.
        assert_eq!(hint(LogLevel::Debug, Some("error")), Some(Some(LevelFilter::ERROR)));
    }
}
