//! Channel receive loop.
//!
//! This module provides the glue between an open [`ChannelHandle`] and the
//! roles that react to inbound events (the request tracker, handler dispatch,
//! heartbeat control).
//!
//! The runner is responsible for:
//! - driving a receive loop over the channel inbox
//! - dispatching each [`ChannelEvent`] to the consumer
//! - consolidating logging for consumer failures
//!
//! It does **not** define RPC semantics or impose timeout policy.
//!
//! ## Error handling
//!
//! Errors returned by [`EventConsumer::handle_event`] are best-effort
//! failures: they are logged but do not terminate the loop. One bad message
//! must not take down the client.
//!
//! ## Termination
//!
//! The loop exits when the inbox closes (transport closed, hub dropped the
//! connection) or when the consumer returns [`Flow::Stop`]. The consumer's
//! [`EventConsumer::on_closed`] hook runs exactly once on exit.

use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_warn,
    ChannelEvent,
    ChannelHandle,
    Result,
};

/// Whether the receive loop should keep going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// A consumer of channel events.
///
/// Implementations should assume:
/// - replies may arrive in any order relative to the requests that caused them
/// - a reply may arrive for an identity nobody is waiting on any more
#[async_trait::async_trait]
pub trait EventConsumer: Send + Sync {
    /// Label used in log lines (normally the service name).
    fn label(&self) -> &str;

    /// Handle a single inbound event.
    async fn handle_event(&self, event: ChannelEvent) -> Result<Flow>;

    /// Called once when the loop exits.
    async fn on_closed(&self) {}
}

/// Start the receive loop for `consumer` over `handle`.
///
/// This function does not block. The returned [`JoinHandle`] represents the
/// lifetime of the loop; aborting it stops event processing.
pub fn run<T>(mut handle: ChannelHandle, consumer: T) -> JoinHandle<()>
where
    T: EventConsumer + 'static,
{
    // ---
    tokio::spawn(async move {
        // ---
        while let Some(event) = handle.inbox.recv().await {
            match consumer.handle_event(event).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    log_debug!("{}: receive loop stopped by consumer", consumer.label());
                    break;
                }
                Err(_err) => {
                    log_warn!("{}: event handling error: {_err}", consumer.label());
                }
            }
        }

        log_debug!("{}: channel closed, receive loop exiting", consumer.label());
        consumer.on_closed().await;
    })
}
