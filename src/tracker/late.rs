//! Timed-out calls that may still receive a reply.
//!
//! When a call opts in to late replies, the tracker moves it here at timeout
//! instead of forgetting it. A reply that shows up afterwards is handed to
//! the caller's observer as `Ok(LateReply)` or `Err(ErrorBody)`, and the
//! entry is removed. The caller's `PendingReply` has already settled with
//! `REQUEST_TIMEOUT` by then and is not touched again.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::protocol::{RequestPayload, ResponseMessage};
use crate::{log_debug, log_error, CorrelationId, ErrorBody};

/// A reply that arrived after its call timed out.
#[derive(Debug, Clone, PartialEq)]
pub struct LateReply {
    /// The application data from the reply.
    pub response: Value,
    /// The request as originally sent.
    pub original_payload: RequestPayload,
}

/// Observer invoked at most once with the late reply.
pub type LateReplyObserver =
    Box<dyn FnOnce(std::result::Result<LateReply, ErrorBody>) + Send + 'static>;

/// Late-reply settings for one call.
#[derive(Default)]
pub struct LateReplyOptions {
    /// Keep tracking the identity after timeout.
    pub allow: bool,
    /// Notified if a late reply arrives. Ignored unless `allow` is set.
    pub observer: Option<LateReplyObserver>,
}

impl std::fmt::Debug for LateReplyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LateReplyOptions")
            .field("allow", &self.allow)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// What happened to a reply handed to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LateOutcome {
    /// The observer (if any) was notified.
    Delivered,
    /// The entry did not permit late replies; the reply was dropped.
    Discarded,
}

pub(crate) struct TimedOutCall {
    allow_late_response: bool,
    observer: Option<LateReplyObserver>,
    original_payload: RequestPayload,
    eviction: Option<JoinHandle<()>>,
}

impl TimedOutCall {
    // ---
    /// Consume the entry with the reply that finally arrived.
    ///
    /// Never panics and never returns an error; a panicking observer is
    /// caught and logged.
    pub(crate) fn on_reply(self, reply: ResponseMessage) -> LateOutcome {
        // ---
        if let Some(eviction) = &self.eviction {
            eviction.abort();
        }

        if !self.allow_late_response {
            log_debug!("late reply {} discarded, late replies not enabled", reply.id);
            return LateOutcome::Discarded;
        }

        let Some(observer) = self.observer else {
            log_debug!("late reply {} consumed, no observer supplied", reply.id);
            return LateOutcome::Delivered;
        };

        let id = reply.id.clone();
        let original_payload = self.original_payload;
        let outcome = reply
            .into_outcome()
            .map(|response| LateReply {
                response,
                original_payload,
            });

        if catch_unwind(AssertUnwindSafe(move || observer(outcome))).is_err() {
            log_error!("late reply observer for {id} panicked");
        }

        LateOutcome::Delivered
    }
}

/// Table of timed-out calls, keyed by correlation identity.
///
/// Lives inside the tracker's lock next to the pending table; the two are
/// never both holding the same identity.
#[derive(Default)]
pub(crate) struct LateReplySupervisor {
    entries: HashMap<CorrelationId, TimedOutCall>,
}

impl LateReplySupervisor {
    // ---
    pub(crate) fn register(
        &mut self,
        id: CorrelationId,
        allow_late_response: bool,
        observer: Option<LateReplyObserver>,
        original_payload: RequestPayload,
        eviction: Option<JoinHandle<()>>,
    ) {
        // ---
        self.entries.insert(
            id,
            TimedOutCall {
                allow_late_response,
                observer,
                original_payload,
                eviction,
            },
        );
    }

    pub(crate) fn take(&mut self, id: &CorrelationId) -> Option<TimedOutCall> {
        self.entries.remove(id)
    }

    /// Drop an entry whose retention window ran out.
    pub(crate) fn evict(&mut self, id: &CorrelationId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub(crate) fn clear(&mut self) {
        // ---
        for (_, entry) in self.entries.drain() {
            if let Some(eviction) = entry.eviction {
                eviction.abort();
            }
        }
    }

    pub(crate) fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
