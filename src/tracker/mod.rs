// src/tracker/mod.rs
//! Request correlation and lifecycle tracking.
//!
//! The [`RequestTracker`] owns every call this client is waiting on. It mints
//! correlation identities, arms a per-call timer, and settles each caller's
//! [`PendingReply`] exactly once.
//!
//! # Tables
//!
//! Two tables live behind one mutex:
//!
//! - **pending**: calls awaiting their first reply
//! - **timed out**: calls that timed out but opted in to late replies
//!
//! An identity is in at most one of them at any instant. Every transition
//! (issue, reply, timer expiry, late-reply eviction) is a single short
//! critical section that never awaits.
//!
//! # Races
//!
//! A reply and the timer may fire at nearly the same moment. Whichever one
//! removes the identity from the pending table first wins and settles the
//! call; the other finds nothing. A reply that loses to the timer falls
//! through to the timed-out table (or is logged as unexpected).

mod late;
mod pending;

pub use late::{LateOutcome, LateReply, LateReplyObserver, LateReplyOptions};
pub use pending::PendingReply;

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::{json, Value};

use crate::protocol::{OutboundRequest, RequestPayload, ResponseMessage};
use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    codes,
    log_debug,
    log_warn,
    CorrelationId,
    ErrorBody,
    RpcError,
};

use late::LateReplySupervisor;
use pending::{PendingCall, PendingCalls};

/// What the tracker did with an inbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDisposition {
    /// Matched a pending call and settled it.
    Settled,
    /// Matched a timed-out call.
    Late(LateOutcome),
    /// Matched nothing; logged and dropped.
    Unmatched,
}

/// A freshly issued call.
pub struct IssuedCall {
    /// The request to emit to the hub.
    pub request: OutboundRequest,
    /// Settles when the reply arrives or the timer fires.
    pub reply: PendingReply,
}

#[derive(Default)]
struct CallTables {
    pending: PendingCalls,
    timed_out: LateReplySupervisor,
}

impl CallTables {
    fn in_use(&self, id: &CorrelationId) -> bool {
        self.pending.contains(id) || self.timed_out.contains(id)
    }
}

struct Inner {
    // ---
    service_name: String,
    late_reply_retention: Option<Duration>,
    tables: Mutex<CallTables>,
}

/// Correlates outbound calls with their replies.
///
/// Cheap to clone (internally `Arc`-backed). Each client owns its own
/// tracker; nothing is shared between instances.
#[derive(Clone)]
pub struct RequestTracker {
    inner: Arc<Inner>,
}

impl RequestTracker {
    // ---
    /// Create a tracker.
    ///
    /// `late_reply_retention` bounds how long a timed-out call waits for a
    /// late reply before it is evicted. `None` keeps it until a reply
    /// arrives or the tracker is dropped.
    pub fn new(service_name: impl Into<String>, late_reply_retention: Option<Duration>) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                service_name: service_name.into(),
                late_reply_retention,
                tables: Mutex::new(CallTables::default()),
            }),
        }
    }

    /// Register a call and arm its timer.
    ///
    /// The returned request must then be emitted by the caller. If emission
    /// fails, hand the identity to [`abandon`](Self::abandon).
    ///
    /// Must be called from within a tokio runtime.
    pub fn issue(
        &self,
        target_service: &str,
        event: &str,
        data: Value,
        timeout: Duration,
        late: LateReplyOptions,
    ) -> IssuedCall {
        // ---
        let (request, reply) = {
            let mut tables = lock_ignore_poison(&self.inner.tables);
            let id = CorrelationId::generate_unique(|id| tables.in_use(id));

            let payload = RequestPayload {
                id,
                event: event.to_string(),
                data,
            };
            let request = OutboundRequest {
                target_service: target_service.to_string(),
                payload: payload.clone(),
            };
            let (call, reply) = PendingCall::new(target_service.to_string(), payload, late);
            tables.pending.register(call);
            (request, reply)
        };

        let id = reply.id().clone();
        let timer = self.spawn_timer(id.clone(), timeout);
        if let Err(timer) = lock_ignore_poison(&self.inner.tables).pending.arm(&id, timer) {
            // Already settled between registration and arming.
            timer.abort();
        }

        log_debug!(
            "{}: issued {id} -> {target_service}/{event} (timeout {timeout:?})",
            self.inner.service_name
        );

        IssuedCall { request, reply }
    }

    /// Route an inbound reply to whichever table holds its identity.
    pub fn complete(&self, reply: ResponseMessage) -> ReplyDisposition {
        // ---
        enum Claim {
            Pending(PendingCall),
            Late(late::TimedOutCall),
            Nothing,
        }

        let claim = {
            let mut tables = lock_ignore_poison(&self.inner.tables);
            if let Some(call) = tables.pending.remove(&reply.id) {
                Claim::Pending(call)
            } else if let Some(entry) = tables.timed_out.take(&reply.id) {
                Claim::Late(entry)
            } else {
                Claim::Nothing
            }
        };

        match claim {
            Claim::Pending(call) => {
                log_debug!("{}: reply for {}", self.inner.service_name, reply.id);
                call.settle(reply.into_outcome().map_err(RpcError::Remote));
                ReplyDisposition::Settled
            }
            Claim::Late(entry) => {
                log_debug!("{}: late reply for {}", self.inner.service_name, reply.id);
                ReplyDisposition::Late(entry.on_reply(reply))
            }
            Claim::Nothing => {
                log_warn!(
                    "{}: received unexpected response for request {}",
                    self.inner.service_name,
                    reply.id
                );
                ReplyDisposition::Unmatched
            }
        }
    }

    /// Remove a call whose request could not be emitted and fail it with `err`.
    pub fn abandon(&self, id: &CorrelationId, err: RpcError) {
        // ---
        let call = lock_ignore_poison(&self.inner.tables).pending.remove(id);
        if let Some(call) = call {
            call.settle(Err(err));
        }
    }

    /// Fail every pending call with the error produced by `make_err`.
    ///
    /// Timed-out entries are left alone. Returns the number of calls failed.
    pub fn fail_pending(&self, make_err: impl Fn() -> RpcError) -> usize {
        // ---
        let calls = lock_ignore_poison(&self.inner.tables).pending.drain();
        let count = calls.len();
        for call in calls {
            call.settle(Err(make_err()));
        }
        count
    }

    /// Drop every timed-out entry without notifying observers.
    pub fn clear_timed_out(&self) {
        lock_ignore_poison(&self.inner.tables).timed_out.clear();
    }

    /// Number of calls awaiting their first reply.
    pub fn pending_count(&self) -> usize {
        lock_ignore_poison(&self.inner.tables).pending.len()
    }

    /// Number of timed-out calls still accepting a late reply.
    pub fn timed_out_count(&self) -> usize {
        lock_ignore_poison(&self.inner.tables).timed_out.len()
    }

    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        lock_ignore_poison(&self.inner.tables).pending.contains(id)
    }

    pub fn is_timed_out(&self, id: &CorrelationId) -> bool {
        lock_ignore_poison(&self.inner.tables).timed_out.contains(id)
    }

    fn spawn_timer(&self, id: CorrelationId, timeout: Duration) -> tokio::task::JoinHandle<()> {
        // ---
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            expire(&weak, &id, timeout);
        })
    }
}

/// Timer path: claim the call, park it for late replies if requested, and
/// settle it with `REQUEST_TIMEOUT`.
fn expire(weak: &Weak<Inner>, id: &CorrelationId, timeout: Duration) {
    // ---
    let Some(inner) = weak.upgrade() else {
        return;
    };

    let expired = {
        let mut tables = lock_ignore_poison(&inner.tables);
        tables.pending.remove(id).map(|mut call| {
            let late = std::mem::take(&mut call.late);
            if late.allow {
                let eviction = inner
                    .late_reply_retention
                    .map(|retention| spawn_eviction(weak.clone(), id.clone(), retention));
                tables.timed_out.register(
                    id.clone(),
                    true,
                    late.observer,
                    call.payload.clone(),
                    eviction,
                );
            }
            call
        })
    };

    let Some(call) = expired else {
        return;
    };

    let millis = timeout.as_millis();
    log_warn!(
        "{}: request {id} to {}/{} timed out after {millis}ms",
        inner.service_name,
        call.target_service,
        call.payload.event
    );

    let body = ErrorBody::new(
        codes::REQUEST_TIMEOUT,
        format!(
            "Request to {} timed out after {millis}ms",
            call.target_service
        ),
        Some(json!({
            "targetService": call.target_service,
            "event": call.payload.event,
            "data": call.payload.data,
        })),
    );
    call.settle(Err(RpcError::Timeout(body)));
}

fn spawn_eviction(
    weak: Weak<Inner>,
    id: CorrelationId,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        tokio::time::sleep(retention).await;
        if let Some(inner) = weak.upgrade() {
            if lock_ignore_poison(&inner.tables).timed_out.evict(&id) {
                log_debug!(
                    "{}: evicted timed-out call {id}, no late reply within {retention:?}",
                    inner.service_name
                );
            }
        }
    })
}
