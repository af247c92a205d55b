use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::protocol::RequestPayload;
use crate::tracker::late::LateReplyOptions;
use crate::{CorrelationId, Result, RpcError};

/// A call awaiting its first reply.
///
/// Settling consumes the entry, so the oneshot sender can only ever be used
/// once.
pub(crate) struct PendingCall {
    // ---
    pub(crate) target_service: String,
    pub(crate) payload: RequestPayload,
    pub(crate) late: LateReplyOptions,
    tx: oneshot::Sender<Result<Value>>,
    timer: Option<JoinHandle<()>>,
}

impl PendingCall {
    // ---
    pub(crate) fn new(
        target_service: String,
        payload: RequestPayload,
        late: LateReplyOptions,
    ) -> (Self, PendingReply) {
        // ---
        let (tx, rx) = oneshot::channel();
        let reply = PendingReply {
            id: payload.id.clone(),
            rx,
        };
        let call = Self {
            target_service,
            payload,
            late,
            tx,
            timer: None,
        };
        (call, reply)
    }

    /// Disarm the timer and deliver the outcome to the waiting caller.
    pub(crate) fn settle(mut self, outcome: Result<Value>) {
        // ---
        self.disarm();
        // Receiver dropped means the caller stopped waiting; nothing to do.
        let _ = self.tx.send(outcome);
    }

    pub(crate) fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Tracks calls waiting for replies, keyed by correlation identity.
#[derive(Default)]
pub(crate) struct PendingCalls {
    // ---
    calls: HashMap<CorrelationId, PendingCall>,
}

impl PendingCalls {
    // ---
    pub(crate) fn register(&mut self, call: PendingCall) {
        self.calls.insert(call.payload.id.clone(), call);
    }

    /// Attach the armed timer to a call.
    ///
    /// Returns the handle back when the call already settled, so the caller
    /// can abort it.
    pub(crate) fn arm(
        &mut self,
        id: &CorrelationId,
        timer: JoinHandle<()>,
    ) -> std::result::Result<(), JoinHandle<()>> {
        // ---
        match self.calls.get_mut(id) {
            Some(call) => {
                call.timer = Some(timer);
                Ok(())
            }
            None => Err(timer),
        }
    }

    /// Claim a call. Whoever removes it owns the right to settle it.
    pub(crate) fn remove(&mut self, id: &CorrelationId) -> Option<PendingCall> {
        self.calls.remove(id)
    }

    pub(crate) fn drain(&mut self) -> Vec<PendingCall> {
        self.calls.drain().map(|(_, call)| call).collect()
    }

    pub(crate) fn contains(&self, id: &CorrelationId) -> bool {
        self.calls.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

/// Deferred result of an issued call.
///
/// Resolves exactly once: with the reply data, with the remote error, with a
/// `REQUEST_TIMEOUT` error, or with [`RpcError::ConnectionClosed`] if the
/// owning client went away first.
///
/// Dropping a `PendingReply` does not cancel the call; its timer still runs
/// and cleans up the entry.
#[derive(Debug)]
pub struct PendingReply {
    id: CorrelationId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingReply {
    /// Correlation identity of the call.
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(RpcError::ConnectionClosed)))
    }
}
