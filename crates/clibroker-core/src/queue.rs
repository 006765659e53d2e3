//! FIFO queue of pending access requests.
//!
//! Each waiter parks on its own oneshot channel; the broker grants by firing
//! the channel of the request at the front. Fairness therefore comes from the
//! queue order alone, not from any lock's wake-up policy.

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::oneshot;

use crate::task::TaskId;
use crate::token::AccessKind;

/// Identifies one acquisition request (and the token it turns into).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct RequestId(u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A waiter for the token.
#[derive(Debug)]
pub(crate) struct Request {
    pub id: RequestId,
    pub requester: TaskId,
    pub kind: AccessKind,
    /// Fired exactly once, when the token is handed over.
    pub notify: oneshot::Sender<()>,
}

/// Requests in arrival order; arrival order is grant order.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    requests: VecDeque<Request>,
}

impl WaitQueue {
    pub fn push(&mut self, request: Request) {
        debug_assert!(
            !self.contains(request.id),
            "request {} queued twice",
            request.id
        );
        self.requests.push_back(request);
    }

    pub fn pop_front(&mut self) -> Option<Request> {
        self.requests.pop_front()
    }

    /// Remove a cancelled request, keeping the order of the rest.
    pub fn remove(&mut self, id: RequestId) -> Option<Request> {
        let pos = self.requests.iter().position(|r| r.id == id)?;
        self.requests.remove(pos)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.iter().any(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
