//! The broker: one token, one FIFO queue, three surfaces.
//!
//! Every operation against the surfaces first obtains the token. A request
//! that finds the token free takes it at once; otherwise it joins the
//! [`WaitQueue`] and is woken when everything ahead of it has been served.
//! The only exception is the current session owner, who shares its own token
//! (see [`AccessToken::admits`]).
//!
//! Grants are RAII values: dropping a [`Grant`] releases one level of the
//! token, so release happens on every exit path, including errors, panics
//! and aborted tasks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::adapter::{Surfaces, WriteOptions};
use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::queue::{Request, RequestId, WaitQueue};
use crate::session::{Session, SessionOptions};
use crate::task::{TaskId, TaskScope};
use crate::token::{AccessKind, AccessToken, HolderInfo};

/// Shared mutable coordination state. Only touched under the state lock.
#[derive(Debug, Default)]
struct BrokerState {
    holder: Option<AccessToken>,
    queue: WaitQueue,
    next_request: u64,
}

impl BrokerState {
    fn next_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId::new(self.next_request)
    }

    /// Hand the free token to the oldest waiter that is still listening.
    fn grant_next(&mut self) {
        debug_assert!(self.holder.is_none(), "grant_next with a live holder");
        while let Some(Request {
            id,
            requester,
            kind,
            notify,
        }) = self.queue.pop_front()
        {
            if notify.send(()).is_ok() {
                debug!(
                    task = %requester,
                    %kind,
                    request = %id,
                    queued = self.queue.len(),
                    "Access granted from queue"
                );
                self.holder = Some(AccessToken::new(id, requester, kind));
                return;
            }
            warn!(task = %requester, request = %id, "Waiter gone before grant, skipping");
        }
    }

    /// Drop one level of the token created by `grant`.
    fn release(&mut self, grant: RequestId, task: TaskId) {
        let Some(token) = self.holder.as_mut() else {
            error!(%task, request = %grant, "Release with no live token");
            debug_assert!(self.holder.is_some(), "release with no live token");
            return;
        };
        if token.grant != grant || token.holder != task {
            error!(
                %task,
                holder = %token.holder,
                request = %grant,
                "Release by a task that does not hold the token"
            );
            debug_assert!(
                token.grant == grant && token.holder == task,
                "release by non-holder"
            );
            return;
        }

        token.depth -= 1;
        if token.depth > 0 {
            debug!(%task, depth = token.depth, "Nested access released");
            return;
        }

        self.holder = None;
        debug!(%task, request = %grant, queued = self.queue.len(), "Access released");
        self.grant_next();
    }
}

/// Queue occupancy and current holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerStats {
    /// Requests waiting for the token.
    pub queued: usize,
    pub holder: Option<HolderInfo>,
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    surfaces: tokio::sync::Mutex<Surfaces>,
    config: BrokerConfig,
}

/// Coordinates access to the output, error and input surfaces.
///
/// Cheap to clone; clones share the same token and queue. Operations called
/// directly on the broker run under a fresh task identity each time, so they
/// never reenter a session: use [`Broker::task`] or [`Session::task`] for
/// that.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("stats", &self.stats())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Broker {
    pub fn new(surfaces: Surfaces, config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                surfaces: tokio::sync::Mutex::new(surfaces),
                config,
            }),
        }
    }

    /// Broker over the process standard streams.
    pub fn stdio(config: BrokerConfig) -> Self {
        Self::new(Surfaces::stdio(), config)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// A handle for a new logical task.
    pub fn task(&self) -> TaskScope {
        TaskScope::new(self.clone(), TaskId::next())
    }

    pub fn stats(&self) -> BrokerStats {
        let state = self.lock_state();
        BrokerStats {
            queued: state.queue.len(),
            holder: state.holder.as_ref().map(AccessToken::info),
        }
    }

    pub async fn write_with(&self, text: &str, options: WriteOptions) -> Result<()> {
        self.task().write_with(text, options).await
    }

    pub async fn write(&self, text: &str) -> Result<()> {
        self.task().write(text).await
    }

    pub async fn write_line(&self, text: &str) -> Result<()> {
        self.task().write_line(text).await
    }

    pub async fn write_error(&self, text: &str) -> Result<()> {
        self.task().write_error(text).await
    }

    pub async fn write_error_line(&self, text: &str) -> Result<()> {
        self.task().write_error_line(text).await
    }

    pub async fn read_line(&self) -> Result<String> {
        self.task().read_line().await
    }

    pub async fn read_char(&self) -> Result<char> {
        self.task().read_char().await
    }

    pub async fn read(&self, n: usize) -> Result<String> {
        self.task().read(n).await
    }

    pub async fn read_buffered(&self) -> Result<String> {
        self.task().read_buffered().await
    }

    pub async fn flush(&self, output: bool, error: bool) -> Result<()> {
        self.task().flush(output, error).await
    }

    pub async fn prompt(&self, text: &str) -> Result<String> {
        self.task().prompt(text).await
    }

    pub async fn password(&self, prompt: &str) -> Result<String> {
        self.task().password(prompt).await
    }

    /// Open a session for a new logical task.
    pub async fn open_session(&self, options: SessionOptions) -> Result<Session> {
        self.task().open_session(options).await
    }

    fn lock_state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) async fn surfaces(&self) -> tokio::sync::MutexGuard<'_, Surfaces> {
        self.inner.surfaces.lock().await
    }

    /// Obtain the token for `task`, waiting in line if someone else has it.
    ///
    /// Cancel-safe: dropping the returned future before it resolves removes
    /// the request from the queue, or hands the token on if it was granted
    /// in the meantime.
    pub(crate) async fn acquire(&self, task: TaskId, kind: AccessKind) -> Result<Grant> {
        let (id, granted) = {
            let mut state = self.lock_state();

            if state.holder.is_none() {
                debug_assert!(state.queue.is_empty(), "free token with waiters");
                let id = state.next_id();
                state.holder = Some(AccessToken::new(id, task, kind));
                debug!(%task, %kind, request = %id, "Access granted immediately");
                return Ok(Grant::new(self.clone(), id, task, false));
            }

            if let Some(token) = state.holder.as_mut().filter(|t| t.admits(task)) {
                token.depth += 1;
                debug!(%task, %kind, depth = token.depth, "Reentrant access granted");
                return Ok(Grant::new(self.clone(), token.grant, task, true));
            }

            let id = state.next_id();
            let (notify, granted) = oneshot::channel();
            state.queue.push(Request {
                id,
                requester: task,
                kind,
                notify,
            });
            debug!(
                %task,
                %kind,
                request = %id,
                position = state.queue.len(),
                "Access request queued"
            );
            (id, granted)
        };

        let mut waiter = Waiter {
            broker: self,
            id,
            task,
            armed: true,
        };
        granted.await.map_err(|_| Error::Abandoned)?;
        waiter.armed = false;
        Ok(Grant::new(self.clone(), id, task, false))
    }

    fn release(&self, grant: RequestId, task: TaskId) {
        self.lock_state().release(grant, task);
    }
}

/// Cleans up after an `acquire` future that never observed its grant.
struct Waiter<'a> {
    broker: &'a Broker,
    id: RequestId,
    task: TaskId,
    armed: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.broker.lock_state();
        if state.queue.remove(self.id).is_some() {
            debug!(task = %self.task, request = %self.id, "Queued access request cancelled");
            return;
        }
        if state.holder.as_ref().is_some_and(|t| t.grant == self.id) {
            debug!(
                task = %self.task,
                request = %self.id,
                "Grant arrived after cancellation, passing it on"
            );
            state.release(self.id, self.task);
        }
    }
}

/// One live acquisition of the token. Dropping it releases that acquisition.
#[derive(Debug)]
pub(crate) struct Grant {
    broker: Broker,
    id: RequestId,
    task: TaskId,
    reentrant: bool,
}

impl Grant {
    const fn new(broker: Broker, id: RequestId, task: TaskId, reentrant: bool) -> Self {
        Self {
            broker,
            id,
            task,
            reentrant,
        }
    }

    /// Whether this acquisition shares a token its task already held.
    pub const fn is_reentrant(&self) -> bool {
        self.reentrant
    }
}

impl Drop for Grant {
    fn drop(&mut self) {
        self.broker.release(self.id, self.task);
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::adapter::{InputAdapter, OutputAdapter, SharedBuffer};

    fn broker() -> Broker {
        Broker::new(
            Surfaces::new(
                OutputAdapter::new(SharedBuffer::new()),
                OutputAdapter::new(SharedBuffer::new()),
                InputAdapter::new(tokio::io::empty()),
            ),
            BrokerConfig::default(),
        )
    }

    async fn wait_for_queued(broker: &Broker, n: usize) {
        while broker.stats().queued != n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn free_token_is_granted_immediately() {
        let broker = broker();
        let task = TaskId::next();

        let grant = broker.acquire(task, AccessKind::Bare).await.unwrap();
        let stats = broker.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.holder.unwrap().task, task);
        assert!(!grant.is_reentrant());

        drop(grant);
        assert_eq!(broker.stats().holder, None);
    }

    #[tokio::test]
    async fn session_owner_reenters_without_queueing() {
        let broker = broker();
        let owner = TaskId::next();

        let outer = broker.acquire(owner, AccessKind::Session).await.unwrap();
        let inner = broker.acquire(owner, AccessKind::Bare).await.unwrap();
        assert!(inner.is_reentrant());
        assert_eq!(broker.stats().holder.unwrap().depth, 2);

        drop(inner);
        assert_eq!(broker.stats().holder.unwrap().depth, 1);
        drop(outer);
        assert_eq!(broker.stats().holder, None);
    }

    #[tokio::test]
    async fn waiters_are_granted_in_order() {
        let broker = broker();
        let first = broker
            .acquire(TaskId::next(), AccessKind::Session)
            .await
            .unwrap();

        let mut waiters = Vec::new();
        let mut ids = Vec::new();
        for n in 1..=3 {
            let task = TaskId::next();
            ids.push(task);
            let b = broker.clone();
            waiters.push(tokio::spawn(async move {
                let grant = b.acquire(task, AccessKind::Bare).await.unwrap();
                let holder = b.stats().holder.unwrap().task;
                drop(grant);
                holder
            }));
            wait_for_queued(&broker, n).await;
        }

        drop(first);
        for (waiter, task) in waiters.into_iter().zip(ids) {
            assert_eq!(waiter.await.unwrap(), task);
        }
        assert_eq!(broker.stats().holder, None);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_queue() {
        let broker = broker();
        let held = broker
            .acquire(TaskId::next(), AccessKind::Session)
            .await
            .unwrap();

        let b = broker.clone();
        let waiter =
            tokio::spawn(async move { b.acquire(TaskId::next(), AccessKind::Bare).await });
        wait_for_queued(&broker, 1).await;

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(broker.stats().queued, 0);

        drop(held);
        assert_eq!(broker.stats().holder, None);
    }

    #[tokio::test]
    async fn grant_to_dropped_future_is_passed_on() {
        let broker = broker();
        let held = broker
            .acquire(TaskId::next(), AccessKind::Session)
            .await
            .unwrap();

        let first = TaskId::next();
        let mut pending = Box::pin(broker.acquire(first, AccessKind::Bare));
        // Poll once so the request is queued.
        assert!(poll_once(pending.as_mut()).await.is_none());
        assert_eq!(broker.stats().queued, 1);

        drop(held);
        // The grant was sent but never observed.
        assert_eq!(broker.stats().holder.unwrap().task, first);
        drop(pending);
        assert_eq!(broker.stats().holder, None);
    }

    async fn poll_once<F: std::future::Future + Unpin>(fut: F) -> Option<F::Output> {
        let mut fut = fut;
        std::future::poll_fn(|cx| {
            std::task::Poll::Ready(match std::pin::Pin::new(&mut fut).poll(cx) {
                std::task::Poll::Ready(out) => Some(out),
                std::task::Poll::Pending => None,
            })
        })
        .await
    }
}
