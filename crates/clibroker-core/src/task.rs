//! Explicit task identity.
//!
//! Reentrancy is decided by comparing a request's [`TaskId`] with the
//! current session holder's. Identities are never inferred from the
//! executing tokio task or thread; code that wants to reenter its own session
//! passes a [`TaskScope`] (or the [`Session`] itself) down the call chain.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::adapter::{Target, WriteOptions};
use crate::broker::{Broker, Grant};
use crate::error::Result;
use crate::session::{Session, SessionOptions, SessionStreams};
use crate::token::AccessKind;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one logical task (call chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocate a fresh, process-unique identity.
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A broker handle bound to one task identity.
///
/// Every operation is issued as that task. While the task owns a session,
/// calls through its scope share the session's token instead of queueing
/// behind it.
#[derive(Debug, Clone)]
pub struct TaskScope {
    broker: Broker,
    id: TaskId,
}

impl TaskScope {
    pub(crate) const fn new(broker: Broker, id: TaskId) -> Self {
        Self { broker, id }
    }

    pub const fn id(&self) -> TaskId {
        self.id
    }

    pub const fn broker(&self) -> &Broker {
        &self.broker
    }

    async fn acquire(&self, kind: AccessKind) -> Result<Grant> {
        self.broker.acquire(self.id, kind).await
    }

    /// One write; `options.autoflush` overrides the broker's `autoflush`.
    pub async fn write_with(&self, text: &str, options: WriteOptions) -> Result<()> {
        let _grant = self.acquire(AccessKind::Bare).await?;
        let autoflush = options.autoflush.unwrap_or(self.broker.config().autoflush);
        self.broker
            .surfaces()
            .await
            .write(options.target, text, options.newline, autoflush)
            .await
    }

    pub async fn write(&self, text: &str) -> Result<()> {
        self.write_with(text, WriteOptions::new(Target::Output)).await
    }

    pub async fn write_line(&self, text: &str) -> Result<()> {
        self.write_with(text, WriteOptions::new(Target::Output).line()).await
    }

    pub async fn write_error(&self, text: &str) -> Result<()> {
        self.write_with(text, WriteOptions::new(Target::Error)).await
    }

    pub async fn write_error_line(&self, text: &str) -> Result<()> {
        self.write_with(text, WriteOptions::new(Target::Error).line()).await
    }

    /// Read one line, including its trailing newline if any.
    ///
    /// Fails with [`Error::Closed`](crate::Error::Closed) at end of input.
    pub async fn read_line(&self) -> Result<String> {
        let _grant = self.acquire(AccessKind::Bare).await?;
        self.broker.surfaces().await.input.read_line().await
    }

    pub async fn read_char(&self) -> Result<char> {
        let _grant = self.acquire(AccessKind::Bare).await?;
        self.broker.surfaces().await.input.read_char().await
    }

    /// Read up to `n` characters of the current input line.
    pub async fn read(&self, n: usize) -> Result<String> {
        let _grant = self.acquire(AccessKind::Bare).await?;
        self.broker.surfaces().await.input.read(n).await
    }

    /// Drain the rest of the current input line.
    pub async fn read_buffered(&self) -> Result<String> {
        let _grant = self.acquire(AccessKind::Bare).await?;
        self.broker.surfaces().await.input.read_buffered().await
    }

    pub async fn flush(&self, output: bool, error: bool) -> Result<()> {
        let _grant = self.acquire(AccessKind::Bare).await?;
        self.broker.surfaces().await.flush(output, error).await
    }

    /// Write `text`, flush, and read the reply line as one operation.
    pub async fn prompt(&self, text: &str) -> Result<String> {
        let _grant = self.acquire(AccessKind::Bare).await?;
        self.broker.surfaces().await.prompt(text).await
    }

    /// Show `prompt` on the error surface and read a secret without echo.
    pub async fn password(&self, prompt: &str) -> Result<String> {
        let _grant = self.acquire(AccessKind::Bare).await?;
        self.broker.surfaces().await.password(prompt).await
    }

    /// Open a session as this task.
    ///
    /// Waits in line unless this task already owns the current session, in
    /// which case the new handle is nested inside it.
    pub async fn open_session(&self, options: SessionOptions) -> Result<Session> {
        let (autoflush, streams) = options.resolve(
            self.broker.config().session_autoflush,
            &SessionStreams::default(),
        );
        let grant = self.acquire(AccessKind::Session).await?;
        debug!(task = %self.id, nested = grant.is_reentrant(), autoflush, "Session opened");
        Ok(Session::new(
            self.broker.clone(),
            self.id,
            grant,
            autoflush,
            streams,
        ))
    }
}
