//! Sessions: exclusive access held across many operations.
//!
//! A [`Session`] owns one acquisition of the broker's token. Its I/O goes
//! straight to the surfaces without touching the queue, so everything it
//! writes and reads appears contiguously with respect to other tasks.
//!
//! The token is released when the session is closed or dropped, whichever
//! comes first. Sessions opened by the owner while it already holds one are
//! nested: they share the token, and the token is only released once the
//! last handle of the owner is gone.

use std::sync::Arc;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::debug;

use crate::adapter::{InputAdapter, OutputAdapter, Target, WriteOptions};
use crate::broker::{Broker, Grant};
use crate::error::{Error, Result};
use crate::task::{TaskId, TaskScope};
use crate::token::AccessKind;

type Shared<T> = Arc<Mutex<T>>;

fn shared<T>(adapter: T) -> Shared<T> {
    Arc::new(Mutex::new(adapter))
}

/// Options for [`Broker::open_session`] and friends.
///
/// Unset fields are inherited: from the parent session when nested, else
/// from the broker.
#[derive(Debug, Default)]
pub struct SessionOptions {
    /// Flush after every write. `None` inherits the parent session's flag
    /// when nested, else the broker's `session_autoflush`.
    pub autoflush: Option<bool>,
    /// Replaces the output surface for this session and its nested ones.
    pub output: Option<OutputAdapter>,
    /// Replaces the error surface for this session and its nested ones.
    pub error: Option<OutputAdapter>,
    /// Replaces the input surface for this session and its nested ones.
    pub input: Option<InputAdapter>,
}

impl SessionOptions {
    pub const fn autoflush(autoflush: bool) -> Self {
        Self {
            autoflush: Some(autoflush),
            output: None,
            error: None,
            input: None,
        }
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputAdapter) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: OutputAdapter) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: InputAdapter) -> Self {
        self.input = Some(input);
        self
    }

    /// Settle the autoflush flag and surfaces against what the new session
    /// would otherwise inherit.
    pub(crate) fn resolve(
        self,
        autoflush: bool,
        inherited: &SessionStreams,
    ) -> (bool, SessionStreams) {
        let streams = SessionStreams {
            output: self.output.map(shared).or_else(|| inherited.output.clone()),
            error: self.error.map(shared).or_else(|| inherited.error.clone()),
            input: self.input.map(shared).or_else(|| inherited.input.clone()),
        };
        (self.autoflush.unwrap_or(autoflush), streams)
    }
}

/// Surfaces a session uses in place of the broker's. Nested sessions share
/// their parent's.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionStreams {
    output: Option<Shared<OutputAdapter>>,
    error: Option<Shared<OutputAdapter>>,
    input: Option<Shared<InputAdapter>>,
}

impl SessionStreams {
    const fn output_for(&self, target: Target) -> Option<&Shared<OutputAdapter>> {
        match target {
            Target::Output => self.output.as_ref(),
            Target::Error => self.error.as_ref(),
        }
    }
}

/// Exclusive access to all three surfaces until closed.
///
/// Not `Clone`, and all I/O takes `&mut self`: a session has exactly one
/// user. To let helpers deeper in the call chain write while the session is
/// open, hand them [`Session::task`] or a nested session.
#[derive(Debug)]
pub struct Session {
    broker: Broker,
    owner: TaskId,
    grant: Option<Grant>,
    nested: bool,
    autoflush: bool,
    streams: SessionStreams,
}

impl Session {
    pub(crate) fn new(
        broker: Broker,
        owner: TaskId,
        grant: Grant,
        autoflush: bool,
        streams: SessionStreams,
    ) -> Self {
        Self {
            broker,
            owner,
            nested: grant.is_reentrant(),
            grant: Some(grant),
            autoflush,
            streams,
        }
    }

    pub const fn owner(&self) -> TaskId {
        self.owner
    }

    /// Whether this handle shares a token its owner already held.
    pub const fn is_nested(&self) -> bool {
        self.nested
    }

    pub const fn is_closed(&self) -> bool {
        self.grant.is_none()
    }

    pub const fn autoflush(&self) -> bool {
        self.autoflush
    }

    pub const fn set_autoflush(&mut self, autoflush: bool) {
        self.autoflush = autoflush;
    }

    /// A task handle carrying this session's owner identity.
    ///
    /// Bare calls and sessions opened through it reenter this session
    /// instead of queueing behind it. They use the broker's surfaces, not
    /// this session's replacements.
    pub fn task(&self) -> TaskScope {
        TaskScope::new(self.broker.clone(), self.owner)
    }

    /// Open a nested session sharing this session's token, flush flag and
    /// surfaces unless `options` replaces them.
    pub async fn open_session(&self, options: SessionOptions) -> Result<Self> {
        self.ensure_open()?;
        let (autoflush, streams) = options.resolve(self.autoflush, &self.streams);
        let grant = self.broker.acquire(self.owner, AccessKind::Session).await?;
        debug!(task = %self.owner, nested = grant.is_reentrant(), autoflush, "Session opened");
        Ok(Self::new(
            self.broker.clone(),
            self.owner,
            grant,
            autoflush,
            streams,
        ))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.grant.is_none() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    async fn output_surface(&self, target: Target) -> MappedMutexGuard<'_, OutputAdapter> {
        match self.streams.output_for(target) {
            Some(output) => MutexGuard::map(output.lock().await, |o| o),
            None => MutexGuard::map(self.broker.surfaces().await, |s| s.output_mut(target)),
        }
    }

    async fn input_surface(&self) -> MappedMutexGuard<'_, InputAdapter> {
        match &self.streams.input {
            Some(input) => MutexGuard::map(input.lock().await, |i| i),
            None => MutexGuard::map(self.broker.surfaces().await, |s| &mut s.input),
        }
    }

    /// One write; `options.autoflush` overrides the session's flag.
    pub async fn write_with(&mut self, text: &str, options: WriteOptions) -> Result<()> {
        self.ensure_open()?;
        let autoflush = options.autoflush.unwrap_or(self.autoflush);
        self.output_surface(options.target)
            .await
            .emit(text, options.newline, autoflush)
            .await
    }

    pub async fn write(&mut self, text: &str) -> Result<()> {
        self.write_with(text, WriteOptions::new(Target::Output)).await
    }

    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        self.write_with(text, WriteOptions::new(Target::Output).line()).await
    }

    pub async fn write_error(&mut self, text: &str) -> Result<()> {
        self.write_with(text, WriteOptions::new(Target::Error)).await
    }

    pub async fn write_error_line(&mut self, text: &str) -> Result<()> {
        self.write_with(text, WriteOptions::new(Target::Error).line()).await
    }

    pub async fn read_line(&mut self) -> Result<String> {
        self.ensure_open()?;
        self.input_surface().await.read_line().await
    }

    pub async fn read_char(&mut self) -> Result<char> {
        self.ensure_open()?;
        self.input_surface().await.read_char().await
    }

    pub async fn read(&mut self, n: usize) -> Result<String> {
        self.ensure_open()?;
        self.input_surface().await.read(n).await
    }

    pub async fn read_buffered(&mut self) -> Result<String> {
        self.ensure_open()?;
        self.input_surface().await.read_buffered().await
    }

    pub async fn flush(&mut self, output: bool, error: bool) -> Result<()> {
        self.ensure_open()?;
        if output {
            self.output_surface(Target::Output).await.flush().await?;
        }
        if error {
            self.output_surface(Target::Error).await.flush().await?;
        }
        Ok(())
    }

    pub async fn prompt(&mut self, text: &str) -> Result<String> {
        self.ensure_open()?;
        self.output_surface(Target::Output)
            .await
            .emit(text, false, true)
            .await?;
        self.input_surface().await.read_line().await
    }

    /// Show `prompt` on the error surface and read a secret without echo.
    pub async fn password(&mut self, prompt: &str) -> Result<String> {
        self.ensure_open()?;
        self.output_surface(Target::Error)
            .await
            .emit(prompt, false, true)
            .await?;
        self.input_surface().await.read_password().await
    }

    /// Release this handle's hold on the token. Idempotent.
    pub fn close(&mut self) {
        if let Some(grant) = self.grant.take() {
            debug!(task = %self.owner, nested = self.nested, "Session closed");
            drop(grant);
        }
    }
}
