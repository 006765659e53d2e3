//! Stream adapters for the three brokered surfaces.
//!
//! [`OutputAdapter`] and [`InputAdapter`] wrap any tokio byte stream. They do
//! no coordination of their own: every call reaches them through the broker,
//! which guarantees a single holder at a time.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Error, Result};

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;

/// Which output surface a write targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Target {
    /// Standard output.
    #[default]
    Output,
    /// Standard error.
    Error,
}

/// How a single write is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub target: Target,
    /// Append a newline.
    pub newline: bool,
    /// Flush (or not) regardless of the caller's autoflush setting.
    pub autoflush: Option<bool>,
}

impl WriteOptions {
    pub const fn new(target: Target) -> Self {
        Self {
            target,
            newline: false,
            autoflush: None,
        }
    }

    pub const fn line(mut self) -> Self {
        self.newline = true;
        self
    }

    pub const fn flush(mut self, autoflush: bool) -> Self {
        self.autoflush = Some(autoflush);
        self
    }
}

/// Writable surface.
pub struct OutputAdapter {
    sink: BoxedWrite,
}

impl OutputAdapter {
    pub fn new(sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    /// Adapter over the process standard output.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Adapter over the process standard error.
    pub fn stderr() -> Self {
        Self::new(tokio::io::stderr())
    }

    pub async fn write(&mut self, text: &str) -> Result<()> {
        self.sink.write_all(text.as_bytes()).await?;
        Ok(())
    }

    /// Write `text` followed by a newline in a single call.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.write(&line).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.sink.flush().await?;
        Ok(())
    }

    /// One write, optionally newline-terminated and flushed.
    pub(crate) async fn emit(&mut self, text: &str, newline: bool, autoflush: bool) -> Result<()> {
        if newline {
            self.write_line(text).await?;
        } else {
            self.write(text).await?;
        }
        if autoflush {
            self.flush().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for OutputAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputAdapter").finish_non_exhaustive()
    }
}

/// Where [`InputAdapter::read_password`] takes secrets from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecretInput {
    /// The next line of the adapter's own source.
    #[default]
    Source,
    /// The controlling terminal, with echo disabled.
    Terminal,
}

/// Readable surface.
///
/// Input is pulled one physical line at a time into a carry-over buffer;
/// character and partial reads consume from that buffer before touching the
/// source again.
pub struct InputAdapter {
    source: BufReader<BoxedRead>,
    buffer: String,
    secrets: SecretInput,
}

impl InputAdapter {
    pub fn new(source: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            source: BufReader::new(Box::new(source)),
            buffer: String::new(),
            secrets: SecretInput::Source,
        }
    }

    /// Adapter over the process standard input. Passwords are read from the
    /// terminal.
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin()).with_secret_input(SecretInput::Terminal)
    }

    #[must_use]
    pub fn with_secret_input(mut self, secrets: SecretInput) -> Self {
        self.secrets = secrets;
        self
    }

    /// Refill the buffer from the source if it is empty.
    async fn fill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            let read = self.source.read_line(&mut self.buffer).await?;
            if read == 0 {
                return Err(Error::Closed);
            }
        }
        Ok(())
    }

    /// Next line, including its trailing `\n` when the source provided one.
    pub async fn read_line(&mut self) -> Result<String> {
        self.fill().await?;
        let end = self.buffer.find('\n').map_or(self.buffer.len(), |i| i + 1);
        Ok(self.buffer.drain(..end).collect())
    }

    pub async fn read_char(&mut self) -> Result<char> {
        self.fill().await?;
        let ch = self.buffer.chars().next().ok_or(Error::Closed)?;
        self.buffer.drain(..ch.len_utf8());
        Ok(ch)
    }

    /// Up to `n` characters of the current line.
    pub async fn read(&mut self, n: usize) -> Result<String> {
        if n == 0 {
            return Ok(String::new());
        }
        self.fill().await?;
        let end = self
            .buffer
            .char_indices()
            .nth(n)
            .map_or(self.buffer.len(), |(i, _)| i);
        Ok(self.buffer.drain(..end).collect())
    }

    /// Everything left of the current line.
    pub async fn read_buffered(&mut self) -> Result<String> {
        self.fill().await?;
        Ok(std::mem::take(&mut self.buffer))
    }

    /// Read a secret without its line terminator.
    pub async fn read_password(&mut self) -> Result<String> {
        match self.secrets {
            SecretInput::Terminal => {
                let secret = tokio::task::spawn_blocking(rpassword::read_password)
                    .await
                    .map_err(io::Error::other)??;
                Ok(secret)
            }
            SecretInput::Source => {
                let mut line = self.read_line().await?;
                let len = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(len);
                Ok(line)
            }
        }
    }
}

impl std::fmt::Debug for InputAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputAdapter")
            .field("buffered", &self.buffer.len())
            .field("secrets", &self.secrets)
            .finish_non_exhaustive()
    }
}

/// The three surfaces a broker guards.
#[derive(Debug)]
pub struct Surfaces {
    pub output: OutputAdapter,
    pub error: OutputAdapter,
    pub input: InputAdapter,
}

impl Surfaces {
    pub const fn new(output: OutputAdapter, error: OutputAdapter, input: InputAdapter) -> Self {
        Self {
            output,
            error,
            input,
        }
    }

    /// Bind the process standard streams.
    pub fn stdio() -> Self {
        Self::new(
            OutputAdapter::stdout(),
            OutputAdapter::stderr(),
            InputAdapter::stdin(),
        )
    }

    pub const fn output_mut(&mut self, target: Target) -> &mut OutputAdapter {
        match target {
            Target::Output => &mut self.output,
            Target::Error => &mut self.error,
        }
    }

    /// One write against `target`, optionally newline-terminated and flushed.
    pub(crate) async fn write(
        &mut self,
        target: Target,
        text: &str,
        newline: bool,
        autoflush: bool,
    ) -> Result<()> {
        self.output_mut(target).emit(text, newline, autoflush).await
    }

    /// Flush the selected output surfaces.
    pub(crate) async fn flush(&mut self, output: bool, error: bool) -> Result<()> {
        if output {
            self.output.flush().await?;
        }
        if error {
            self.error.flush().await?;
        }
        Ok(())
    }

    /// Write `text`, flush it, then read the answer line.
    pub(crate) async fn prompt(&mut self, text: &str) -> Result<String> {
        self.write(Target::Output, text, false, true).await?;
        self.input.read_line().await
    }

    /// Show `prompt` on the error surface, then read a secret.
    pub(crate) async fn password(&mut self, prompt: &str) -> Result<String> {
        self.write(Target::Error, prompt, false, true).await?;
        self.input.read_password().await
    }
}

/// Clonable in-memory sink; every clone appends to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        let bytes = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Return the contents and clear the buffer.
    pub fn take(&self) -> String {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let bytes = std::mem::take(&mut *guard);
        drop(guard);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
