//! Process-wide default broker and module-level shortcuts.
//!
//! The default broker is bound to the process standard streams on first use.
//! Binaries that want a configured broker call [`install`] before any other
//! function here. Code that needs isolation (tests, embedding) should build
//! its own [`Broker`] instead.

use std::sync::OnceLock;

use crate::adapter::WriteOptions;
use crate::broker::Broker;
use crate::config::BrokerConfig;
use crate::error::Result;
use crate::session::{Session, SessionOptions};

static BROKER: OnceLock<Broker> = OnceLock::new();

/// The process-wide broker, created over stdio with default config if
/// nothing was installed.
pub fn broker() -> &'static Broker {
    BROKER.get_or_init(|| Broker::stdio(BrokerConfig::default()))
}

/// Install `broker` as the process-wide broker.
///
/// Returns it back if a broker was already installed or created.
pub fn install(broker: Broker) -> std::result::Result<(), Broker> {
    BROKER.set(broker)
}

pub async fn write_with(text: &str, options: WriteOptions) -> Result<()> {
    broker().write_with(text, options).await
}

pub async fn write(text: &str) -> Result<()> {
    broker().write(text).await
}

pub async fn write_line(text: &str) -> Result<()> {
    broker().write_line(text).await
}

pub async fn write_error(text: &str) -> Result<()> {
    broker().write_error(text).await
}

pub async fn write_error_line(text: &str) -> Result<()> {
    broker().write_error_line(text).await
}

pub async fn read_line() -> Result<String> {
    broker().read_line().await
}

pub async fn read_char() -> Result<char> {
    broker().read_char().await
}

pub async fn prompt(text: &str) -> Result<String> {
    broker().prompt(text).await
}

pub async fn password(prompt: &str) -> Result<String> {
    broker().password(prompt).await
}

pub async fn open_session(options: SessionOptions) -> Result<Session> {
    broker().open_session(options).await
}
