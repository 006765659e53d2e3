//! `CliBroker` demo
//!
//! Runs a prompt session and an unrelated writer side by side so the effect of
//! session grouping is visible on a real terminal.

use clibroker_core::{Broker, Result, SessionOptions};
use tokio::sync::oneshot;
use tracing::info;

/// Greet, then ask for input in a session while another task tries to print.
///
/// Returns the number of characters the user typed, newline included.
pub async fn run(broker: &Broker) -> anyhow::Result<usize> {
    broker.write_line("Hello, world!").await?;

    let (opened_tx, opened_rx) = oneshot::channel();
    let asker = tokio::spawn(ask(broker.clone(), opened_tx));
    let chatter = tokio::spawn(chatter(broker.clone(), opened_rx));

    let count = asker.await??;
    chatter.await??;
    info!(count, "Demo finished");
    Ok(count)
}

async fn ask(broker: Broker, opened: oneshot::Sender<()>) -> Result<usize> {
    let mut session = broker.open_session(SessionOptions::autoflush(true)).await?;
    let _ = opened.send(());

    session.write("Say something: ").await?;
    let answer = match session.read_line().await {
        Ok(answer) => answer,
        Err(e) if e.is_closed() => String::new(),
        Err(e) => return Err(e),
    };
    let count = answer.chars().count();
    session
        .write_line(&format!("Thanks for those {count} characters."))
        .await?;
    Ok(count)
}

/// Prints once the session is open, so its line has to wait.
async fn chatter(broker: Broker, opened: oneshot::Receiver<()>) -> Result<()> {
    let _ = opened.await;
    broker.write_line("Foo").await
}
