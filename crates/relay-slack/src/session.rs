use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use relay_access::DirectorySource;
use relay_core::{Identity, MessageEvent};
use tokio::sync::mpsc;

#[derive(Debug)]
/// Events delivered by the persistent transport to the dispatch loop.
pub enum TransportEvent {
    Message(MessageEvent),
    /// Measured ping/pong round-trip of the persistent socket.
    Latency(Duration),
}

#[async_trait]
/// The transport/session collaborator consumed by the bot core.
///
/// The session object is shared by concurrent pipeline tasks; implementations
/// must tolerate concurrent sends. Reconnection and socket keep-alive are the
/// implementation's responsibility, not the dispatcher's.
pub trait ChatSession: DirectorySource + Send + Sync {
    /// Authenticates the credential and returns the bot's own identity.
    async fn authenticate(&self) -> Result<Identity>;

    /// Starts the persistent connection as a background activity and returns
    /// the stream of transport events. Called once per session.
    async fn connect(&self) -> mpsc::UnboundedReceiver<TransportEvent>;

    async fn join_channel(&self, channel: &str) -> Result<()>;

    /// Best-effort "bot is typing" indicator.
    async fn send_typing(&self, channel: &str) -> Result<()>;

    /// Replies in the channel (and thread, if any) of the original event.
    async fn send_reply(&self, event: &MessageEvent, text: &str) -> Result<()>;

    /// Closes the transport. Idempotent; never blocks indefinitely.
    async fn disconnect(&self) -> Result<()>;
}
