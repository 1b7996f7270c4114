use async_trait::async_trait;
use relay_core::MessageEvent;

#[async_trait]
/// The command registry capability consumed by the dispatcher.
///
/// The registry is opaque to the core: the only contract is "attempt to run
/// this event, report whether anything matched" plus the registered count for
/// startup reporting. Command execution may be long-running; the dispatcher
/// isolates it in a per-message task.
pub trait Commands: Send + Sync {
    /// Attempts to execute the event; returns whether any command matched.
    async fn run(&self, event: &MessageEvent) -> bool;

    /// Number of registered commands.
    fn count(&self) -> usize;
}
