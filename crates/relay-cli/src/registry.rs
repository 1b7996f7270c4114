//! Built-in command registry.
//!
//! Relay treats commands as an opaque collaborator; this registry is the
//! small built-in set: `ping` for liveness checks and `delay` as the
//! internal-event producer (a delayed command re-enters the dispatcher
//! through the internal channel, in the original event's context).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use relay_bot::Commands;
use relay_core::MessageEvent;
use relay_slack::ChatSession;

const DELAY_USAGE: &str = "Usage: `delay <seconds> <command>`";

pub struct BuiltinCommands {
    session: Arc<dyn ChatSession>,
    internal_tx: mpsc::UnboundedSender<MessageEvent>,
}

impl BuiltinCommands {
    pub fn new(
        session: Arc<dyn ChatSession>,
        internal_tx: mpsc::UnboundedSender<MessageEvent>,
    ) -> Self {
        Self {
            session,
            internal_tx,
        }
    }

    async fn reply(&self, event: &MessageEvent, text: &str) {
        if let Err(error) = self.session.send_reply(event, text).await {
            debug!(error = error.to_string().as_str(), "command reply failed");
        }
    }

    async fn schedule_delay(&self, event: &MessageEvent, args: &str) {
        let Some((seconds, command)) = args.split_once(' ') else {
            self.reply(event, DELAY_USAGE).await;
            return;
        };
        let Ok(seconds) = seconds.trim().parse::<u64>() else {
            self.reply(event, DELAY_USAGE).await;
            return;
        };
        let command = command.trim();
        if command.is_empty() {
            self.reply(event, DELAY_USAGE).await;
            return;
        }

        self.reply(
            event,
            &format!("Queued `{command}` for execution in {seconds}s."),
        )
        .await;

        // The follow-up keeps the original event context so it posts into
        // the same channel the user addressed.
        let mut follow_up = event.clone();
        follow_up.text = command.to_string();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            let _ = internal_tx.send(follow_up);
        });
    }
}

#[async_trait]
impl Commands for BuiltinCommands {
    async fn run(&self, event: &MessageEvent) -> bool {
        if event.text == "ping" {
            self.reply(event, "pong").await;
            return true;
        }
        if let Some(args) = event.text.strip_prefix("delay ") {
            self.schedule_delay(event, args).await;
            return true;
        }
        false
    }

    fn count(&self) -> usize {
        2
    }
}
