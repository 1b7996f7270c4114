//! Connection lifecycle manager and the event dispatch loop.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use relay_access::{sync_directory, AllowListConfig, DirectoryError, DirectorySnapshot};
use relay_core::{
    format_duration, Identity, MessageEvent, DIRECT_MESSAGE_PREFIX, SUBTYPE_BOT_MESSAGE,
};
use relay_slack::{ChatSession, TransportEvent};

use crate::commands::Commands;

const NOT_WHITELISTED_REPLY: &str =
    "Sorry, you are not whitelisted yet. Please ask the relay admin to get access.";
const UNKNOWN_COMMAND_REPLY: &str = "Sorry, I don't understand that command. Try `help`.";

#[derive(Debug, Clone, Default)]
/// Startup configuration consumed by [`Bot::initialize`].
pub struct BotConfig {
    /// Session credential. Initialization fails when empty.
    pub token: String,
    pub allow_list: AllowListConfig,
    /// Channels to join after a successful directory sync, in order.
    pub autojoin_channels: Vec<String>,
    /// When set, the whitelist check is disabled entirely. Test endpoints
    /// only; the flag affects nothing but the whitelist check.
    pub test_endpoint_url: Option<String>,
}

#[derive(Debug, Error)]
/// Startup failures. All variants are fatal and propagate to the process
/// boundary; steady-state per-message failures never surface here.
pub enum InitError {
    #[error("no slack token provided in config")]
    MissingToken,
    #[error("slack authentication failed: {0}")]
    Authentication(anyhow::Error),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("failed to join channel '{channel}': {reason}")]
    ChannelJoin {
        channel: String,
        reason: anyhow::Error,
    },
}

/// The bot core. Exists only in an initialized state: the identity and the
/// directory snapshot are set before construction completes and are immutable
/// afterwards, so the dispatch loop and its spawned pipelines read them
/// without locks.
pub struct Bot {
    inner: Arc<BotInner>,
}

struct BotInner {
    session: Arc<dyn ChatSession>,
    commands: Arc<dyn Commands>,
    identity: Identity,
    directory: Arc<DirectorySnapshot>,
    whitelist_bypass: bool,
}

impl Bot {
    /// Authenticates, starts the persistent transport, syncs the directory,
    /// and joins configured channels. Returns the initialized bot together
    /// with the transport event stream for [`Bot::handle_messages`].
    ///
    /// Auto-join is sequential and aborts on the first failure without
    /// rolling back earlier joins.
    pub async fn initialize(
        config: BotConfig,
        session: Arc<dyn ChatSession>,
        commands: Arc<dyn Commands>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), InitError> {
        if config.token.trim().is_empty() {
            return Err(InitError::MissingToken);
        }

        info!("connecting to slack");
        let identity = session
            .authenticate()
            .await
            .map_err(InitError::Authentication)?;

        let events = session.connect().await;

        let directory = sync_directory(session.as_ref(), &config.allow_list).await?;
        let directory = Arc::new(directory);

        for channel in &config.autojoin_channels {
            session
                .join_channel(channel)
                .await
                .map_err(|reason| InitError::ChannelJoin {
                    channel: channel.clone(),
                    reason,
                })?;
        }
        if !config.autojoin_channels.is_empty() {
            info!(
                channels = config.autojoin_channels.join(", ").as_str(),
                "auto joined channels"
            );
        }

        info!(
            users = directory.users.len(),
            channels = directory.channels.len(),
            "loaded allowed users and channels"
        );
        info!(
            user = identity.user_name.as_str(),
            id = identity.user_id.as_str(),
            "bot user"
        );
        info!(count = commands.count(), "initialized commands");

        let bot = Self {
            inner: Arc::new(BotInner {
                session,
                commands,
                identity,
                directory,
                whitelist_bypass: config
                    .test_endpoint_url
                    .as_deref()
                    .is_some_and(|url| !url.is_empty()),
            }),
        };
        Ok((bot, events))
    }

    /// Closes the transport. Idempotent.
    pub async fn shutdown(&self) {
        if let Err(error) = self.inner.session.disconnect().await {
            debug!(
                error = error.to_string().as_str(),
                "transport disconnect failed"
            );
        }
    }

    /// Per-message gate decision; pure over event content, the bot identity,
    /// and nothing else. See the dispatch loop for where it applies.
    pub fn should_handle(&self, event: &MessageEvent) -> bool {
        self.inner.should_handle(event)
    }

    /// Message normalization applied by the pipeline before authorization:
    /// strips the first mention-token occurrence, maps typographic single
    /// quotes to `'`, and trims surrounding whitespace.
    pub fn trim_message(&self, text: &str) -> String {
        self.inner.trim_message(text)
    }

    /// The dispatch loop. Entered only after successful initialization;
    /// returns on shutdown (terminal, not restartable) or when the transport
    /// stream closes.
    ///
    /// External events are gated and handled in spawned tasks so a slow or
    /// failing command never stalls the loop. Internal events are handled
    /// inline, in strict arrival order, with the allow-list check bypassed;
    /// the asymmetry is a deliberate ordering/priority policy. In-flight
    /// spawned tasks are neither awaited nor cancelled on shutdown.
    pub async fn handle_messages(
        &self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut internal: mpsc::UnboundedReceiver<MessageEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut internal_open = true;
        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(TransportEvent::Message(event)) => {
                        if self.inner.should_handle(&event) {
                            let inner = Arc::clone(&self.inner);
                            tokio::spawn(async move { inner.handle_message(event).await });
                        }
                    }
                    Some(TransportEvent::Latency(latency)) => {
                        debug!(latency = format_duration(latency).as_str(), "current latency");
                    }
                    None => {
                        warn!("transport event stream closed, stopping dispatcher");
                        return;
                    }
                },
                maybe_internal = internal.recv(), if internal_open => {
                    match maybe_internal {
                        Some(mut event) => {
                            event.internal = true;
                            self.inner.handle_message(event).await;
                        }
                        None => internal_open = false,
                    }
                }
                _ = shutdown.changed() => {
                    self.shutdown().await;
                    warn!("shutdown");
                    return;
                }
            }
        }
    }
}

impl BotInner {
    fn should_handle(&self, event: &MessageEvent) -> bool {
        // Exclude all bot traffic, including our own.
        if event.bot_id.as_deref().is_some_and(|id| !id.is_empty()) {
            return false;
        }
        let Some(sender) = event.sender() else {
            return false;
        };
        if sender == self.identity.user_id {
            return false;
        }
        if event.subtype.as_deref() == Some(SUBTYPE_BOT_MESSAGE) {
            return false;
        }

        // Mentioned in a public channel.
        if event.text.contains(&self.identity.mention_token()) {
            return true;
        }

        event.channel.starts_with(DIRECT_MESSAGE_PREFIX)
    }

    fn trim_message(&self, text: &str) -> String {
        text.replacen(&self.identity.mention_token(), "", 1)
            .replace('\u{2018}', "'")
            .replace('\u{2019}', "'")
            .trim()
            .to_string()
    }

    async fn handle_message(&self, mut event: MessageEvent) {
        event.text = self.trim_message(&event.text);
        if event.text.is_empty() {
            // Addressed but empty; not an error condition.
            return;
        }

        let started = Instant::now();

        if let Err(error) = self.session.send_typing(&event.channel).await {
            debug!(
                error = error.to_string().as_str(),
                "typing indicator failed"
            );
        }

        let approved = event
            .sender()
            .is_some_and(|sender| self.directory.is_approved(sender));
        if !approved && !event.internal && !self.whitelist_bypass {
            warn!(
                user = event.sender().unwrap_or_default(),
                text = event.text.as_str(),
                "user is not allowed to execute message"
            );
            if let Err(error) = self.session.send_reply(&event, NOT_WHITELISTED_REPLY).await {
                debug!(
                    error = error.to_string().as_str(),
                    "unauthorized reply failed"
                );
            }
            return;
        }

        if !self.commands.run(&event).await {
            info!(text = event.text.as_str(), "unknown command");
            if let Err(error) = self.session.send_reply(&event, UNKNOWN_COMMAND_REPLY).await {
                debug!(error = error.to_string().as_str(), "fallback reply failed");
            }
        }

        info!(
            text = event.text.as_str(),
            elapsed = format_duration(started.elapsed()).as_str(),
            "handled message"
        );
    }
}
