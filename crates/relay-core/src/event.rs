use serde::{Deserialize, Serialize};

/// Direct-message channel IDs start with this reserved prefix.
pub const DIRECT_MESSAGE_PREFIX: char = 'D';

/// Subtype Slack attaches to messages posted by bots.
pub const SUBTYPE_BOT_MESSAGE: &str = "bot_message";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Normalized inbound chat message as seen by the dispatcher.
pub struct MessageEvent {
    /// Sender user ID; absent for some platform-generated traffic.
    #[serde(default)]
    pub user: Option<String>,
    pub channel: String,
    #[serde(default)]
    pub text: String,
    /// Originating bot ID; non-empty for traffic posted by any bot.
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    /// Set for events injected by the system itself (follow-ups from a
    /// previously executed command). Internal events skip the allow-list.
    #[serde(skip)]
    pub internal: bool,
}

impl MessageEvent {
    /// Returns the sender ID when present and non-empty.
    pub fn sender(&self) -> Option<&str> {
        self.user
            .as_deref()
            .map(str::trim)
            .filter(|user| !user.is_empty())
    }

    pub fn is_direct_message(&self) -> bool {
        self.channel.starts_with(DIRECT_MESSAGE_PREFIX)
    }
}
