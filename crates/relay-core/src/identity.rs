#[derive(Debug, Clone, PartialEq, Eq)]
/// The bot's own authenticated user, set once during startup and immutable
/// for the process lifetime.
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }

    /// Literal markup Slack inserts when this user is mentioned.
    pub fn mention_token(&self) -> String {
        format!("<@{}>", self.user_id)
    }
}
