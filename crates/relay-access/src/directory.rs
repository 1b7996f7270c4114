use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::allow_list::{allow_list_matches, title_matches_team, AllowListConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    /// Profile title, consumed by the legacy team-marker rule.
    pub title: String,
}

#[derive(Debug, Clone, Default)]
/// Read-only directory state published once after startup: all public
/// channels, and the users approved to run commands. Replaced wholesale if it
/// ever needs updating; never mutated in place.
pub struct DirectorySnapshot {
    /// Channel ID to channel name, for every public channel.
    pub channels: HashMap<String, String>,
    /// User ID to user name, limited to approved users.
    pub users: HashMap<String, String>,
}

impl DirectorySnapshot {
    pub fn is_approved(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn channel_name(&self, channel_id: &str) -> Option<&str> {
        self.channels.get(channel_id).map(String::as_str)
    }
}

#[derive(Debug, Error)]
/// Directory sync failures. All are fatal at startup: a partial allow-list
/// would silently under- or over-authorize.
pub enum DirectoryError {
    #[error("failed to fetch public channels: {0}")]
    ChannelFetch(anyhow::Error),
    #[error("failed to fetch users: {0}")]
    UserFetch(anyhow::Error),
    #[error("failed to resolve members of group '{group}': {reason}")]
    GroupResolve { group: String, reason: anyhow::Error },
}

#[async_trait]
/// Backend directory reads consumed by [`sync_directory`]. Implemented by the
/// Slack Web API client; mocked in tests.
pub trait DirectorySource: Send + Sync {
    async fn fetch_public_channels(&self) -> Result<Vec<ChannelInfo>>;
    async fn fetch_all_users(&self) -> Result<Vec<UserInfo>>;
    async fn fetch_group_members(&self, group: &str) -> Result<Vec<String>>;
}

/// Fetches the channel and user directory once and builds the snapshot.
///
/// Channels are not access-controlled and are mapped unconditionally. A user
/// is approved when the legacy title rule or the allow-list rule matches;
/// first matching rule wins, and the destination is keyed by ID so a user
/// matching both rules is counted once.
pub async fn sync_directory(
    source: &dyn DirectorySource,
    allow_list: &AllowListConfig,
) -> Result<DirectorySnapshot, DirectoryError> {
    let channels = source
        .fetch_public_channels()
        .await
        .map_err(DirectoryError::ChannelFetch)?;

    let mut snapshot = DirectorySnapshot::default();
    for channel in channels {
        snapshot.channels.insert(channel.id, channel.name);
    }

    let mut allow_entries = allow_list.users.clone();
    for group in &allow_list.groups {
        let members =
            source
                .fetch_group_members(group)
                .await
                .map_err(|reason| DirectoryError::GroupResolve {
                    group: group.clone(),
                    reason,
                })?;
        allow_entries.extend(members);
    }

    let users = source
        .fetch_all_users()
        .await
        .map_err(DirectoryError::UserFetch)?;
    for user in users {
        if title_matches_team(&user.title, allow_list.team_marker.as_deref())
            || allow_list_matches(&user.id, &user.name, &allow_entries)
        {
            snapshot.users.insert(user.id, user.name);
        }
    }

    Ok(snapshot)
}
