use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use relay_access::AllowListConfig;
use relay_bot::BotConfig;
use relay_slack::{RtmSessionConfig, DEFAULT_API_BASE};

#[derive(Debug, Clone, Default, Deserialize)]
/// Top-level TOML configuration.
pub struct Config {
    #[serde(default)]
    pub slack: SlackConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub token: String,
    /// Web API base override, used by tests and proxies.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Deprecated: approve users whose profile title contains this marker.
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub allowed_groups: Vec<String>,
    #[serde(default)]
    pub autojoin_channels: Vec<String>,
    /// When set, the whitelist check is disabled. Test endpoints only.
    #[serde(default)]
    pub test_endpoint_url: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config file {}", path.display()))
}

impl Config {
    pub fn bot_config(&self) -> BotConfig {
        BotConfig {
            token: self.slack.token.clone(),
            allow_list: AllowListConfig {
                users: self.slack.allowed_users.clone(),
                groups: self.slack.allowed_groups.clone(),
                team_marker: self.slack.team.clone(),
            },
            autojoin_channels: self.slack.autojoin_channels.clone(),
            test_endpoint_url: self.slack.test_endpoint_url.clone(),
        }
    }

    pub fn session_config(&self) -> RtmSessionConfig {
        RtmSessionConfig {
            api_base: self
                .slack
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            token: self.slack.token.clone(),
            ..RtmSessionConfig::default()
        }
    }
}
