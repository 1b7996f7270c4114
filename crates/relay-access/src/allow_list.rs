use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Configured allow-list: explicit user names/IDs, usergroup handles, and the
/// legacy title-marker rule. Read-only input to directory sync.
pub struct AllowListConfig {
    /// Explicit user names or user IDs permitted to run commands.
    #[serde(default)]
    pub users: Vec<String>,
    /// Usergroup handles whose members are appended to the allow-list.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Deprecated: approve any user whose profile title contains this marker.
    #[serde(default)]
    pub team_marker: Option<String>,
}

impl AllowListConfig {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty() && self.team_marker.is_none()
    }
}

/// Legacy approval rule: the user's profile title contains the configured
/// team marker. Kept separate from the allow-list rule because the two have
/// different deprecation status.
pub fn title_matches_team(title: &str, team_marker: Option<&str>) -> bool {
    match team_marker {
        Some(marker) if !marker.is_empty() => title.contains(marker),
        _ => false,
    }
}

/// Primary approval rule: the user's name or ID appears among the effective
/// allow-list entries (explicit entries plus resolved group members).
pub fn allow_list_matches(user_id: &str, user_name: &str, allow_entries: &[String]) -> bool {
    allow_entries
        .iter()
        .any(|entry| entry == user_name || entry == user_id)
}

#[cfg(test)]
mod tests {
    use super::{allow_list_matches, title_matches_team, AllowListConfig};

    #[test]
    fn unit_title_matches_team_requires_non_empty_marker() {
        assert!(title_matches_team("Backend / ACME", Some("ACME")));
        assert!(!title_matches_team("Backend / ACME", Some("Widgets")));
        assert!(!title_matches_team("Backend / ACME", Some("")));
        assert!(!title_matches_team("Backend / ACME", None));
    }

    #[test]
    fn unit_allow_list_matches_name_or_id() {
        let entries = vec!["alice".to_string(), "U42".to_string()];
        assert!(allow_list_matches("U1", "alice", &entries));
        assert!(allow_list_matches("U42", "bob", &entries));
        assert!(!allow_list_matches("U7", "carol", &entries));
        assert!(!allow_list_matches("U7", "carol", &[]));
    }

    #[test]
    fn unit_allow_list_config_default_is_empty() {
        assert!(AllowListConfig::default().is_empty());
        let configured = AllowListConfig {
            team_marker: Some("ACME".to_string()),
            ..AllowListConfig::default()
        };
        assert!(!configured.is_empty());
    }
}
