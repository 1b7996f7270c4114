//! Slack Web API client used for authentication, directory reads, and
//! message posting.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use relay_access::{ChannelInfo, DirectorySource, UserInfo};
use relay_core::Identity;

const PAGE_LIMIT: &str = "200";

#[derive(Debug, Clone, Deserialize)]
struct AuthTestResponse {
    ok: bool,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RtmConnectResponse {
    ok: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ConversationsListResponse {
    ok: bool,
    #[serde(default)]
    channels: Vec<ChannelPayload>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelPayload {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UsersListResponse {
    ok: bool,
    #[serde(default)]
    members: Vec<UserPayload>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct UserPayload {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    profile: UserProfilePayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UserProfilePayload {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UsergroupsListResponse {
    ok: bool,
    #[serde(default)]
    usergroups: Vec<UsergroupPayload>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct UsergroupPayload {
    id: String,
    #[serde(default)]
    handle: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UsergroupUsersResponse {
    ok: bool,
    #[serde(default)]
    users: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BasicResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
/// Thin client over the Slack Web API. Cheap to clone; safe for concurrent
/// use from multiple pipeline tasks.
pub struct SlackWebClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl SlackWebClient {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("relay-bot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout.max(Duration::from_millis(1)))
            .build()
            .context("failed to create slack web client")?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into().trim().to_string(),
        })
    }

    /// `auth.test`: validates the credential and resolves the bot identity.
    pub async fn auth_test(&self) -> Result<Identity> {
        let response: AuthTestResponse = self.get_json("auth.test", &[]).await?;
        if !response.ok {
            bail!(
                "slack auth.test failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        let user_id = response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack auth.test did not return user_id"))?;
        Ok(Identity::new(user_id, response.user.unwrap_or_default()))
    }

    /// `rtm.connect`: opens an RTM session and returns the websocket URL.
    pub async fn rtm_connect(&self) -> Result<String> {
        let response: RtmConnectResponse = self.get_json("rtm.connect", &[]).await?;
        if !response.ok {
            bail!(
                "slack rtm.connect failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        response
            .url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack rtm.connect did not return url"))
    }

    /// Cursor-paginated `conversations.list`, public channels only.
    pub async fn list_public_channels(&self) -> Result<Vec<ChannelInfo>> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut query = vec![
                ("types", "public_channel".to_string()),
                ("exclude_archived", "true".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.clone()));
            }
            let response: ConversationsListResponse =
                self.get_json("conversations.list", &query).await?;
            if !response.ok {
                bail!(
                    "slack conversations.list failed: {}",
                    response
                        .error
                        .unwrap_or_else(|| "unknown error".to_string())
                );
            }
            channels.extend(response.channels.into_iter().map(|channel| ChannelInfo {
                id: channel.id,
                name: channel.name,
            }));
            cursor = response
                .response_metadata
                .map(|metadata| metadata.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                return Ok(channels);
            }
        }
    }

    /// Cursor-paginated `users.list` for the whole workspace.
    pub async fn list_users(&self) -> Result<Vec<UserInfo>> {
        let mut users = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut query = vec![("limit", PAGE_LIMIT.to_string())];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.clone()));
            }
            let response: UsersListResponse = self.get_json("users.list", &query).await?;
            if !response.ok {
                bail!(
                    "slack users.list failed: {}",
                    response
                        .error
                        .unwrap_or_else(|| "unknown error".to_string())
                );
            }
            users.extend(response.members.into_iter().map(|member| UserInfo {
                id: member.id,
                name: member.name,
                title: member.profile.title,
            }));
            cursor = response
                .response_metadata
                .map(|metadata| metadata.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                return Ok(users);
            }
        }
    }

    /// Resolves a usergroup handle (or name or ID) to its member user IDs.
    pub async fn group_members(&self, group: &str) -> Result<Vec<String>> {
        let response: UsergroupsListResponse = self.get_json("usergroups.list", &[]).await?;
        if !response.ok {
            bail!(
                "slack usergroups.list failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        let usergroup = response
            .usergroups
            .into_iter()
            .find(|candidate| {
                candidate.handle == group || candidate.name == group || candidate.id == group
            })
            .ok_or_else(|| anyhow!("slack usergroup '{group}' not found"))?;

        let response: UsergroupUsersResponse = self
            .get_json("usergroups.users.list", &[("usergroup", usergroup.id)])
            .await?;
        if !response.ok {
            bail!(
                "slack usergroups.users.list failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(response.users)
    }

    pub async fn join_channel(&self, channel: &str) -> Result<()> {
        let response: BasicResponse = self
            .post_json("conversations.join", &json!({ "channel": channel }))
            .await?;
        if !response.ok {
            bail!(
                "slack conversations.join failed for '{channel}': {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }
        let response: BasicResponse = self.post_json("chat.postMessage", &payload).await?;
        if !response.ok {
            bail!(
                "slack chat.postMessage failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    async fn get_json<T>(&self, method: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .http
            .get(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("slack api {method} request failed"))?;
        Self::decode(method, response).await
    }

    async fn post_json<T>(&self, method: &str, payload: &Value) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("slack api {method} request failed"))?;
        Self::decode(method, response).await
    }

    async fn decode<T>(method: &str, response: reqwest::Response) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "slack api {method} failed with status {}: {}",
                status.as_u16(),
                truncate_for_error(&body, 800)
            );
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode slack {method} response"))
    }
}

#[async_trait]
impl DirectorySource for SlackWebClient {
    async fn fetch_public_channels(&self) -> Result<Vec<ChannelInfo>> {
        self.list_public_channels().await
    }

    async fn fetch_all_users(&self) -> Result<Vec<UserInfo>> {
        self.list_users().await
    }

    async fn fetch_group_members(&self, group: &str) -> Result<Vec<String>> {
        self.group_members(group).await
    }
}

fn truncate_for_error(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    body.chars().take(max_chars).collect::<String>() + "..."
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::SlackWebClient;

    fn client(base_url: &str) -> SlackWebClient {
        SlackWebClient::new(base_url, "xoxb-test", Duration::from_secs(3)).expect("client")
    }

    #[tokio::test]
    async fn functional_auth_test_returns_identity() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/auth.test");
                then.status(200)
                    .json_body(json!({"ok": true, "user": "relay", "user_id": "UBOT"}));
            })
            .await;

        let identity = client(&server.base_url()).auth_test().await.expect("auth");
        assert_eq!(identity.user_id, "UBOT");
        assert_eq!(identity.user_name, "relay");
    }

    #[tokio::test]
    async fn regression_auth_test_surfaces_slack_error_envelope() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/auth.test");
                then.status(200)
                    .json_body(json!({"ok": false, "error": "invalid_auth"}));
            })
            .await;

        let error = client(&server.base_url())
            .auth_test()
            .await
            .expect_err("ok:false must fail");
        assert!(error.to_string().contains("invalid_auth"));
    }

    #[tokio::test]
    async fn functional_list_public_channels_follows_cursor_pagination() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/conversations.list")
                    .query_param("cursor", "page2");
                then.status(200).json_body(json!({
                    "ok": true,
                    "channels": [{"id": "C2", "name": "random"}],
                    "response_metadata": {"next_cursor": ""},
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/conversations.list")
                    .query_param("types", "public_channel");
                then.status(200).json_body(json!({
                    "ok": true,
                    "channels": [{"id": "C1", "name": "general"}],
                    "response_metadata": {"next_cursor": "page2"},
                }));
            })
            .await;

        let channels = client(&server.base_url())
            .list_public_channels()
            .await
            .expect("channels");
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, "C1");
        assert_eq!(channels[1].name, "random");
    }

    #[tokio::test]
    async fn functional_group_members_resolves_handle_then_lists_users() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/usergroups.list");
                then.status(200).json_body(json!({
                    "ok": true,
                    "usergroups": [
                        {"id": "S1", "handle": "ops", "name": "Operations"},
                        {"id": "S2", "handle": "dev", "name": "Developers"},
                    ],
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/usergroups.users.list")
                    .query_param("usergroup", "S1");
                then.status(200)
                    .json_body(json!({"ok": true, "users": ["U1", "U2"]}));
            })
            .await;

        let members = client(&server.base_url())
            .group_members("ops")
            .await
            .expect("members");
        assert_eq!(members, vec!["U1".to_string(), "U2".to_string()]);
    }

    #[tokio::test]
    async fn regression_unknown_group_fails_before_member_lookup() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/usergroups.list");
                then.status(200).json_body(json!({"ok": true, "usergroups": []}));
            })
            .await;

        let error = client(&server.base_url())
            .group_members("ghosts")
            .await
            .expect_err("unknown group must fail");
        assert!(error.to_string().contains("ghosts"));
    }

    #[tokio::test]
    async fn functional_list_users_maps_profile_title() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users.list");
                then.status(200).json_body(json!({
                    "ok": true,
                    "members": [
                        {"id": "U1", "name": "alice", "profile": {"title": "SRE at ACME"}},
                        {"id": "U2", "name": "bob"},
                    ],
                }));
            })
            .await;

        let users = client(&server.base_url()).list_users().await.expect("users");
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].title, "SRE at ACME");
        assert_eq!(users[1].title, "");
    }

    #[tokio::test]
    async fn regression_post_message_propagates_channel_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat.postMessage");
                then.status(200)
                    .json_body(json!({"ok": false, "error": "channel_not_found"}));
            })
            .await;

        let error = client(&server.base_url())
            .post_message("C404", "hello", None)
            .await
            .expect_err("ok:false must fail");
        assert!(error.to_string().contains("channel_not_found"));
    }

    #[tokio::test]
    async fn regression_http_status_failures_include_status_code() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users.list");
                then.status(503).body("upstream unavailable");
            })
            .await;

        let error = client(&server.base_url())
            .list_users()
            .await
            .expect_err("503 must fail");
        assert!(error.to_string().contains("503"));
    }
}
