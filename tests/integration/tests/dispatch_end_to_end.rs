//! End-to-end dispatch scenarios: a real [`Bot`] wired to the built-in
//! command registry over a scripted transport, driven through the full
//! initialize / dispatch / shutdown lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use relay_access::{AllowListConfig, ChannelInfo, DirectorySource, UserInfo};
use relay_bot::{Bot, BotConfig};
use relay_cli::BuiltinCommands;
use relay_core::{Identity, MessageEvent};
use relay_slack::{ChatSession, TransportEvent};

const BOT_ID: &str = "UBOT";

#[derive(Default)]
struct FakeSlack {
    replies: Mutex<Vec<(String, String)>>,
    joins: Mutex<Vec<String>>,
    typing: AtomicUsize,
    disconnects: AtomicUsize,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl FakeSlack {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let slack = Arc::new(Self {
            events_rx: Mutex::new(Some(events_rx)),
            ..Self::default()
        });
        (slack, events_tx)
    }

    fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().expect("replies lock").clone()
    }
}

#[async_trait]
impl DirectorySource for FakeSlack {
    async fn fetch_public_channels(&self) -> Result<Vec<ChannelInfo>> {
        Ok(vec![ChannelInfo {
            id: "C1".to_string(),
            name: "general".to_string(),
        }])
    }

    async fn fetch_all_users(&self) -> Result<Vec<UserInfo>> {
        Ok(vec![
            UserInfo {
                id: "U1".to_string(),
                name: "alice".to_string(),
                title: String::new(),
            },
            UserInfo {
                id: "U2".to_string(),
                name: "mallory".to_string(),
                title: String::new(),
            },
        ])
    }

    async fn fetch_group_members(&self, _group: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl ChatSession for FakeSlack {
    async fn authenticate(&self) -> Result<Identity> {
        Ok(Identity::new(BOT_ID, "relay"))
    }

    async fn connect(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.events_rx
            .lock()
            .expect("events lock")
            .take()
            .expect("connect called once")
    }

    async fn join_channel(&self, channel: &str) -> Result<()> {
        self.joins
            .lock()
            .expect("joins lock")
            .push(channel.to_string());
        Ok(())
    }

    async fn send_typing(&self, _channel: &str) -> Result<()> {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_reply(&self, event: &MessageEvent, text: &str) -> Result<()> {
        self.replies
            .lock()
            .expect("replies lock")
            .push((event.channel.clone(), text.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    slack: Arc<FakeSlack>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: JoinHandle<()>,
}

impl Harness {
    async fn start() -> Self {
        let (slack, events_tx) = FakeSlack::new();
        let session: Arc<dyn ChatSession> = slack.clone();

        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let commands = Arc::new(BuiltinCommands::new(session.clone(), internal_tx));

        let config = BotConfig {
            token: "xoxb-test".to_string(),
            allow_list: AllowListConfig {
                users: vec!["alice".to_string()],
                ..AllowListConfig::default()
            },
            autojoin_channels: vec!["C1".to_string()],
            test_endpoint_url: None,
        };

        let (bot, events) = Bot::initialize(config, session, commands)
            .await
            .expect("initialization succeeds");
        let bot = Arc::new(bot);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_bot = bot.clone();
        let loop_handle = tokio::spawn(async move {
            loop_bot
                .handle_messages(events, internal_rx, shutdown_rx)
                .await;
        });

        Self {
            slack,
            events_tx,
            shutdown_tx,
            loop_handle,
        }
    }

    fn inject(&self, user: &str, channel: &str, text: &str) {
        let event = MessageEvent {
            user: Some(user.to_string()),
            channel: channel.to_string(),
            text: text.to_string(),
            ..MessageEvent::default()
        };
        self.events_tx
            .send(TransportEvent::Message(event))
            .expect("dispatch loop running");
    }
}

/// Polls until the condition holds or a 2s deadline elapses.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within deadline");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn integration_approved_direct_message_runs_builtin_command() {
    let harness = Harness::start().await;
    assert_eq!(
        harness.slack.joins.lock().expect("joins lock").as_slice(),
        &["C1".to_string()]
    );

    harness.inject("U1", "D1", "ping");
    wait_until(|| !harness.slack.replies().is_empty()).await;
    assert_eq!(
        harness.slack.replies(),
        vec![("D1".to_string(), "pong".to_string())]
    );
}

#[tokio::test]
async fn integration_public_channel_mention_is_trimmed_before_matching() {
    let harness = Harness::start().await;

    harness.inject("U1", "C1", "<@UBOT> ping");
    wait_until(|| !harness.slack.replies().is_empty()).await;
    assert_eq!(
        harness.slack.replies(),
        vec![("C1".to_string(), "pong".to_string())]
    );

    // Without a mention nothing in a public channel is handled.
    harness.inject("U1", "C1", "ping");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.slack.replies().len(), 1);
}

#[tokio::test]
async fn integration_delayed_command_reenters_through_internal_channel() {
    let harness = Harness::start().await;

    harness.inject("U1", "D1", "delay 0 ping");
    wait_until(|| harness.slack.replies().len() >= 2).await;

    let replies = harness.slack.replies();
    assert!(replies[0].1.contains("Queued"), "ack first: {replies:?}");
    assert_eq!(replies[1], ("D1".to_string(), "pong".to_string()));
}

#[tokio::test]
async fn integration_unapproved_user_is_refused_before_commands() {
    let harness = Harness::start().await;

    harness.inject("U2", "D2", "ping");
    wait_until(|| !harness.slack.replies().is_empty()).await;

    let replies = harness.slack.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "D2");
    assert!(replies[0].1.contains("not whitelisted"));
}

#[tokio::test]
async fn integration_unknown_command_gets_the_fallback_reply() {
    let harness = Harness::start().await;

    harness.inject("U1", "D1", "launch the missiles");
    wait_until(|| !harness.slack.replies().is_empty()).await;
    assert!(harness.slack.replies()[0].1.contains("don't understand"));
}

#[tokio::test]
async fn integration_shutdown_disconnects_transport_and_stops_loop() {
    let harness = Harness::start().await;

    harness.shutdown_tx.send(true).expect("loop subscribed");
    harness.loop_handle.await.expect("loop task completes");
    assert_eq!(harness.slack.disconnects.load(Ordering::SeqCst), 1);
}
