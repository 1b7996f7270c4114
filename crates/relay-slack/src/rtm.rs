//! Persistent RTM websocket transport.
//!
//! A background task owns the socket: it reconnects with a fixed delay,
//! answers protocol pings, measures round-trip latency with timestamped RTM
//! pings, and normalizes `"type":"message"` frames into [`MessageEvent`]s for
//! the dispatch loop. Outbound typing indicators are funneled through a
//! channel into the same task so the socket has a single writer.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use relay_access::{ChannelInfo, DirectorySource, UserInfo};
use relay_core::{current_unix_timestamp_ms, Identity, MessageEvent};

use crate::session::{ChatSession, TransportEvent};
use crate::web_client::SlackWebClient;

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
/// Construction parameters for [`RtmSession`].
pub struct RtmSessionConfig {
    pub api_base: String,
    pub token: String,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl Default for RtmSessionConfig {
    fn default() -> Self {
        Self {
            api_base: crate::DEFAULT_API_BASE.to_string(),
            token: String::new(),
            request_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Frames the session pushes into the socket task.
enum RtmOutbound {
    Typing { channel: String },
}

/// Production [`ChatSession`]: Web API client plus the RTM socket task.
pub struct RtmSession {
    web: SlackWebClient,
    reconnect_delay: Duration,
    outbound_tx: mpsc::UnboundedSender<RtmOutbound>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<RtmOutbound>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RtmSession {
    pub fn new(config: RtmSessionConfig) -> Result<Self> {
        let web = SlackWebClient::new(config.api_base, config.token, config.request_timeout)?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Ok(Self {
            web,
            reconnect_delay: config.reconnect_delay,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown_tx,
        })
    }
}

#[async_trait]
impl ChatSession for RtmSession {
    async fn authenticate(&self) -> Result<Identity> {
        self.web.auth_test().await
    }

    async fn connect(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let outbound_rx = self
            .outbound_rx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        let Some(outbound_rx) = outbound_rx else {
            // A second connect would mean two socket tasks; refuse and hand
            // back a closed stream so the dispatcher stops cleanly.
            warn!("rtm session already connected");
            return events_rx;
        };
        let web = self.web.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let reconnect_delay = self.reconnect_delay;
        tokio::spawn(async move {
            run_socket_task(web, events_tx, outbound_rx, shutdown_rx, reconnect_delay).await;
        });
        events_rx
    }

    async fn join_channel(&self, channel: &str) -> Result<()> {
        self.web.join_channel(channel).await
    }

    async fn send_typing(&self, channel: &str) -> Result<()> {
        self.outbound_tx
            .send(RtmOutbound::Typing {
                channel: channel.to_string(),
            })
            .map_err(|_| anyhow!("rtm socket task is not running"))
    }

    async fn send_reply(&self, event: &MessageEvent, text: &str) -> Result<()> {
        self.web
            .post_message(&event.channel, text, event.thread_ts.as_deref())
            .await
    }

    async fn disconnect(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        Ok(())
    }
}

#[async_trait]
impl DirectorySource for RtmSession {
    async fn fetch_public_channels(&self) -> Result<Vec<ChannelInfo>> {
        self.web.fetch_public_channels().await
    }

    async fn fetch_all_users(&self) -> Result<Vec<UserInfo>> {
        self.web.fetch_all_users().await
    }

    async fn fetch_group_members(&self, group: &str) -> Result<Vec<String>> {
        self.web.fetch_group_members(group).await
    }
}

async fn run_socket_task(
    web: SlackWebClient,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<RtmOutbound>,
    mut shutdown_rx: watch::Receiver<bool>,
    reconnect_delay: Duration,
) {
    let mut next_id: u64 = 1;
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        let socket_url = match web.rtm_connect().await {
            Ok(url) => url,
            Err(error) => {
                warn!(
                    error = error.to_string().as_str(),
                    "failed to open rtm connection"
                );
                if wait_for_reconnect(&mut shutdown_rx, reconnect_delay).await {
                    return;
                }
                continue;
            }
        };
        let (stream, _response) = match connect_async(&socket_url).await {
            Ok(connected) => connected,
            Err(error) => {
                warn!(
                    error = error.to_string().as_str(),
                    "rtm websocket connect failed"
                );
                if wait_for_reconnect(&mut shutdown_rx, reconnect_delay).await {
                    return;
                }
                continue;
            }
        };
        info!("rtm socket connected");
        let (mut sink, mut source) = stream.split();
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately; skip it so pings are spaced out.
        ping_interval.tick().await;

        let session_over = loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break true;
                }
                maybe_outbound = outbound_rx.recv() => {
                    match maybe_outbound {
                        Some(RtmOutbound::Typing { channel }) => {
                            let frame = json!({
                                "id": next_id,
                                "type": "typing",
                                "channel": channel,
                            })
                            .to_string();
                            next_id += 1;
                            if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                                break false;
                            }
                        }
                        None => break true,
                    }
                }
                _ = ping_interval.tick() => {
                    let frame = json!({
                        "id": next_id,
                        "type": "ping",
                        "time": current_unix_timestamp_ms(),
                    })
                    .to_string();
                    next_id += 1;
                    if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                        break false;
                    }
                }
                maybe_message = source.next() => {
                    let Some(Ok(message)) = maybe_message else {
                        break false;
                    };
                    match message {
                        WsMessage::Text(text) => {
                            if let Some(event) = normalize_rtm_frame(text.as_str()) {
                                if events_tx.send(event).is_err() {
                                    break true;
                                }
                            }
                        }
                        WsMessage::Ping(payload) => {
                            if sink.send(WsMessage::Pong(payload)).await.is_err() {
                                break false;
                            }
                        }
                        WsMessage::Close(_) => break false,
                        _ => {}
                    }
                }
            }
        };
        if session_over {
            return;
        }
        warn!("rtm socket disconnected");
        if wait_for_reconnect(&mut shutdown_rx, reconnect_delay).await {
            return;
        }
    }
}

/// Sleeps out the reconnect delay; returns true when shutdown was requested.
async fn wait_for_reconnect(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => true,
        _ = tokio::time::sleep(delay) => *shutdown_rx.borrow(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RtmFrame {
    #[serde(rename = "type", default)]
    frame_type: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    /// Echoed back in pong frames from our timestamped pings.
    #[serde(default)]
    time: Option<u64>,
}

/// Parses one RTM frame into a transport event. Frames that the dispatcher
/// has no use for (hello, presence, acks) map to `None`.
fn normalize_rtm_frame(raw: &str) -> Option<TransportEvent> {
    let frame: RtmFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(error = error.to_string().as_str(), "undecodable rtm frame");
            return None;
        }
    };
    match frame.frame_type.as_deref() {
        Some("message") => {
            let channel = frame.channel.filter(|value| !value.is_empty())?;
            Some(TransportEvent::Message(MessageEvent {
                user: frame.user,
                channel,
                text: frame.text.unwrap_or_default(),
                bot_id: frame.bot_id,
                subtype: frame.subtype,
                thread_ts: frame.thread_ts,
                internal: false,
            }))
        }
        Some("pong") => {
            let sent_at = frame.time?;
            let elapsed_ms = current_unix_timestamp_ms().saturating_sub(sent_at);
            Some(TransportEvent::Latency(Duration::from_millis(elapsed_ms)))
        }
        _ => None,
    }
}
