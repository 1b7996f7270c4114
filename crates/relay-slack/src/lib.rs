//! Slack transport collaborators for the Relay dispatcher.
//!
//! Hosts the `ChatSession` seam the bot core is written against, the
//! reqwest-backed Web API client, and the persistent RTM websocket transport.

pub mod rtm;
pub mod session;
pub mod web_client;

pub use rtm::{RtmSession, RtmSessionConfig};
pub use session::{ChatSession, TransportEvent};
pub use web_client::SlackWebClient;

/// Default Slack Web API base URL; overridable for tests.
pub const DEFAULT_API_BASE: &str = "https://slack.com/api";
