//! Foundational types shared across Relay crates.
//!
//! Provides the normalized inbound message event, the bot's authenticated
//! identity, and time/duration helpers used by dispatch logging.

pub mod event;
pub mod identity;
pub mod time_utils;

pub use event::{MessageEvent, DIRECT_MESSAGE_PREFIX, SUBTYPE_BOT_MESSAGE};
pub use identity::Identity;
pub use time_utils::{current_unix_timestamp_ms, format_duration};
