//! Relay bot core: connection lifecycle, event dispatch, message gating, and
//! the per-message handling pipeline.

pub mod bot;
pub mod commands;

pub use bot::{Bot, BotConfig, InitError};
pub use commands::Commands;
