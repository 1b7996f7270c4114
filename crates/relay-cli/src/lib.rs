//! Process wiring for the Relay binary: configuration loading and the
//! built-in command registry.

pub mod config;
pub mod registry;

pub use config::{load_config, Config, SlackConfig};
pub use registry::BuiltinCommands;
