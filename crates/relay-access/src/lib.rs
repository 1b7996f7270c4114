//! Access policy and directory state for the Relay dispatcher.
//!
//! Builds the read-only directory snapshot at startup and decides which
//! users are permitted to invoke commands.

pub mod allow_list;
pub mod directory;

pub use allow_list::{allow_list_matches, title_matches_team, AllowListConfig};
pub use directory::{
    sync_directory, ChannelInfo, DirectoryError, DirectorySnapshot, DirectorySource, UserInfo,
};
