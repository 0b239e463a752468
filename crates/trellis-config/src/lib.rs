// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted node configuration and on-disk state exchange.
//!
//! The config file lives in the user config directory under
//! `netbird/mini-config.json`, mode 0600, always written via temp + rename.

pub mod config;
pub mod error;
pub mod fs;
pub mod mailbox;

pub use config::{default_config_path, NodeConfig, Peer, CONFIG_DIR_NAME, CONFIG_FILE_NAME};
pub use error::{ConfigError, Result};
pub use fs::write_atomic;
pub use mailbox::{
	read_peers, read_routes, write_peers, write_routes, PeersFile, RoutesFile, PEERS_FILE_NAME,
	ROUTES_FILE_NAME,
};
