// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{ConfigError, Result};
use crate::fs::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use trellis_keys::{KeyError, WgKeyPair};

pub const CONFIG_DIR_NAME: &str = "netbird";
pub const CONFIG_FILE_NAME: &str = "mini-config.json";

/// A management-provided peer as persisted on disk. `allowed_ips` is a
/// comma-separated list, the form the wg tool consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
	pub id: String,
	pub public_key: String,
	#[serde(default)]
	pub allowed_ips: String,
	#[serde(default)]
	pub endpoint: String,
}

/// Persisted node state. Mutated only by the driver loop; saved on change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
	pub management_url: String,
	pub signal_url: String,
	#[serde(default)]
	pub setup_key: String,
	pub wg_iface_name: String,
	pub wg_address: String,
	pub wg_listen_port: u16,
	#[serde(default)]
	pub wg_private_key: String,
	#[serde(default)]
	pub peers: Vec<Peer>,
	#[serde(default)]
	pub routes: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub dns: Vec<String>,
	/// Opt-in offline stub on unreachable management. Masks auth failures,
	/// so it is never the default.
	#[serde(default)]
	pub fallback_stub: bool,
}

impl Default for NodeConfig {
	fn default() -> Self {
		Self {
			management_url: "https://management.example.com:443".to_string(),
			signal_url: "https://signal.example.com:443".to_string(),
			setup_key: String::new(),
			wg_iface_name: "wtnb0".to_string(),
			wg_address: "100.64.0.50/32".to_string(),
			wg_listen_port: 51820,
			wg_private_key: String::new(),
			peers: Vec::new(),
			routes: Vec::new(),
			dns: Vec::new(),
			fallback_stub: false,
		}
	}
}

pub fn default_config_path() -> Result<PathBuf> {
	let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
	Ok(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl NodeConfig {
	pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let data = tokio::fs::read(path).await?;
		let config: NodeConfig =
			serde_json::from_slice(&data).map_err(|e| ConfigError::Parse {
				path: path.display().to_string(),
				source: e,
			})?;
		debug!(path = %path.display(), "loaded node config");
		Ok(config)
	}

	/// Loads the config, falling back to defaults (persisted immediately)
	/// when the file does not exist yet.
	pub async fn load_or_init(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		if tokio::fs::try_exists(path).await? {
			return Self::load(path).await;
		}
		let config = NodeConfig::default();
		config.save(path).await?;
		info!(path = %path.display(), "wrote default node config");
		Ok(config)
	}

	/// Atomic write-to-temp + rename, file mode 0600.
	pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
		let path = path.as_ref();
		let mut data = serde_json::to_vec_pretty(self).map_err(ConfigError::Encode)?;
		data.push(b'\n');
		write_atomic(path, &data).await?;
		debug!(path = %path.display(), "saved node config");
		Ok(())
	}

	/// Decodes the persisted private key, or generates and stores a fresh
	/// one when the field is empty. A malformed stored key is fatal; it is
	/// never silently regenerated.
	pub fn ensure_key(&mut self) -> std::result::Result<WgKeyPair, KeyError> {
		if self.wg_private_key.is_empty() {
			let keypair = WgKeyPair::generate();
			self.wg_private_key = keypair.private_key().to_base64();
			info!(public_key = %keypair.public_key(), "generated node identity key");
			return Ok(keypair);
		}
		WgKeyPair::from_base64(&self.wg_private_key)
	}
}
