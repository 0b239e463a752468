// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peers/routes mailbox files for a split data-plane process.
//!
//! Writers replace the whole file atomically; readers treat a missing or
//! unparsable file as "no update" and keep whatever they had.

use crate::config::Peer;
use crate::error::Result;
use crate::fs::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const PEERS_FILE_NAME: &str = "peers.json";
pub const ROUTES_FILE_NAME: &str = "routes.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersFile {
	pub updated_at: DateTime<Utc>,
	pub peers: Vec<Peer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesFile {
	pub updated_at: DateTime<Utc>,
	pub routes: Vec<String>,
}

pub async fn write_peers(dir: impl AsRef<Path>, peers: &[Peer]) -> Result<()> {
	let file = PeersFile {
		updated_at: Utc::now(),
		peers: peers.to_vec(),
	};
	let data = serde_json::to_vec_pretty(&file).map_err(crate::error::ConfigError::Encode)?;
	write_atomic(dir.as_ref().join(PEERS_FILE_NAME), &data).await
}

pub async fn write_routes(dir: impl AsRef<Path>, routes: &[String]) -> Result<()> {
	let file = RoutesFile {
		updated_at: Utc::now(),
		routes: routes.to_vec(),
	};
	let data = serde_json::to_vec_pretty(&file).map_err(crate::error::ConfigError::Encode)?;
	write_atomic(dir.as_ref().join(ROUTES_FILE_NAME), &data).await
}

pub async fn read_peers(dir: impl AsRef<Path>) -> Option<PeersFile> {
	read_mailbox(dir.as_ref().join(PEERS_FILE_NAME)).await
}

pub async fn read_routes(dir: impl AsRef<Path>) -> Option<RoutesFile> {
	read_mailbox(dir.as_ref().join(ROUTES_FILE_NAME)).await
}

async fn read_mailbox<T: serde::de::DeserializeOwned>(path: std::path::PathBuf) -> Option<T> {
	let data = tokio::fs::read(&path).await.ok()?;
	match serde_json::from_slice(&data) {
		Ok(value) => Some(value),
		Err(e) => {
			warn!(path = %path.display(), error = %e, "ignoring unparsable mailbox file");
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn sample_peer() -> Peer {
		Peer {
			id: "K1".into(),
			public_key: "K1".into(),
			allowed_ips: "100.64.0.2/32".into(),
			endpoint: String::new(),
		}
	}

	#[tokio::test]
	async fn peers_roundtrip_with_timestamp() {
		let dir = TempDir::new().unwrap();

		write_peers(dir.path(), &[sample_peer()]).await.unwrap();
		let file = read_peers(dir.path()).await.unwrap();

		assert_eq!(file.peers.len(), 1);
		assert!(file.updated_at <= Utc::now());
	}

	#[tokio::test]
	async fn missing_file_reads_as_no_update() {
		let dir = TempDir::new().unwrap();
		assert!(read_peers(dir.path()).await.is_none());
		assert!(read_routes(dir.path()).await.is_none());
	}

	#[tokio::test]
	async fn corrupt_file_reads_as_no_update() {
		let dir = TempDir::new().unwrap();
		tokio::fs::write(dir.path().join(PEERS_FILE_NAME), b"{oops")
			.await
			.unwrap();
		assert!(read_peers(dir.path()).await.is_none());
	}

	#[tokio::test]
	async fn routes_roundtrip() {
		let dir = TempDir::new().unwrap();
		write_routes(dir.path(), &["10.0.0.0/24".to_string()])
			.await
			.unwrap();
		let file = read_routes(dir.path()).await.unwrap();
		assert_eq!(file.routes, vec!["10.0.0.0/24".to_string()]);
	}
}
