// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

/// Serde helper: `Vec<u8>` as a base64 string in JSON.
mod base64_bytes {
	use base64::engine::general_purpose::STANDARD;
	use base64::Engine;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let s = String::deserialize(deserializer)?;
		STANDARD.decode(s).map_err(serde::de::Error::custom)
	}
}

/// Outer wrapper for every encrypted RPC payload. The sender's public key
/// travels in clear; the body is `nonce ‖ ciphertext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
	pub wg_pub_key: String,
	#[serde(with = "base64_bytes")]
	pub body: Vec<u8>,
	#[serde(default)]
	pub version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerKeyResponse {
	pub key: String,
	#[serde(default)]
	pub version: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerSystemMeta {
	pub hostname: String,
	pub os: String,
	#[serde(default)]
	pub os_version: String,
	#[serde(default)]
	pub kernel_version: String,
	#[serde(default)]
	pub client_version: String,
}

/// The key set announced at login. `wg_pub_key` carries the byte form of the
/// base64 text, matching what the server expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerKeys {
	#[serde(with = "base64_bytes")]
	pub wg_pub_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
	#[serde(default)]
	pub setup_key: String,
	pub peer_keys: PeerKeys,
	pub meta: PeerSystemMeta,
}

/// Per-node overlay settings handed down by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
	#[serde(default)]
	pub address: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub dns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
	pub uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub signal: Option<SignalConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
	#[serde(default)]
	pub peer_config: Option<PeerConfig>,
	#[serde(default)]
	pub trellis_config: Option<OverlayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
	pub meta: PeerSystemMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePeer {
	pub wg_pub_key: String,
	#[serde(default)]
	pub allowed_ips: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub endpoint: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub keepalive: Option<u16>,
}

impl RemotePeer {
	pub const DEFAULT_KEEPALIVE_SECS: u16 = 25;

	pub fn keepalive_secs(&self) -> u16 {
		self.keepalive.unwrap_or(Self::DEFAULT_KEEPALIVE_SECS)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
	pub network: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metric: Option<u32>,
}

/// Authoritative snapshot of desired overlay state. Replaced atomically by
/// each sync element; diffs are computed client-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkMap {
	#[serde(default)]
	pub serial: u64,
	#[serde(default)]
	pub peer_config: Option<PeerConfig>,
	#[serde(default)]
	pub remote_peers: Vec<RemotePeer>,
	#[serde(default)]
	pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
	#[serde(default)]
	pub network_map: Option<NetworkMap>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn envelope_body_is_base64_in_json() {
		let envelope = Envelope {
			wg_pub_key: "pk".into(),
			body: vec![0, 1, 2, 255],
			version: 1,
		};
		let json = serde_json::to_string(&envelope).unwrap();
		assert!(json.contains("\"AAEC/w==\""));

		let back: Envelope = serde_json::from_str(&json).unwrap();
		assert_eq!(back.body, vec![0, 1, 2, 255]);
		assert_eq!(back.version, 1);
	}

	#[test]
	fn envelope_version_defaults_to_zero() {
		let back: Envelope = serde_json::from_str(r#"{"wg_pub_key":"pk","body":""}"#).unwrap();
		assert_eq!(back.version, 0);
		assert!(back.body.is_empty());
	}

	#[test]
	fn serialization_is_deterministic() {
		let meta = PeerSystemMeta {
			hostname: "node-1".into(),
			os: "linux".into(),
			..Default::default()
		};
		let a = serde_json::to_vec(&SyncRequest { meta: meta.clone() }).unwrap();
		let b = serde_json::to_vec(&SyncRequest { meta }).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn network_map_tolerates_sparse_json() {
		let map: NetworkMap = serde_json::from_str(r#"{"serial": 3}"#).unwrap();
		assert_eq!(map.serial, 3);
		assert!(map.remote_peers.is_empty());
		assert!(map.routes.is_empty());
		assert!(map.peer_config.is_none());
	}

	#[test]
	fn remote_peer_keepalive_defaults() {
		let peer: RemotePeer =
			serde_json::from_str(r#"{"wg_pub_key":"K1","allowed_ips":["100.64.0.2/32"]}"#).unwrap();
		assert_eq!(peer.keepalive_secs(), 25);
	}

	#[test]
	fn login_response_optional_sections() {
		let resp: LoginResponse = serde_json::from_str(
			r#"{"peer_config":{"address":"100.64.7.5/32"},"trellis_config":{"signal":{"uri":"sig.example.com:443"}}}"#,
		)
		.unwrap();
		assert_eq!(resp.peer_config.unwrap().address, "100.64.7.5/32");
		assert_eq!(
			resp.trellis_config.unwrap().signal.unwrap().uri,
			"sig.example.com:443"
		);
	}
}
