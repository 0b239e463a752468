// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{MgmtError, Result, TransportError};
use crate::meta::system_meta;
use crate::session::{ServerIdentity, SessionState};
use crate::transport::{EnvelopeStream, ManagementTransport, TransportTarget};
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use trellis_config::NodeConfig;
use trellis_keys::{WgKeyPair, WgPublicKey};
use trellis_proto::{Envelope, LoginRequest, LoginResponse, NetworkMap, PeerKeys, SyncRequest, SyncResponse};

pub const SERVER_KEY_TIMEOUT: Duration = Duration::from_secs(10);
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const SYNC_INIT_TIMEOUT: Duration = Duration::from_secs(15);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Stateful management-plane client. Polymorphic over the transport so the
/// real network and the deterministic in-memory server drive the same state
/// machine.
pub struct ManagementClient<T> {
	transport: T,
	keypair: WgKeyPair,
	state: SessionState,
	server: Option<ServerIdentity>,
}

impl<T: ManagementTransport> ManagementClient<T> {
	pub fn new(transport: T, keypair: WgKeyPair) -> Self {
		Self {
			transport,
			keypair,
			state: SessionState::Disconnected,
			server: None,
		}
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn server(&self) -> Option<&ServerIdentity> {
		self.server.as_ref()
	}

	pub fn public_key(&self) -> &WgPublicKey {
		self.keypair.public_key()
	}

	fn transition(&mut self, to: SessionState) {
		if self.state != to {
			debug!(from = %self.state, to = %to, "session state change");
			self.state = to;
		}
	}

	fn require_state(&self, wanted: &[SessionState], action: &'static str) -> Result<()> {
		if wanted.contains(&self.state) {
			return Ok(());
		}
		Err(MgmtError::BadState {
			state: self.state,
			action,
		})
	}

	fn seal_envelope<M: Serialize>(&self, message: &M) -> Result<Envelope> {
		let server = self.server.as_ref().ok_or(MgmtError::BadState {
			state: self.state,
			action: "seal envelope without server identity",
		})?;
		let body =
			trellis_crypto::seal_message(message, &server.public_key, self.keypair.private_key())?;
		Ok(Envelope {
			wg_pub_key: self.keypair.public_key().to_base64(),
			body,
			// Echo the advertised version; zero is the unversioned default.
			version: server.version,
		})
	}

	/// Opens a reply envelope body. AEAD failure is a crypto error; a
	/// plaintext that decrypts but does not parse as `kind` is a protocol
	/// error. Both are fatal, and neither names the decrypted contents.
	fn open_reply<M: serde::de::DeserializeOwned>(
		&mut self,
		body: &[u8],
		kind: &'static str,
	) -> Result<M> {
		let server = self.server.as_ref().ok_or(MgmtError::BadState {
			state: self.state,
			action: "open envelope without server identity",
		})?;
		let plaintext =
			match trellis_crypto::open(body, &server.public_key, self.keypair.private_key()) {
				Ok(plaintext) => plaintext,
				Err(e) => {
					self.transition(SessionState::Failed);
					return Err(MgmtError::Crypto(e));
				}
			};
		match serde_json::from_slice(&plaintext) {
			Ok(message) => Ok(message),
			Err(_) => {
				warn!(kind, "reply plaintext has unexpected shape");
				self.transition(SessionState::Failed);
				Err(MgmtError::Protocol(format!(
					"unexpected {kind} plaintext shape"
				)))
			}
		}
	}

	/// Disconnected → Connected. Dial failures are terminal.
	#[instrument(skip(self))]
	pub async fn connect(&mut self, url: &str) -> Result<()> {
		self.require_state(&[SessionState::Disconnected], "dial")?;

		let target = TransportTarget::parse(url);
		if let Err(e) = self.transport.open(&target).await {
			self.transition(SessionState::Failed);
			return Err(MgmtError::Transport(e));
		}
		self.transition(SessionState::Connected);

		// Fire-and-forget probe; an unhealthy server still answers RPCs.
		match timeout(HEALTH_TIMEOUT, self.transport.is_healthy()).await {
			Ok(Ok(())) => debug!("management server healthy"),
			Ok(Err(e)) => debug!(error = %e, "management health probe failed"),
			Err(_) => debug!("management health probe timed out"),
		}

		Ok(())
	}

	/// Connected → KeyFetched: the unencrypted server-key RPC.
	#[instrument(skip(self))]
	pub async fn fetch_server_key(&mut self) -> Result<()> {
		self.require_state(&[SessionState::Connected], "fetch server key")?;

		let response = match timeout(SERVER_KEY_TIMEOUT, self.transport.get_server_key()).await {
			Ok(Ok(response)) => response,
			Ok(Err(e)) => {
				self.transition(SessionState::Failed);
				return Err(MgmtError::Transport(e));
			}
			Err(_) => {
				self.transition(SessionState::Failed);
				return Err(MgmtError::Transport(TransportError::Timeout {
					op: "get-server-key",
				}));
			}
		};

		let public_key = match WgPublicKey::from_base64(&response.key) {
			Ok(key) => key,
			Err(e) => {
				self.transition(SessionState::Failed);
				return Err(MgmtError::Key(e));
			}
		};

		info!(server_key = %public_key, version = response.version, "fetched server identity");
		self.server = Some(ServerIdentity {
			public_key,
			version: response.version,
		});
		self.transition(SessionState::KeyFetched);
		Ok(())
	}

	/// KeyFetched → LoggedIn. Applies the per-node configuration from the
	/// response into `config` (caller persists). Transport errors are
	/// recoverable; auth rejection and decrypt failure are fatal.
	#[instrument(skip(self, config))]
	pub async fn login(&mut self, config: &mut NodeConfig) -> Result<()> {
		self.require_state(&[SessionState::KeyFetched, SessionState::LoggedIn], "login")?;

		let request = LoginRequest {
			setup_key: config.setup_key.clone(),
			peer_keys: PeerKeys {
				// The byte form of the base64 text, as the server expects.
				wg_pub_key: self.keypair.public_key().to_base64().into_bytes(),
			},
			meta: system_meta(),
		};
		let envelope = self.seal_envelope(&request)?;

		let reply = match timeout(LOGIN_TIMEOUT, self.transport.login(&envelope)).await {
			Ok(Ok(reply)) => reply,
			Ok(Err(e)) => {
				if let Some((status, message)) = e.auth_rejection() {
					self.transition(SessionState::Failed);
					return Err(MgmtError::Auth(format!("{status}: {message}")));
				}
				return Err(MgmtError::Transport(e));
			}
			Err(_) => {
				return Err(MgmtError::Transport(TransportError::Timeout { op: "login" }));
			}
		};

		let response: LoginResponse = self.open_reply(&reply.body, "login response")?;

		if let Some(peer_config) = response.peer_config {
			if !peer_config.address.is_empty() {
				config.wg_address = peer_config.address;
			}
			if !peer_config.dns.is_empty() {
				config.dns = peer_config.dns;
			}
		}
		if let Some(signal) = response.trellis_config.and_then(|c| c.signal) {
			if !signal.uri.is_empty() {
				config.signal_url = signal.uri;
			}
		}

		info!("login succeeded");
		self.transition(SessionState::LoggedIn);
		Ok(())
	}

	/// LoggedIn → Syncing: opens the server-streaming sync call.
	#[instrument(skip(self))]
	pub async fn open_sync(&mut self) -> Result<EnvelopeStream> {
		self.require_state(&[SessionState::LoggedIn], "open sync stream")?;

		let request = SyncRequest { meta: system_meta() };
		let envelope = self.seal_envelope(&request)?;

		let stream = match timeout(SYNC_INIT_TIMEOUT, self.transport.sync(&envelope)).await {
			Ok(Ok(stream)) => stream,
			Ok(Err(e)) => return Err(MgmtError::Transport(e)),
			Err(_) => {
				return Err(MgmtError::Transport(TransportError::Timeout {
					op: "sync-initiate",
				}));
			}
		};

		self.transition(SessionState::Syncing);
		Ok(stream)
	}

	/// Receives the next network map from the sync stream.
	///
	/// `Ok(None)` is graceful close (state back to LoggedIn for reconnect);
	/// recoverable receive errors also drop to LoggedIn; decrypt failures are
	/// fatal. Elements without a network map are skipped.
	pub async fn next_network_map(
		&mut self,
		stream: &mut EnvelopeStream,
	) -> Result<Option<NetworkMap>> {
		loop {
			match stream.next().await {
				None => {
					info!("sync stream closed by server");
					self.transition(SessionState::LoggedIn);
					return Ok(None);
				}
				Some(Err(e)) => {
					warn!(error = %e, "sync receive error");
					self.transition(SessionState::LoggedIn);
					return Err(MgmtError::Transport(e));
				}
				Some(Ok(envelope)) => {
					let response: SyncResponse = self.open_reply(&envelope.body, "sync response")?;
					match response.network_map {
						Some(map) => {
							debug!(serial = map.serial, peers = map.remote_peers.len(), "received network map");
							return Ok(Some(map));
						}
						None => debug!("sync element without network map, skipping"),
					}
				}
			}
		}
	}
}

/// The deterministic offline stub: an empty overlay. Opt-in via
/// configuration only, since it masks auth failures.
pub fn stub_network_map() -> NetworkMap {
	NetworkMap::default()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::memory::MemoryTransport;
	use trellis_proto::{PeerConfig, OverlayConfig, RemotePeer, SignalConfig};

	fn client_with(transport: MemoryTransport) -> ManagementClient<MemoryTransport> {
		ManagementClient::new(transport, WgKeyPair::generate())
	}

	fn login_response() -> LoginResponse {
		LoginResponse {
			peer_config: Some(PeerConfig {
				address: "100.64.7.5/32".to_string(),
				dns: vec![],
			}),
			trellis_config: Some(OverlayConfig {
				signal: Some(SignalConfig {
					uri: "signal.example.com:443".to_string(),
				}),
			}),
		}
	}

	fn sync_with_peer(serial: u64, peers: Vec<RemotePeer>) -> SyncResponse {
		SyncResponse {
			network_map: Some(NetworkMap {
				serial,
				peer_config: None,
				remote_peers: peers,
				routes: vec![],
			}),
		}
	}

	#[tokio::test]
	async fn full_session_reaches_syncing() {
		let transport = MemoryTransport::new(WgKeyPair::generate(), 1)
			.with_login_response(login_response())
			.with_sync_response(sync_with_peer(
				1,
				vec![RemotePeer {
					wg_pub_key: "K1".to_string(),
					allowed_ips: vec!["100.64.0.2/32".to_string()],
					endpoint: None,
					keepalive: None,
				}],
			));

		let mut client = client_with(transport);
		let mut config = NodeConfig::default();
		config.setup_key = "SK-1".to_string();

		client.connect("https://mgmt.example.com:443").await.unwrap();
		client.fetch_server_key().await.unwrap();
		assert_eq!(client.state(), SessionState::KeyFetched);
		assert_eq!(client.server().unwrap().version, 1);

		client.login(&mut config).await.unwrap();
		assert_eq!(client.state(), SessionState::LoggedIn);
		// Server-assigned settings land in the config.
		assert_eq!(config.wg_address, "100.64.7.5/32");
		assert_eq!(config.signal_url, "signal.example.com:443");

		let mut stream = client.open_sync().await.unwrap();
		assert_eq!(client.state(), SessionState::Syncing);

		let map = client.next_network_map(&mut stream).await.unwrap().unwrap();
		assert_eq!(map.serial, 1);
		assert_eq!(map.remote_peers.len(), 1);

		// Graceful close drops back to LoggedIn for reconnect.
		assert!(client.next_network_map(&mut stream).await.unwrap().is_none());
		assert_eq!(client.state(), SessionState::LoggedIn);
	}

	#[tokio::test]
	async fn version_is_echoed_in_envelopes() {
		let transport = MemoryTransport::new(WgKeyPair::generate(), 7);
		let mut client = client_with(transport);
		client.connect("mgmt.example.com:443").await.unwrap();
		client.fetch_server_key().await.unwrap();

		let envelope = client.seal_envelope(&SyncRequest { meta: system_meta() }).unwrap();
		assert_eq!(envelope.version, 7);
		assert_eq!(envelope.wg_pub_key, client.public_key().to_base64());
	}

	#[tokio::test]
	async fn dial_failure_is_terminal() {
		let transport = MemoryTransport::new(WgKeyPair::generate(), 0).with_dial_failure();
		let mut client = client_with(transport);

		let err = client.connect("mgmt.example.com:443").await.unwrap_err();
		assert!(matches!(err, MgmtError::Transport(_)));
		assert_eq!(client.state(), SessionState::Failed);
	}

	#[tokio::test]
	async fn missing_setup_key_is_auth_error() {
		let transport = MemoryTransport::new(WgKeyPair::generate(), 0);
		let mut client = client_with(transport);
		let mut config = NodeConfig::default();
		assert!(config.setup_key.is_empty());

		client.connect("mgmt.example.com:443").await.unwrap();
		client.fetch_server_key().await.unwrap();

		let err = client.login(&mut config).await.unwrap_err();
		assert!(matches!(err, MgmtError::Auth(_)));
		assert!(!err.is_recoverable());
		assert_eq!(client.state(), SessionState::Failed);
		// The operator's setup key is left on disk untouched.
		assert!(config.setup_key.is_empty());
	}

	#[tokio::test]
	async fn login_rejection_preserves_setup_key() {
		let transport =
			MemoryTransport::new(WgKeyPair::generate(), 0).with_login_rejection("expired setup key");
		let mut client = client_with(transport);
		let mut config = NodeConfig::default();
		config.setup_key = "SK-expired".to_string();

		client.connect("mgmt.example.com:443").await.unwrap();
		client.fetch_server_key().await.unwrap();

		let err = client.login(&mut config).await.unwrap_err();
		assert!(matches!(err, MgmtError::Auth(_)));
		assert_eq!(config.setup_key, "SK-expired");
	}

	#[tokio::test]
	async fn truncated_stream_envelope_is_fatal() {
		let transport = MemoryTransport::new(WgKeyPair::generate(), 0)
			.with_login_response(login_response())
			.with_raw_sync_body(vec![0u8; 10]);

		let mut client = client_with(transport);
		let mut config = NodeConfig::default();
		config.setup_key = "SK-1".to_string();

		client.connect("mgmt.example.com:443").await.unwrap();
		client.fetch_server_key().await.unwrap();
		client.login(&mut config).await.unwrap();
		let mut stream = client.open_sync().await.unwrap();

		let err = client.next_network_map(&mut stream).await.unwrap_err();
		assert!(matches!(err, MgmtError::Crypto(_)));
		assert!(!err.is_recoverable());
		assert_eq!(client.state(), SessionState::Failed);
	}

	#[tokio::test]
	async fn malformed_sync_plaintext_is_protocol_error() {
		// The frame decrypts cleanly but its plaintext is not a sync
		// response.
		let transport = MemoryTransport::new(WgKeyPair::generate(), 0)
			.with_login_response(login_response())
			.with_raw_sync_plaintext(b"config dump: nothing useful".to_vec());

		let mut client = client_with(transport);
		let mut config = NodeConfig::default();
		config.setup_key = "SK-1".to_string();

		client.connect("mgmt.example.com:443").await.unwrap();
		client.fetch_server_key().await.unwrap();
		client.login(&mut config).await.unwrap();
		let mut stream = client.open_sync().await.unwrap();

		let err = client.next_network_map(&mut stream).await.unwrap_err();
		assert!(matches!(err, MgmtError::Protocol(_)));
		assert!(!err.is_recoverable());
		assert_eq!(client.state(), SessionState::Failed);

		// The diagnostic names the message kind, never the plaintext.
		let message = err.to_string();
		assert!(message.contains("sync response"));
		assert!(!message.contains("config dump"));
	}

	#[tokio::test]
	async fn elements_without_map_are_skipped() {
		let transport = MemoryTransport::new(WgKeyPair::generate(), 0)
			.with_login_response(login_response())
			.with_sync_response(SyncResponse { network_map: None })
			.with_sync_response(sync_with_peer(9, vec![]));

		let mut client = client_with(transport);
		let mut config = NodeConfig::default();
		config.setup_key = "SK-1".to_string();

		client.connect("mgmt.example.com:443").await.unwrap();
		client.fetch_server_key().await.unwrap();
		client.login(&mut config).await.unwrap();
		let mut stream = client.open_sync().await.unwrap();

		let map = client.next_network_map(&mut stream).await.unwrap().unwrap();
		assert_eq!(map.serial, 9);
	}

	#[test]
	fn stub_map_is_empty() {
		let map = stub_network_map();
		assert_eq!(map.serial, 0);
		assert!(map.remote_peers.is_empty());
		assert!(map.routes.is_empty());
	}
}
