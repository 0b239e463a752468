// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::{EnvelopeStream, ManagementTransport, TransportTarget};
use crate::error::TransportError;
use async_trait::async_trait;
use futures::StreamExt;
use trellis_keys::{WgKeyPair, WgPublicKey};
use trellis_proto::{Envelope, LoginRequest, LoginResponse, ServerKeyResponse, SyncResponse};

/// Deterministic in-memory management server.
///
/// Holds a real server key pair and runs the same seal/open path as the wire,
/// so session-layer tests exercise encryption end to end. Sync frames are
/// replayed in order on every `sync` call; raw bodies can be appended to
/// inject malformed envelopes.
pub struct MemoryTransport {
	server_keys: WgKeyPair,
	version: i32,
	login_response: LoginResponse,
	sync_responses: Vec<SyncResponse>,
	raw_sync_plaintexts: Vec<Vec<u8>>,
	raw_sync_bodies: Vec<Vec<u8>>,
	reject_login: Option<String>,
	fail_dial: bool,
	opened: bool,
}

impl MemoryTransport {
	pub fn new(server_keys: WgKeyPair, version: i32) -> Self {
		Self {
			server_keys,
			version,
			login_response: LoginResponse {
				peer_config: None,
				trellis_config: None,
			},
			sync_responses: Vec::new(),
			raw_sync_plaintexts: Vec::new(),
			raw_sync_bodies: Vec::new(),
			reject_login: None,
			fail_dial: false,
			opened: false,
		}
	}

	pub fn server_public_key(&self) -> &WgPublicKey {
		self.server_keys.public_key()
	}

	pub fn with_login_response(mut self, response: LoginResponse) -> Self {
		self.login_response = response;
		self
	}

	pub fn with_sync_response(mut self, response: SyncResponse) -> Self {
		self.sync_responses.push(response);
		self
	}

	/// Appends a frame whose plaintext is sealed verbatim, for fault
	/// injection (decrypts fine, parses as nothing).
	pub fn with_raw_sync_plaintext(mut self, plaintext: Vec<u8>) -> Self {
		self.raw_sync_plaintexts.push(plaintext);
		self
	}

	/// Appends an unsealed body after the scripted frames, for fault
	/// injection (truncated or tampered envelopes).
	pub fn with_raw_sync_body(mut self, body: Vec<u8>) -> Self {
		self.raw_sync_bodies.push(body);
		self
	}

	pub fn with_login_rejection(mut self, message: impl Into<String>) -> Self {
		self.reject_login = Some(message.into());
		self
	}

	pub fn with_dial_failure(mut self) -> Self {
		self.fail_dial = true;
		self
	}

	fn sender_key(envelope: &Envelope) -> Result<WgPublicKey, TransportError> {
		WgPublicKey::from_base64(&envelope.wg_pub_key)
			.map_err(|e| TransportError::Status {
				status: 400,
				message: format!("bad sender key: {e}"),
			})
	}

	fn seal_to<T: serde::Serialize>(
		&self,
		message: &T,
		client_pub: &WgPublicKey,
	) -> Result<Envelope, TransportError> {
		let body = trellis_crypto::seal_message(message, client_pub, self.server_keys.private_key())
			.map_err(|e| TransportError::Status {
				status: 500,
				message: e.to_string(),
			})?;
		Ok(Envelope {
			wg_pub_key: self.server_keys.public_key().to_base64(),
			body,
			version: self.version,
		})
	}
}

#[async_trait]
impl ManagementTransport for MemoryTransport {
	async fn open(&mut self, _target: &TransportTarget) -> Result<(), TransportError> {
		if self.fail_dial {
			return Err(TransportError::Dial("in-memory dial refused".to_string()));
		}
		self.opened = true;
		Ok(())
	}

	async fn get_server_key(&self) -> Result<ServerKeyResponse, TransportError> {
		if !self.opened {
			return Err(TransportError::NotConnected);
		}
		Ok(ServerKeyResponse {
			key: self.server_keys.public_key().to_base64(),
			version: self.version,
		})
	}

	async fn is_healthy(&self) -> Result<(), TransportError> {
		if !self.opened {
			return Err(TransportError::NotConnected);
		}
		Ok(())
	}

	async fn login(&self, envelope: &Envelope) -> Result<Envelope, TransportError> {
		if !self.opened {
			return Err(TransportError::NotConnected);
		}
		let client_pub = Self::sender_key(envelope)?;

		let request: LoginRequest = trellis_crypto::open_message(
			&envelope.body,
			&client_pub,
			self.server_keys.private_key(),
		)
		.map_err(|e| TransportError::Status {
			status: 400,
			message: e.to_string(),
		})?;

		// A node announces the byte form of its base64 key; it must match
		// the envelope sender.
		if request.peer_keys.wg_pub_key.as_slice() != envelope.wg_pub_key.as_bytes() {
			return Err(TransportError::Status {
				status: 400,
				message: "peer key does not match envelope sender".to_string(),
			});
		}

		if let Some(message) = &self.reject_login {
			return Err(TransportError::Status {
				status: 401,
				message: message.clone(),
			});
		}
		if request.setup_key.is_empty() {
			return Err(TransportError::Status {
				status: 401,
				message: "unknown peer and no setup key".to_string(),
			});
		}

		self.seal_to(&self.login_response, &client_pub)
	}

	async fn sync(&self, envelope: &Envelope) -> Result<EnvelopeStream, TransportError> {
		if !self.opened {
			return Err(TransportError::NotConnected);
		}
		let client_pub = Self::sender_key(envelope)?;

		// Validate the request seal the way a real server would.
		let _request: trellis_proto::SyncRequest = trellis_crypto::open_message(
			&envelope.body,
			&client_pub,
			self.server_keys.private_key(),
		)
		.map_err(|e| TransportError::Status {
			status: 400,
			message: e.to_string(),
		})?;

		let mut frames = Vec::new();
		for response in &self.sync_responses {
			frames.push(Ok(self.seal_to(response, &client_pub)?));
		}
		for plaintext in &self.raw_sync_plaintexts {
			let body = trellis_crypto::seal(plaintext, &client_pub, self.server_keys.private_key())
				.map_err(|e| TransportError::Status {
					status: 500,
					message: e.to_string(),
				})?;
			frames.push(Ok(Envelope {
				wg_pub_key: self.server_keys.public_key().to_base64(),
				body,
				version: self.version,
			}));
		}
		for body in &self.raw_sync_bodies {
			frames.push(Ok(Envelope {
				wg_pub_key: self.server_keys.public_key().to_base64(),
				body: body.clone(),
				version: self.version,
			}));
		}

		Ok(futures::stream::iter(frames).boxed())
	}
}
