// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::{Nonce, PublicKey, SalsaBox, SecretKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use trellis_keys::{WgPrivateKey, WgPublicKey};

pub const NONCE_SIZE: usize = 24;

#[derive(Error, Debug)]
pub enum CryptoError {
	#[error("envelope body too short: {0} bytes, need at least {NONCE_SIZE}")]
	Truncated(usize),

	#[error("failed to encrypt message for peer {peer}")]
	Encrypt { peer: String },

	// Deliberately carries no plaintext or ciphertext detail.
	#[error("failed to decrypt message from peer {peer}")]
	Decrypt { peer: String },

	#[error("message encode error: {0}")]
	Encode(#[source] serde_json::Error),

	#[error("message decode error: {0}")]
	Decode(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

fn pair_box(remote_pub: &WgPublicKey, local_priv: &WgPrivateKey) -> SalsaBox {
	let public = PublicKey::from(*remote_pub.as_bytes());
	let secret = SecretKey::from(*local_priv.expose_bytes());
	SalsaBox::new(&public, &secret)
}

/// Seals `plaintext` for `remote_pub` using our private key. The returned
/// body is a fresh 24-byte random nonce followed by the box ciphertext.
pub fn seal(plaintext: &[u8], remote_pub: &WgPublicKey, local_priv: &WgPrivateKey) -> Result<Vec<u8>> {
	let nonce = SalsaBox::generate_nonce(&mut OsRng);
	let ciphertext = pair_box(remote_pub, local_priv)
		.encrypt(&nonce, plaintext)
		.map_err(|_| CryptoError::Encrypt {
			peer: remote_pub.to_base64(),
		})?;

	let mut body = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
	body.extend_from_slice(nonce.as_slice());
	body.extend_from_slice(&ciphertext);
	Ok(body)
}

/// Opens a nonce-prefixed box body produced by the remote side. Any
/// authentication failure is terminal for the message; no plaintext is ever
/// returned on failure.
pub fn open(body: &[u8], remote_pub: &WgPublicKey, local_priv: &WgPrivateKey) -> Result<Vec<u8>> {
	if body.len() < NONCE_SIZE {
		return Err(CryptoError::Truncated(body.len()));
	}
	let (nonce, ciphertext) = body.split_at(NONCE_SIZE);
	pair_box(remote_pub, local_priv)
		.decrypt(Nonce::from_slice(nonce), ciphertext)
		.map_err(|_| CryptoError::Decrypt {
			peer: remote_pub.to_base64(),
		})
}

/// Serializes a protocol message and seals it. Serialization follows struct
/// declaration order, so identical inputs give byte-identical plaintexts.
pub fn seal_message<T: Serialize>(
	message: &T,
	remote_pub: &WgPublicKey,
	local_priv: &WgPrivateKey,
) -> Result<Vec<u8>> {
	let plaintext = serde_json::to_vec(message).map_err(CryptoError::Encode)?;
	seal(&plaintext, remote_pub, local_priv)
}

/// Opens a sealed body and parses the plaintext as a protocol message.
pub fn open_message<T: DeserializeOwned>(
	body: &[u8],
	remote_pub: &WgPublicKey,
	local_priv: &WgPrivateKey,
) -> Result<T> {
	let plaintext = open(body, remote_pub, local_priv)?;
	serde_json::from_slice(&plaintext).map_err(CryptoError::Decode)
}
