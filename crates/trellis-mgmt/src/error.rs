// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("dial failed: {0}")]
	Dial(String),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("server returned status {status}: {message}")]
	Status { status: u16, message: String },

	#[error("{op} timed out")]
	Timeout { op: &'static str },

	#[error("stream error: {0}")]
	Stream(String),

	#[error("transport not connected")]
	NotConnected,
}

impl TransportError {
	/// Auth rejections surface as HTTP status at the transport layer; the
	/// session layer promotes them to a fatal error.
	pub fn auth_rejection(&self) -> Option<(u16, &str)> {
		match self {
			TransportError::Status { status, message } if *status == 401 || *status == 403 => {
				Some((*status, message.as_str()))
			}
			_ => None,
		}
	}
}

#[derive(Debug, Error)]
pub enum MgmtError {
	#[error("transport error: {0}")]
	Transport(#[from] TransportError),

	#[error("crypto error: {0}")]
	Crypto(#[from] trellis_crypto::CryptoError),

	#[error("key error: {0}")]
	Key(#[from] trellis_keys::KeyError),

	// Names the offending message kind, never its decrypted contents.
	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("server rejected login: {0}")]
	Auth(String),

	#[error("cannot {action} in session state {state}")]
	BadState {
		state: crate::session::SessionState,
		action: &'static str,
	},
}

impl MgmtError {
	/// Recoverable errors trigger backoff and re-dial; everything else is
	/// fatal for the session.
	pub fn is_recoverable(&self) -> bool {
		matches!(self, MgmtError::Transport(t) if t.auth_rejection().is_none())
	}
}

pub type Result<T> = std::result::Result<T, MgmtError>;
