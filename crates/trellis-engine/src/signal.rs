// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed boundary to the peer-to-peer rendezvous channel.
//!
//! Endpoint discovery is out of scope for this client; the boundary exists
//! so the driver loop has a place to hand the signal URI from login.

use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SignalClient {
	uri: String,
	connected: bool,
}

impl SignalClient {
	pub fn new(uri: impl Into<String>) -> Self {
		Self {
			uri: uri.into(),
			connected: false,
		}
	}

	pub fn uri(&self) -> &str {
		&self.uri
	}

	pub fn set_uri(&mut self, uri: impl Into<String>) {
		self.uri = uri.into();
	}

	/// Placeholder connect: records the intent, performs no I/O.
	pub async fn connect(&mut self) {
		debug!(uri = %self.uri, "signal channel not active in this client");
		self.connected = true;
	}

	pub fn is_connected(&self) -> bool {
		self.connected
	}
}
