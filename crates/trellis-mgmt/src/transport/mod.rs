// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The transport capability seam of the management client.
//!
//! A transport provides `open`, unary calls and one server-streaming call.
//! The real network variant speaks HTTP; the in-memory variant is a
//! deterministic scripted server. The session layer uses both symmetrically.

pub mod http;
pub mod memory;

use crate::error::TransportError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use trellis_proto::{Envelope, ServerKeyResponse};

/// Server-pushed envelopes. The stream ends (`None`) on graceful close.
pub type EnvelopeStream = BoxStream<'static, Result<Envelope, TransportError>>;

/// Where to dial, after scheme normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTarget {
	pub authority: String,
	pub tls: bool,
}

impl TransportTarget {
	/// Strips an optional `https://` / `http://` prefix. `https` selects
	/// verified TLS; `http` or a bare `host:port` selects cleartext.
	pub fn parse(url: &str) -> Self {
		if let Some(rest) = url.strip_prefix("https://") {
			Self {
				authority: rest.trim_end_matches('/').to_string(),
				tls: true,
			}
		} else if let Some(rest) = url.strip_prefix("http://") {
			Self {
				authority: rest.trim_end_matches('/').to_string(),
				tls: false,
			}
		} else {
			Self {
				authority: url.trim_end_matches('/').to_string(),
				tls: false,
			}
		}
	}

	pub fn base_url(&self) -> String {
		let scheme = if self.tls { "https" } else { "http" };
		format!("{}://{}", scheme, self.authority)
	}
}

#[async_trait]
pub trait ManagementTransport: Send + Sync {
	/// Opens the RPC channel. Errors here are dial failures.
	async fn open(&mut self, target: &TransportTarget) -> Result<(), TransportError>;

	/// Unary, unencrypted: the server's advertised key and protocol version.
	async fn get_server_key(&self) -> Result<ServerKeyResponse, TransportError>;

	/// Unary, unencrypted health probe. Callers may fire and forget.
	async fn is_healthy(&self) -> Result<(), TransportError>;

	/// Unary login: sealed request envelope in, sealed response envelope out.
	async fn login(&self, envelope: &Envelope) -> Result<Envelope, TransportError>;

	/// Opens the server-streaming sync call.
	async fn sync(&self, envelope: &Envelope) -> Result<EnvelopeStream, TransportError>;
}
