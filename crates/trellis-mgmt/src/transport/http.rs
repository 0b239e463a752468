// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::{EnvelopeStream, ManagementTransport, TransportTarget};
use crate::error::TransportError;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use tracing::{debug, instrument, warn};
use trellis_proto::{Envelope, ServerKeyResponse};
use url::Url;

const SERVER_KEY_PATH: &str = "/api/mgmt/server-key";
const HEALTHZ_PATH: &str = "/api/mgmt/healthz";
const LOGIN_PATH: &str = "/api/mgmt/login";
const SYNC_PATH: &str = "/api/mgmt/sync";

/// Builds the shared HTTP client with the project User-Agent.
pub fn new_client() -> Result<Client, TransportError> {
	Client::builder()
		.user_agent(format!("trellis/{}", env!("CARGO_PKG_VERSION")))
		.build()
		.map_err(TransportError::Http)
}

/// Real-network transport: unary RPCs as JSON POST/GET, the sync stream as
/// server-sent events. TLS verification follows the dialed scheme.
pub struct HttpTransport {
	http: Client,
	base_url: Option<Url>,
}

impl HttpTransport {
	pub fn new() -> Result<Self, TransportError> {
		Ok(Self {
			http: new_client()?,
			base_url: None,
		})
	}

	fn url(&self, path: &str) -> Result<Url, TransportError> {
		let base = self.base_url.as_ref().ok_or(TransportError::NotConnected)?;
		base.join(path)
			.map_err(|e| TransportError::Dial(e.to_string()))
	}

	async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
		if response.status().is_success() {
			return Ok(response);
		}
		let status = response.status().as_u16();
		let message = response.text().await.unwrap_or_default();
		Err(TransportError::Status { status, message })
	}
}

#[async_trait]
impl ManagementTransport for HttpTransport {
	#[instrument(skip(self), fields(authority = %target.authority, tls = target.tls))]
	async fn open(&mut self, target: &TransportTarget) -> Result<(), TransportError> {
		let base: Url = target
			.base_url()
			.parse()
			.map_err(|e: url::ParseError| TransportError::Dial(e.to_string()))?;
		self.base_url = Some(base);
		debug!("management channel opened");
		Ok(())
	}

	async fn get_server_key(&self) -> Result<ServerKeyResponse, TransportError> {
		let response = self.http.get(self.url(SERVER_KEY_PATH)?).send().await?;
		let response = Self::check_status(response).await?;
		Ok(response.json().await?)
	}

	async fn is_healthy(&self) -> Result<(), TransportError> {
		let response = self.http.get(self.url(HEALTHZ_PATH)?).send().await?;
		Self::check_status(response).await?;
		Ok(())
	}

	async fn login(&self, envelope: &Envelope) -> Result<Envelope, TransportError> {
		let response = self
			.http
			.post(self.url(LOGIN_PATH)?)
			.json(envelope)
			.send()
			.await?;
		let response = Self::check_status(response).await?;
		Ok(response.json().await?)
	}

	async fn sync(&self, envelope: &Envelope) -> Result<EnvelopeStream, TransportError> {
		let response = self
			.http
			.post(self.url(SYNC_PATH)?)
			.header("Accept", "text/event-stream")
			.json(envelope)
			.send()
			.await?;
		let response = Self::check_status(response).await?;

		let stream = response
			.bytes_stream()
			.eventsource()
			.filter_map(|result| async move {
				match result {
					Ok(event) => {
						if !event.event.is_empty() && event.event != "message" {
							return None;
						}
						match serde_json::from_str::<Envelope>(&event.data) {
							Ok(envelope) => Some(Ok(envelope)),
							Err(e) => {
								warn!(error = %e, "unparsable sync stream element");
								Some(Err(TransportError::Stream(e.to_string())))
							}
						}
					}
					Err(e) => Some(Err(TransportError::Stream(e.to_string()))),
				}
			});

		Ok(stream.boxed())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn calls_before_open_are_rejected() {
		let transport = HttpTransport::new().unwrap();
		assert!(matches!(
			transport.get_server_key().await,
			Err(TransportError::NotConnected)
		));
	}

	#[tokio::test]
	async fn open_accepts_bare_authority() {
		let mut transport = HttpTransport::new().unwrap();
		let target = TransportTarget::parse("127.0.0.1:33073");
		transport.open(&target).await.unwrap();
		assert_eq!(
			transport.url(SERVER_KEY_PATH).unwrap().as_str(),
			"http://127.0.0.1:33073/api/mgmt/server-key"
		);
	}
}
