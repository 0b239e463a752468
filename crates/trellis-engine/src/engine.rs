// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::applier::WgApplier;
use crate::error::{EngineError, Result};
use crate::plan::{canonical_cidr, plan};
use crate::signal::SignalClient;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use trellis_config::{self as config_store, NodeConfig, Peer};
use trellis_mgmt::{stub_network_map, Backoff, ManagementClient, ManagementTransport, MgmtError};
use trellis_proto::NetworkMap;

/// Live view of the apply worker, updated after every pass.
#[derive(Debug, Clone, Default)]
pub struct ApplyStatus {
	pub serial: u64,
	pub peer_count: usize,
	pub route_count: usize,
	pub passes: u64,
	pub failures: usize,
	pub skipped: bool,
	pub last_applied_at: Option<DateTime<Utc>>,
}

/// The driver loop: owns the node config, the management session and the
/// snapshot mailbox feeding the host-effect worker.
pub struct Engine<T> {
	client: ManagementClient<T>,
	applier: WgApplier,
	signal: SignalClient,
	config: NodeConfig,
	config_path: PathBuf,
	mailbox_tx: watch::Sender<Option<(NodeConfig, NetworkMap)>>,
	mailbox_rx: watch::Receiver<Option<(NodeConfig, NetworkMap)>>,
	// Handed to the apply worker when the engine starts.
	status_tx: Option<watch::Sender<ApplyStatus>>,
	status_rx: watch::Receiver<ApplyStatus>,
}

impl<T: ManagementTransport> Engine<T> {
	pub fn new(
		client: ManagementClient<T>,
		applier: WgApplier,
		config: NodeConfig,
		config_path: PathBuf,
	) -> Self {
		let (mailbox_tx, mailbox_rx) = watch::channel(None);
		let (status_tx, status_rx) = watch::channel(ApplyStatus::default());
		let signal = SignalClient::new(config.signal_url.clone());
		Self {
			client,
			applier,
			signal,
			config,
			config_path,
			mailbox_tx,
			mailbox_rx,
			status_tx: Some(status_tx),
			status_rx,
		}
	}

	pub fn config(&self) -> &NodeConfig {
		&self.config
	}

	pub fn session_state(&self) -> trellis_mgmt::SessionState {
		self.client.state()
	}

	pub fn apply_status(&self) -> watch::Receiver<ApplyStatus> {
		self.status_rx.clone()
	}

	fn state_dir(&self) -> PathBuf {
		self.config_path
			.parent()
			.map(|p| p.to_path_buf())
			.unwrap_or_else(|| PathBuf::from("."))
	}

	/// Dial, fetch the server key and log in, persisting the per-node
	/// settings the server handed back.
	#[instrument(skip(self))]
	async fn register(&mut self) -> Result<()> {
		self.client.connect(&self.config.management_url).await?;
		self.client.fetch_server_key().await?;
		self.client.login(&mut self.config).await?;
		self.config.save(&self.config_path).await?;
		Ok(())
	}

	/// Projects a received snapshot onto disk state and posts it to the
	/// apply mailbox. The mailbox is single-slot: a snapshot arriving while
	/// the worker is busy supersedes any undelivered one.
	async fn ingest(&mut self, map: NetworkMap) -> Result<()> {
		if let Some(peer_config) = &map.peer_config {
			if !peer_config.address.is_empty() {
				self.config.wg_address = peer_config.address.clone();
			}
			if !peer_config.dns.is_empty() {
				self.config.dns = peer_config.dns.clone();
			}
		}

		self.config.peers = map
			.remote_peers
			.iter()
			.map(|peer| Peer {
				id: peer.wg_pub_key.clone(),
				public_key: peer.wg_pub_key.clone(),
				allowed_ips: peer.allowed_ips.join(","),
				endpoint: peer.endpoint.clone().unwrap_or_default(),
			})
			.collect();
		self.config.routes = map
			.routes
			.iter()
			.map(|route| canonical_cidr(&route.network))
			.collect();

		self.config.save(&self.config_path).await?;
		let state_dir = self.state_dir();
		config_store::write_peers(&state_dir, &self.config.peers).await?;
		config_store::write_routes(&state_dir, &self.config.routes).await?;

		debug!(serial = map.serial, "snapshot ingested, posting to apply mailbox");
		self.mailbox_tx
			.send_replace(Some((self.config.clone(), map)));
		Ok(())
	}

	/// Runs the session until cancellation or a fatal error. On cancellation
	/// the worker drains, the interface is torn down and `Ok` is returned.
	#[instrument(skip(self, shutdown))]
	pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
		let status_tx = match self.status_tx.take() {
			Some(tx) => tx,
			None => {
				// A restarted engine gets a fresh status channel.
				let (tx, rx) = watch::channel(ApplyStatus::default());
				self.status_rx = rx;
				tx
			}
		};
		let worker = tokio::spawn(apply_worker(
			self.applier.clone(),
			self.mailbox_rx.clone(),
			status_tx,
			shutdown.clone(),
		));

		let registered = match self.register().await {
			Ok(()) => true,
			Err(e) if is_recoverable(&e) && self.config.fallback_stub => {
				warn!(error = %e, "management unreachable, entering offline stub mode");
				false
			}
			Err(e) => {
				worker.abort();
				return Err(e);
			}
		};

		self.signal.set_uri(self.config.signal_url.clone());
		self.signal.connect().await;

		let result = if registered {
			self.sync_loop(&mut shutdown).await
		} else {
			self.stub_loop(&mut shutdown).await
		};

		match result {
			Ok(()) => {
				// Cancellation: let the worker finish its current pass, then
				// remove the interface.
				let _ = worker.await;
				if let Err(e) = self.applier.teardown(&self.config.wg_iface_name).await {
					warn!(error = %e, "teardown failed");
				}
				info!("engine stopped");
				Ok(())
			}
			Err(e) => {
				worker.abort();
				Err(e)
			}
		}
	}

	async fn stub_loop(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
		self.ingest(stub_network_map()).await?;
		while !*shutdown.borrow() {
			if shutdown.changed().await.is_err() {
				break;
			}
		}
		Ok(())
	}

	async fn sync_loop(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
		let mut backoff = Backoff::new();

		'session: loop {
			let mut stream = match self.client.open_sync().await {
				Ok(stream) => stream,
				Err(e) if e.is_recoverable() => {
					warn!(error = %e, "sync open failed, backing off");
					if wait_backoff(&mut backoff, shutdown).await {
						break 'session;
					}
					continue 'session;
				}
				Err(e) => return Err(e.into()),
			};

			loop {
				tokio::select! {
					biased;

					changed = shutdown.changed() => {
						// A closed shutdown channel counts as cancellation.
						if changed.is_err() || *shutdown.borrow() {
							info!("shutdown signal received");
							break 'session;
						}
					}

					result = self.client.next_network_map(&mut stream) => {
						match result {
							Ok(Some(map)) => {
								backoff.reset();
								self.ingest(map).await?;
							}
							Ok(None) => {
								info!("sync stream closed, reconnecting");
								if wait_backoff(&mut backoff, shutdown).await {
									break 'session;
								}
								continue 'session;
							}
							Err(e) if e.is_recoverable() => {
								warn!(error = %e, "sync receive failed, reconnecting");
								if wait_backoff(&mut backoff, shutdown).await {
									break 'session;
								}
								continue 'session;
							}
							Err(e) => return Err(e.into()),
						}
					}
				}
			}
		}

		Ok(())
	}
}

fn is_recoverable(error: &EngineError) -> bool {
	matches!(error, EngineError::Mgmt(m) if m.is_recoverable())
}

/// Sleeps out the backoff delay; returns true when shutdown arrived instead.
async fn wait_backoff(backoff: &mut Backoff, shutdown: &mut watch::Receiver<bool>) -> bool {
	let delay = backoff.next_delay();
	tokio::select! {
		biased;
		changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
		_ = tokio::time::sleep(delay) => false,
	}
}

/// Host-effect worker. Reads the latest snapshot from the single-slot
/// mailbox, diffs it against the last applied state and lets the applier
/// converge the host. Snapshots are applied in receive order; an older
/// snapshot superseded in the mailbox is never observed.
async fn apply_worker(
	applier: WgApplier,
	mut mailbox: watch::Receiver<Option<(NodeConfig, NetworkMap)>>,
	status_tx: watch::Sender<ApplyStatus>,
	mut shutdown: watch::Receiver<bool>,
) {
	let mut last_applied = NetworkMap::default();

	loop {
		tokio::select! {
			biased;

			changed = shutdown.changed() => {
				if changed.is_err() || *shutdown.borrow() {
					debug!("apply worker shutting down");
					break;
				}
			}

			changed = mailbox.changed() => {
				if changed.is_err() {
					break;
				}
				let item = mailbox.borrow_and_update().clone();
				let Some((config, map)) = item else { continue };

				let next_plan = plan(&last_applied, &map);
				match applier.apply(&config, &next_plan).await {
					Ok(report) => {
						status_tx.send_modify(|status| {
							status.serial = map.serial;
							status.peer_count = map.remote_peers.len();
							status.route_count = map.routes.len();
							status.passes += 1;
							status.failures = report.failure_count();
							status.skipped = report.skipped;
							status.last_applied_at = Some(Utc::now());
						});
						last_applied = map;
					}
					Err(e) => {
						// Interface-level failure: keep the old baseline so
						// the next snapshot re-plans the missed work.
						warn!(error = %e, "apply pass failed");
						status_tx.send_modify(|status| {
							status.passes += 1;
							status.failures += 1;
							status.last_applied_at = Some(Utc::now());
						});
					}
				}
			}
		}
	}
}
