// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::capability::HostCapability;
use crate::error::ApplyError;
use crate::plan::ApplyPlan;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use trellis_config::NodeConfig;
use trellis_proto::RemotePeer;

/// Outcome of one apply pass. Failures are per item; one failed peer never
/// aborts the rest.
#[derive(Debug, Default)]
pub struct ApplyReport {
	/// Host mutations actually attempted.
	pub mutations: usize,
	/// True when the capability forbids host calls and the pass was a no-op.
	pub skipped: bool,
	pub peer_failures: Vec<(String, ApplyError)>,
	pub route_failures: Vec<(String, ApplyError)>,
}

impl ApplyReport {
	pub fn failure_count(&self) -> usize {
		self.peer_failures.len() + self.route_failures.len()
	}
}

/// Seam over host command execution, so tests can observe the exact
/// sequence without touching the system.
#[async_trait]
trait CommandRunner: Send + Sync {
	async fn run(&self, program: &str, args: &[&str]) -> Result<(), ApplyError>;
}

struct HostCommandRunner;

#[async_trait]
impl CommandRunner for HostCommandRunner {
	async fn run(&self, program: &str, args: &[&str]) -> Result<(), ApplyError> {
		let output = Command::new(program)
			.args(args)
			.stdin(Stdio::null())
			.output()
			.await?;
		if output.status.success() {
			return Ok(());
		}
		Err(ApplyError::Command {
			program: program.to_string(),
			args: args.join(" "),
			detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
		})
	}
}

/// Privileged effector: reconciles the host WireGuard interface and routing
/// table through the `ip` and `wg` tools.
///
/// Sequence per pass: interface presence, address, key and listen port,
/// then the peer set, then link up, then routes.
#[derive(Clone)]
pub struct WgApplier {
	capability: HostCapability,
	runner: Arc<dyn CommandRunner>,
}

impl WgApplier {
	pub fn new(capability: HostCapability) -> Self {
		Self {
			capability,
			runner: Arc::new(HostCommandRunner),
		}
	}

	#[cfg(test)]
	fn with_runner(capability: HostCapability, runner: Arc<dyn CommandRunner>) -> Self {
		Self { capability, runner }
	}

	/// Interface presence, address, key, port. Pre-existing link or address
	/// is expected on re-apply and tolerated.
	async fn ensure_interface(
		&self,
		config: &NodeConfig,
		report: &mut ApplyReport,
	) -> Result<(), ApplyError> {
		let iface = config.wg_iface_name.as_str();

		report.mutations += 1;
		if let Err(e) = self
			.runner
			.run("ip", &["link", "add", "dev", iface, "type", "wireguard"])
			.await
		{
			debug!(iface, error = %e, "link add failed, possibly exists");
		}

		if !config.wg_address.is_empty() {
			report.mutations += 1;
			if let Err(e) = self
				.runner
				.run("ip", &["address", "add", &config.wg_address, "dev", iface])
				.await
			{
				debug!(iface, error = %e, "address add failed, possibly assigned");
			}
		}

		// The key never touches the command line; it goes through a 0600
		// temp file removed when this operation returns.
		let keyfile = tempfile::NamedTempFile::new()?;
		{
			let mut file = tokio::fs::File::create(keyfile.path()).await?;
			file.write_all(config.wg_private_key.as_bytes()).await?;
			file.flush().await?;
		}
		let keyfile_path = keyfile.path().to_string_lossy().into_owned();
		let port = config.wg_listen_port.to_string();
		report.mutations += 1;
		self.runner
			.run(
				"wg",
				&[
					"set",
					iface,
					"private-key",
					&keyfile_path,
					"listen-port",
					&port,
				],
			)
			.await?;

		Ok(())
	}

	async fn apply_peer(&self, iface: &str, peer: &RemotePeer, report: &mut ApplyReport) {
		let allowed = peer.allowed_ips.join(",");
		let keepalive = peer.keepalive_secs().to_string();

		let mut args = vec!["set", iface, "peer", peer.wg_pub_key.as_str()];
		if !allowed.is_empty() {
			args.extend(["allowed-ips", allowed.as_str()]);
		}
		if let Some(endpoint) = &peer.endpoint {
			args.extend(["endpoint", endpoint.as_str(), "persistent-keepalive", keepalive.as_str()]);
		}

		report.mutations += 1;
		if let Err(e) = self.runner.run("wg", &args).await {
			warn!(peer = %peer.wg_pub_key, error = %e, "failed to apply peer");
			report.peer_failures.push((peer.wg_pub_key.clone(), e));
		}
	}

	async fn remove_peer(&self, iface: &str, public_key: &str, report: &mut ApplyReport) {
		report.mutations += 1;
		if let Err(e) = self
			.runner
			.run("wg", &["set", iface, "peer", public_key, "remove"])
			.await
		{
			warn!(peer = %public_key, error = %e, "failed to remove peer");
			report.peer_failures.push((public_key.to_string(), e));
		}
	}

	/// Executes a plan. An empty plan performs zero host mutations; an
	/// unprivileged capability yields a logged no-op.
	#[instrument(skip(self, config, plan), fields(iface = %config.wg_iface_name))]
	pub async fn apply(&self, config: &NodeConfig, plan: &ApplyPlan) -> Result<ApplyReport, ApplyError> {
		let mut report = ApplyReport::default();

		if plan.is_empty() {
			debug!("plan is empty, host state already converged");
			return Ok(report);
		}

		if !self.capability.can_configure_host() {
			info!("not privileged, skipping host apply (desired state tracked only)");
			report.skipped = true;
			return Ok(report);
		}

		let iface = config.wg_iface_name.clone();

		self.ensure_interface(config, &mut report).await?;

		for peer in plan.peers_to_add.iter().chain(&plan.peers_to_update) {
			self.apply_peer(&iface, peer, &mut report).await;
		}
		for public_key in &plan.peers_to_remove {
			self.remove_peer(&iface, public_key, &mut report).await;
		}

		// The link comes up only once the peer set is in place.
		report.mutations += 1;
		self.runner
			.run("ip", &["link", "set", "dev", &iface, "up"])
			.await?;

		for route in &plan.routes_to_add {
			report.mutations += 1;
			if let Err(e) = self
				.runner
				.run("ip", &["route", "add", &route.network, "dev", &iface])
				.await
			{
				debug!(route = %route.network, error = %e, "route add failed, possibly present");
				report.route_failures.push((route.network.clone(), e));
			}
		}
		for network in &plan.routes_to_remove {
			report.mutations += 1;
			if let Err(e) = self
				.runner
				.run("ip", &["route", "del", network, "dev", &iface])
				.await
			{
				warn!(route = %network, error = %e, "failed to remove route");
				report.route_failures.push((network.clone(), e));
			}
		}

		info!(
			mutations = report.mutations,
			failures = report.failure_count(),
			"applied network map"
		);
		Ok(report)
	}

	/// Removes the interface; routes go with it.
	#[instrument(skip(self))]
	pub async fn teardown(&self, iface: &str) -> Result<(), ApplyError> {
		if !self.capability.can_configure_host() {
			debug!("not privileged, nothing to tear down");
			return Ok(());
		}
		if iface.is_empty() {
			return Ok(());
		}
		self.runner
			.run("ip", &["link", "del", "dev", iface])
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::plan::plan;
	use trellis_proto::{NetworkMap, Route};

	#[derive(Default)]
	struct RecordingRunner {
		calls: std::sync::Mutex<Vec<String>>,
	}

	impl RecordingRunner {
		fn calls(&self) -> Vec<String> {
			self.calls.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl CommandRunner for RecordingRunner {
		async fn run(&self, program: &str, args: &[&str]) -> Result<(), ApplyError> {
			self.calls
				.lock()
				.unwrap()
				.push(format!("{} {}", program, args.join(" ")));
			Ok(())
		}
	}

	fn sample_map() -> NetworkMap {
		NetworkMap {
			serial: 1,
			peer_config: None,
			remote_peers: vec![RemotePeer {
				wg_pub_key: "K1".to_string(),
				allowed_ips: vec!["100.64.0.2/32".to_string()],
				endpoint: None,
				keepalive: None,
			}],
			routes: vec![Route {
				network: "10.0.0.0/24".to_string(),
				metric: None,
			}],
		}
	}

	fn sample_plan() -> ApplyPlan {
		plan(&NetworkMap::default(), &sample_map())
	}

	#[tokio::test]
	async fn empty_plan_is_zero_mutations() {
		let applier = WgApplier::new(HostCapability::privileged());
		let report = applier
			.apply(&NodeConfig::default(), &ApplyPlan::default())
			.await
			.unwrap();
		assert_eq!(report.mutations, 0);
		assert!(!report.skipped);
	}

	#[tokio::test]
	async fn unprivileged_apply_is_noop() {
		let applier = WgApplier::new(HostCapability::unprivileged());
		let report = applier
			.apply(&NodeConfig::default(), &sample_plan())
			.await
			.unwrap();
		assert_eq!(report.mutations, 0);
		assert!(report.skipped);
		assert_eq!(report.failure_count(), 0);
	}

	#[tokio::test]
	async fn unprivileged_teardown_is_noop() {
		let applier = WgApplier::new(HostCapability::unprivileged());
		applier.teardown("wtnb0").await.unwrap();
	}

	// Key and port are set first, then peers, then link up, then routes.
	#[tokio::test]
	async fn peers_are_configured_before_link_up_and_routes() {
		let runner = Arc::new(RecordingRunner::default());
		let applier = WgApplier::with_runner(HostCapability::privileged(), runner.clone());

		applier
			.apply(&NodeConfig::default(), &sample_plan())
			.await
			.unwrap();

		let calls = runner.calls();
		let position = |needle: &str| {
			calls
				.iter()
				.position(|call| call.contains(needle))
				.unwrap_or_else(|| panic!("no call matching {needle:?} in {calls:?}"))
		};

		let key_set = position("private-key");
		let peer_set = position("peer K1");
		let link_up = position("link set dev wtnb0 up");
		let route_add = position("route add 10.0.0.0/24");

		assert!(key_set < peer_set);
		assert!(peer_set < link_up);
		assert!(link_up < route_add);
	}

	#[tokio::test]
	async fn peer_removal_happens_before_link_up() {
		let runner = Arc::new(RecordingRunner::default());
		let applier = WgApplier::with_runner(HostCapability::privileged(), runner.clone());

		// Going from one peer to none: the removal is part of the peer
		// phase, ahead of link up.
		let removal_plan = plan(&sample_map(), &NetworkMap::default());
		applier
			.apply(&NodeConfig::default(), &removal_plan)
			.await
			.unwrap();

		let calls = runner.calls();
		let remove = calls
			.iter()
			.position(|c| c.contains("peer K1 remove"))
			.unwrap();
		let link_up = calls
			.iter()
			.position(|c| c.contains("link set dev wtnb0 up"))
			.unwrap();
		assert!(remove < link_up);
	}

	// Re-applying the same snapshot plans nothing, so the second pass
	// performs zero mutations regardless of privilege.
	#[tokio::test]
	async fn reapply_same_snapshot_is_stable() {
		let next = sample_map();
		let second_pass = plan(&next, &next);
		let applier = WgApplier::new(HostCapability::privileged());
		let report = applier
			.apply(&NodeConfig::default(), &second_pass)
			.await
			.unwrap();
		assert_eq!(report.mutations, 0);
	}
}
