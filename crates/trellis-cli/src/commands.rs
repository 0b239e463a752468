// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use clap::Args;
use console::style;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, instrument};
use trellis_config::{default_config_path, NodeConfig};
use trellis_engine::{Engine, EngineError, HostCapability, WgApplier};
use trellis_mgmt::{HttpTransport, ManagementClient};

#[derive(Debug, Clone, Args)]
pub struct UpArgs {
	/// One-time setup key for first registration
	#[arg(long)]
	pub setup_key: Option<String>,
}

fn engine_diag(error: EngineError) -> anyhow::Error {
	anyhow::anyhow!("[{}] {}", error.subsystem(), error)
}

fn config_diag(error: impl std::fmt::Display) -> anyhow::Error {
	anyhow::anyhow!("[config] {}", error)
}

fn resolve_config_path(config: Option<PathBuf>) -> anyhow::Result<PathBuf> {
	match config {
		Some(path) => Ok(path),
		None => default_config_path().map_err(config_diag),
	}
}

/// Loads an existing config; a missing file is an operator error for every
/// command except `up`.
async fn load_existing(path: &PathBuf) -> anyhow::Result<NodeConfig> {
	if !path.exists() {
		return Err(config_diag(format!("config file not found: {}", path.display())));
	}
	NodeConfig::load(path).await.map_err(config_diag)
}

#[instrument(skip(args, config_path))]
pub async fn handle_up(args: UpArgs, config_path: Option<PathBuf>) -> anyhow::Result<()> {
	let path = resolve_config_path(config_path)?;
	let mut config = NodeConfig::load_or_init(&path).await.map_err(config_diag)?;

	if let Some(setup_key) = args.setup_key {
		config.setup_key = setup_key;
	}

	let keypair = config.ensure_key().map_err(config_diag)?;
	config.save(&path).await.map_err(config_diag)?;
	info!(public_key = %keypair.public_key(), "node identity ready");

	let transport = HttpTransport::new().map_err(|e| anyhow::anyhow!("[mgmt] {}", e))?;
	let client = ManagementClient::new(transport, keypair);
	let applier = WgApplier::new(HostCapability::probe());

	println!(
		"{} Bringing overlay up ({})",
		style("→").yellow(),
		style(&config.wg_iface_name).cyan()
	);

	let mut engine = Engine::new(client, applier, config, path);
	let status = engine.apply_status();
	let (shutdown_tx, shutdown_rx) = watch::channel(false);

	let run = engine.run(shutdown_rx);
	tokio::pin!(run);

	let result = tokio::select! {
		_ = tokio::signal::ctrl_c() => {
			println!("\n{} Shutting down...", style("→").yellow());
			let _ = shutdown_tx.send(true);
			run.await
		}
		result = &mut run => result,
	};
	result.map_err(engine_diag)?;

	let last = status.borrow().clone();
	println!("{} Overlay down", style("✓").green().bold());
	println!("  Last applied serial: {}", style(last.serial).cyan());
	if last.failures > 0 {
		println!(
			"  {} {} host step(s) failed in the last apply pass",
			style("!").red().bold(),
			last.failures
		);
	}
	Ok(())
}

/// Checks interface presence the way an operator would.
async fn interface_state(iface: &str) -> &'static str {
	let probe = tokio::process::Command::new("ip")
		.args(["link", "show", "dev", iface])
		.stdout(std::process::Stdio::null())
		.stderr(std::process::Stdio::null())
		.status()
		.await;
	match probe {
		Ok(status) if status.success() => "running",
		Ok(_) => "not running",
		Err(_) => "unknown",
	}
}

#[instrument(skip(config_path))]
pub async fn handle_down(config_path: Option<PathBuf>) -> anyhow::Result<()> {
	let path = resolve_config_path(config_path)?;
	let config = load_existing(&path).await?;

	let applier = WgApplier::new(HostCapability::probe());
	applier
		.teardown(&config.wg_iface_name)
		.await
		.map_err(|e| anyhow::anyhow!("[wg] {}", e))?;

	println!(
		"{} Interface {} removed",
		style("✓").green().bold(),
		style(&config.wg_iface_name).cyan()
	);
	Ok(())
}

#[instrument(skip(config_path))]
pub async fn handle_status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
	let path = resolve_config_path(config_path)?;
	let config = load_existing(&path).await?;

	let state_dir = path
		.parent()
		.map(|p| p.to_path_buf())
		.unwrap_or_else(|| PathBuf::from("."));
	let peers_file = trellis_config::read_peers(&state_dir).await;
	let routes_file = trellis_config::read_routes(&state_dir).await;

	let public_key = if config.wg_private_key.is_empty() {
		style("(no key yet)").dim().to_string()
	} else {
		match trellis_keys::WgKeyPair::from_base64(&config.wg_private_key) {
			Ok(keypair) => keypair.public_key().to_base64(),
			Err(e) => return Err(config_diag(e)),
		}
	};

	println!("status    : {}", interface_state(&config.wg_iface_name).await);
	println!("interface : {}", config.wg_iface_name);
	println!("address   : {}", config.wg_address);
	println!("port      : {}", config.wg_listen_port);
	println!("public key: {}", public_key);
	println!("management: {}", config.management_url);

	match &peers_file {
		Some(file) => {
			println!("peers     : {}", file.peers.len());
			for peer in &file.peers {
				println!("  - {} {}", peer.public_key, peer.allowed_ips);
			}
		}
		None => println!("peers     : {}", config.peers.len()),
	}
	match &routes_file {
		Some(file) => println!("routes    : {}", file.routes.len()),
		None => println!("routes    : {}", config.routes.len()),
	}
	if let Some(file) = &peers_file {
		println!("last sync : {}", file.updated_at.to_rfc3339());
	}

	Ok(())
}
