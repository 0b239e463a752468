// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "trellis", version, about = "Hub-and-spoke WireGuard overlay client")]
struct Cli {
	/// Path to the node config file (default: user config dir)
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Register with the management service and keep the overlay in sync
	Up(commands::UpArgs),
	/// Tear down the local WireGuard interface
	Down,
	/// Show the node's current overlay state
	Status,
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let cli = Cli::parse();

	let result = match cli.command {
		Commands::Up(args) => commands::handle_up(args, cli.config).await,
		Commands::Down => commands::handle_down(cli.config).await,
		Commands::Status => commands::handle_status(cli.config).await,
	};

	if let Err(error) = result {
		// One line, subsystem-prefixed, never a secret.
		eprintln!("{error:#}");
		std::process::exit(1);
	}
}
