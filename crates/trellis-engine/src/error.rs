// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// A single failed host-configuration step. Reported per item; never aborts
/// the rest of the snapshot.
#[derive(Debug, Error)]
pub enum ApplyError {
	#[error("{program} {args} failed: {detail}")]
	Command {
		program: String,
		args: String,
		detail: String,
	},

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("management error: {0}")]
	Mgmt(#[from] trellis_mgmt::MgmtError),

	#[error("configuration error: {0}")]
	Config(#[from] trellis_config::ConfigError),

	#[error("key error: {0}")]
	Key(#[from] trellis_keys::KeyError),

	#[error("apply error: {0}")]
	Apply(#[from] ApplyError),
}

impl EngineError {
	/// Subsystem tag for one-line CLI diagnostics.
	pub fn subsystem(&self) -> &'static str {
		match self {
			EngineError::Mgmt(_) => "mgmt",
			EngineError::Config(_) | EngineError::Key(_) => "config",
			EngineError::Apply(_) => "wg",
		}
	}
}

pub type Result<T> = std::result::Result<T, EngineError>;
