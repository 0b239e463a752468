// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("unparsable config file {path}: {source}")]
	Parse {
		path: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("config encode error: {0}")]
	Encode(#[source] serde_json::Error),

	#[error("no user config directory available")]
	NoConfigDir,
}

pub type Result<T> = std::result::Result<T, ConfigError>;
