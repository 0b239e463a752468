// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use trellis_proto::PeerSystemMeta;

pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Collects the host metadata sent with login and sync requests.
pub fn system_meta() -> PeerSystemMeta {
	PeerSystemMeta {
		hostname: hostname::get()
			.map(|h| h.to_string_lossy().into_owned())
			.unwrap_or_else(|_| "unknown".to_string()),
		os: std::env::consts::OS.to_string(),
		os_version: String::new(),
		kernel_version: kernel_version(),
		client_version: CLIENT_VERSION.to_string(),
	}
}

#[cfg(target_os = "linux")]
fn kernel_version() -> String {
	std::fs::read_to_string("/proc/sys/kernel/osrelease")
		.map(|s| s.trim().to_string())
		.unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
fn kernel_version() -> String {
	String::new()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn meta_is_populated() {
		let meta = system_meta();
		assert!(!meta.hostname.is_empty());
		assert_eq!(meta.os, std::env::consts::OS);
		assert_eq!(meta.client_version, CLIENT_VERSION);
	}
}
