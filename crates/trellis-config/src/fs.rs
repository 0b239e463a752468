// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::Result;
use std::path::Path;

/// Writes `data` to a sibling temp file (mode 0600) and renames it over the
/// target, so readers never observe a partial file.
pub async fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
	let path = path.as_ref();

	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}

	let tmp = path.with_extension("tmp");

	#[cfg(unix)]
	{
		use tokio::io::AsyncWriteExt;

		let mut file = tokio::fs::OpenOptions::new()
			.write(true)
			.create(true)
			.truncate(true)
			.mode(0o600)
			.open(&tmp)
			.await?;
		file.write_all(data).await?;
		file.sync_all().await?;
	}

	#[cfg(not(unix))]
	{
		tokio::fs::write(&tmp, data).await?;
	}

	tokio::fs::rename(&tmp, path).await?;
	Ok(())
}
