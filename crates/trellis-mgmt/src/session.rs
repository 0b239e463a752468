// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::time::Duration;
use trellis_keys::WgPublicKey;

/// Management session state machine.
///
/// ```text
///    Disconnected ──dial──▶ Connected ──server-key──▶ KeyFetched
///         ▲                     │                         │
///         │                     │ dial failed             │ login
///         ▼                     ▼                         ▼
///         └──────────────── Failed ◀──decrypt/auth──── LoggedIn ──sync──▶ Syncing
/// ```
///
/// `Syncing` is left only via cancellation, stream close (back to `LoggedIn`
/// for reconnect) or a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Disconnected,
	Connected,
	KeyFetched,
	LoggedIn,
	Syncing,
	Failed,
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SessionState::Disconnected => "disconnected",
			SessionState::Connected => "connected",
			SessionState::KeyFetched => "key-fetched",
			SessionState::LoggedIn => "logged-in",
			SessionState::Syncing => "syncing",
			SessionState::Failed => "failed",
		};
		f.write_str(name)
	}
}

/// The management server's advertised identity, fixed for the session.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
	pub public_key: WgPublicKey,
	pub version: i32,
}

/// Bounded exponential backoff for stream reconnects: 1 s doubling to a
/// 30 s cap, reset on any successful receive.
#[derive(Debug, Clone)]
pub struct Backoff {
	current: Duration,
}

impl Backoff {
	pub const INITIAL: Duration = Duration::from_secs(1);
	pub const MAX: Duration = Duration::from_secs(30);

	pub fn new() -> Self {
		Self {
			current: Self::INITIAL,
		}
	}

	/// Returns the delay to wait now and advances the schedule.
	pub fn next_delay(&mut self) -> Duration {
		let delay = self.current;
		self.current = (self.current * 2).min(Self::MAX);
		delay
	}

	pub fn reset(&mut self) {
		self.current = Self::INITIAL;
	}
}

impl Default for Backoff {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_doubles_to_cap() {
		let mut backoff = Backoff::new();
		let mut delays = Vec::new();
		for _ in 0..7 {
			delays.push(backoff.next_delay().as_secs());
		}
		assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
	}

	#[test]
	fn backoff_resets_to_initial() {
		let mut backoff = Backoff::new();
		backoff.next_delay();
		backoff.next_delay();
		backoff.reset();
		assert_eq!(backoff.next_delay(), Backoff::INITIAL);
	}
}
