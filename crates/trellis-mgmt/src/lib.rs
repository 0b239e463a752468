// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Management-plane protocol client.
//!
//! Drives the registration/sync pipeline against the central management
//! service: fetch the server key, log in with a sealed envelope bound to the
//! node identity, then hold a server-push sync stream of network maps. The
//! transport is a capability seam with a real HTTP variant and a
//! deterministic in-memory variant.

pub mod client;
pub mod error;
pub mod meta;
pub mod session;
pub mod transport;

pub use client::{
	stub_network_map, ManagementClient, LOGIN_TIMEOUT, SERVER_KEY_TIMEOUT, SYNC_INIT_TIMEOUT,
};
pub use error::{MgmtError, Result, TransportError};
pub use meta::system_meta;
pub use session::{Backoff, ServerIdentity, SessionState};
pub use transport::http::HttpTransport;
pub use transport::memory::MemoryTransport;
pub use transport::{EnvelopeStream, ManagementTransport, TransportTarget};
