// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wire messages for the management protocol.
//!
//! The transport is schema-agnostic: every message is a serde structure whose
//! JSON form is what crosses the wire, either in clear (`Envelope`,
//! `ServerKeyResponse`) or sealed inside an envelope body. Binary fields are
//! carried as base64 strings so envelopes survive text-safe transports.

pub mod messages;

pub use messages::{
	Envelope, LoginRequest, LoginResponse, NetworkMap, OverlayConfig, PeerConfig, PeerKeys,
	PeerSystemMeta, RemotePeer, Route, ServerKeyResponse, SignalConfig, SyncRequest, SyncResponse,
};
