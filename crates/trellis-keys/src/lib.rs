// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Node identity key material.
//!
//! One Curve25519 key pair serves as the node's stable identity: it is the
//! WireGuard device key on the data plane and the box key for the encrypted
//! management channel. The private half is redacted in Debug/Display/Serialize
//! and zeroized on drop.

pub mod keys;

pub use keys::{KeyError, Result, WgKeyPair, WgPrivateKey, WgPublicKey};
