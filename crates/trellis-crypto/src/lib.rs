// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authenticated asymmetric envelope codec for the management channel.
//!
//! Messages are sealed with NaCl box (Curve25519 key agreement +
//! XSalsa20-Poly1305) using the same key pair that drives the WireGuard data
//! plane. The wire body is `nonce(24) ‖ ciphertext`.

pub mod envelope;

pub use envelope::{open, open_message, seal, seal_message, CryptoError, Result, NONCE_SIZE};
