// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Overlay engine: reconciliation and host enforcement.
//!
//! The driver loop consumes network-map snapshots from the management
//! client, persists the projected state, and feeds a single-slot mailbox
//! whose worker converges the host WireGuard interface through the `ip` and
//! `wg` tools. Planning is pure; effects are capability-gated.

pub mod applier;
pub mod capability;
pub mod engine;
pub mod error;
pub mod plan;
pub mod signal;

pub use applier::{ApplyReport, WgApplier};
pub use capability::HostCapability;
pub use engine::{ApplyStatus, Engine};
pub use error::{ApplyError, EngineError, Result};
pub use plan::{canonical_cidr, plan, ApplyPlan, NodeConfigDelta};
pub use signal::SignalClient;
