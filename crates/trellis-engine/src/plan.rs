// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pure reconciliation between two network-map snapshots.
//!
//! Peers are keyed by public key, routes by canonical CIDR string. Planning
//! never touches the host; the applier performs the effects.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use trellis_proto::{NetworkMap, RemotePeer, Route};

/// Normalizes a CIDR string: parses address and prefix, masks host bits.
/// Unparsable input is passed through trimmed, so unknown forms still key
/// consistently.
pub fn canonical_cidr(network: &str) -> String {
	let trimmed = network.trim();
	let Some((addr_part, prefix_part)) = trimmed.split_once('/') else {
		return trimmed.to_string();
	};
	let Ok(prefix) = prefix_part.parse::<u8>() else {
		return trimmed.to_string();
	};
	match addr_part.parse::<IpAddr>() {
		Ok(IpAddr::V4(addr)) if prefix <= 32 => {
			let mask = if prefix == 0 {
				0
			} else {
				u32::MAX << (32 - u32::from(prefix))
			};
			let masked = Ipv4Addr::from(u32::from(addr) & mask);
			format!("{masked}/{prefix}")
		}
		Ok(IpAddr::V6(addr)) if prefix <= 128 => {
			let mask = if prefix == 0 {
				0
			} else {
				u128::MAX << (128 - u32::from(prefix))
			};
			let masked = Ipv6Addr::from(u128::from(addr) & mask);
			format!("{masked}/{prefix}")
		}
		_ => trimmed.to_string(),
	}
}

/// Change to the node's own interface settings carried by a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfigDelta {
	pub address: String,
}

/// An idempotent plan against the previously applied snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyPlan {
	pub peers_to_add: Vec<RemotePeer>,
	pub peers_to_update: Vec<RemotePeer>,
	pub peers_to_remove: Vec<String>,
	pub routes_to_add: Vec<Route>,
	pub routes_to_remove: Vec<String>,
	pub node_config: Option<NodeConfigDelta>,
}

impl ApplyPlan {
	pub fn is_empty(&self) -> bool {
		self.peers_to_add.is_empty()
			&& self.peers_to_update.is_empty()
			&& self.peers_to_remove.is_empty()
			&& self.routes_to_add.is_empty()
			&& self.routes_to_remove.is_empty()
			&& self.node_config.is_none()
	}

	/// Sequential composition with later-wins tiebreak per key.
	pub fn compose(&self, later: &ApplyPlan) -> ApplyPlan {
		let mut peers: BTreeMap<String, PeerOp> = BTreeMap::new();
		let mut routes: BTreeMap<String, RouteOp> = BTreeMap::new();

		// Within one plan removes go first, so a remove+add pair under the
		// same route key (metric re-install) nets to the add.
		for plan in [self, later] {
			for key in &plan.peers_to_remove {
				peers.insert(key.clone(), PeerOp::Remove);
			}
			for peer in &plan.peers_to_add {
				peers.insert(peer.wg_pub_key.clone(), PeerOp::Add(peer.clone()));
			}
			for peer in &plan.peers_to_update {
				peers.insert(peer.wg_pub_key.clone(), PeerOp::Update(peer.clone()));
			}
			for network in &plan.routes_to_remove {
				routes.insert(canonical_cidr(network), RouteOp::Remove);
			}
			for route in &plan.routes_to_add {
				routes.insert(canonical_cidr(&route.network), RouteOp::Add(route.clone()));
			}
		}

		let mut result = ApplyPlan {
			node_config: later.node_config.clone().or_else(|| self.node_config.clone()),
			..ApplyPlan::default()
		};
		for (key, op) in peers {
			match op {
				PeerOp::Add(peer) => result.peers_to_add.push(peer),
				PeerOp::Update(peer) => result.peers_to_update.push(peer),
				PeerOp::Remove => result.peers_to_remove.push(key),
			}
		}
		for (network, op) in routes {
			match op {
				RouteOp::Add(route) => result.routes_to_add.push(route),
				RouteOp::Remove => result.routes_to_remove.push(network),
			}
		}
		result
	}

	/// Net effect per peer key: the desired peer, or `None` for removal.
	/// Add and update converge to the same effect.
	pub fn peer_effects(&self) -> BTreeMap<String, Option<RemotePeer>> {
		let mut effects = BTreeMap::new();
		for key in &self.peers_to_remove {
			effects.insert(key.clone(), None);
		}
		for peer in self.peers_to_add.iter().chain(&self.peers_to_update) {
			effects.insert(peer.wg_pub_key.clone(), Some(peer.clone()));
		}
		effects
	}

	/// Net effect per canonical route key. A remove+add pair under the same
	/// key (metric re-install) nets out to the added route.
	pub fn route_effects(&self) -> BTreeMap<String, Option<Route>> {
		let mut effects = BTreeMap::new();
		for network in &self.routes_to_remove {
			effects.insert(canonical_cidr(network), None);
		}
		for route in &self.routes_to_add {
			effects.insert(canonical_cidr(&route.network), Some(route.clone()));
		}
		effects
	}
}

enum PeerOp {
	Add(RemotePeer),
	Update(RemotePeer),
	Remove,
}

enum RouteOp {
	Add(Route),
	Remove,
}

fn peer_index(map: &NetworkMap) -> BTreeMap<&str, &RemotePeer> {
	map.remote_peers
		.iter()
		.map(|p| (p.wg_pub_key.as_str(), p))
		.collect()
}

fn route_index(map: &NetworkMap) -> BTreeMap<String, &Route> {
	map.routes
		.iter()
		.map(|r| (canonical_cidr(&r.network), r))
		.collect()
}

/// Diffs two snapshots into a plan. Identical inputs yield the empty plan,
/// so re-applying a snapshot is a host-level no-op.
pub fn plan(prev: &NetworkMap, next: &NetworkMap) -> ApplyPlan {
	let prev_peers = peer_index(prev);
	let next_peers = peer_index(next);
	let prev_routes = route_index(prev);
	let next_routes = route_index(next);

	let mut result = ApplyPlan::default();

	for (key, peer) in &next_peers {
		match prev_peers.get(key) {
			None => result.peers_to_add.push((*peer).clone()),
			Some(existing) if existing != peer => result.peers_to_update.push((*peer).clone()),
			Some(_) => {}
		}
	}
	for key in prev_peers.keys() {
		if !next_peers.contains_key(key) {
			result.peers_to_remove.push((*key).to_string());
		}
	}

	for (key, route) in &next_routes {
		match prev_routes.get(key) {
			None => result.routes_to_add.push((*route).clone()),
			// Metric change re-installs the route under the same key.
			Some(existing) if existing.metric != route.metric => {
				result.routes_to_remove.push(key.clone());
				result.routes_to_add.push((*route).clone());
			}
			Some(_) => {}
		}
	}
	for key in prev_routes.keys() {
		if !next_routes.contains_key(key) {
			result.routes_to_remove.push(key.clone());
		}
	}

	let prev_address = prev
		.peer_config
		.as_ref()
		.map(|c| c.address.as_str())
		.unwrap_or_default();
	if let Some(next_config) = &next.peer_config {
		if !next_config.address.is_empty() && next_config.address != prev_address {
			result.node_config = Some(NodeConfigDelta {
				address: next_config.address.clone(),
			});
		}
	}

	result
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use trellis_proto::PeerConfig;

	fn peer(key: &str, allowed: &[&str]) -> RemotePeer {
		RemotePeer {
			wg_pub_key: key.to_string(),
			allowed_ips: allowed.iter().map(|s| s.to_string()).collect(),
			endpoint: None,
			keepalive: None,
		}
	}

	fn route(network: &str) -> Route {
		Route {
			network: network.to_string(),
			metric: None,
		}
	}

	fn map(serial: u64, peers: Vec<RemotePeer>, routes: Vec<Route>) -> NetworkMap {
		NetworkMap {
			serial,
			peer_config: None,
			remote_peers: peers,
			routes,
		}
	}

	#[test]
	fn identical_snapshots_plan_nothing() {
		let snapshot = map(
			1,
			vec![peer("K1", &["100.64.0.2/32"])],
			vec![route("10.0.0.0/24")],
		);
		assert!(plan(&snapshot, &snapshot).is_empty());
	}

	#[test]
	fn added_and_removed_peers() {
		let before = map(1, vec![peer("K1", &["100.64.0.2/32"])], vec![]);
		let after = map(2, vec![peer("K2", &["100.64.0.3/32"])], vec![]);

		let p = plan(&before, &after);
		assert_eq!(p.peers_to_add.len(), 1);
		assert_eq!(p.peers_to_add[0].wg_pub_key, "K2");
		assert_eq!(p.peers_to_remove, vec!["K1".to_string()]);
		assert!(p.peers_to_update.is_empty());
	}

	#[test]
	fn changed_allowed_ips_is_an_update() {
		let before = map(1, vec![peer("K1", &["100.64.0.2/32"])], vec![]);
		let after = map(2, vec![peer("K1", &["100.64.0.2/32", "10.1.0.0/16"])], vec![]);

		let p = plan(&before, &after);
		assert!(p.peers_to_add.is_empty());
		assert_eq!(p.peers_to_update.len(), 1);
	}

	#[test]
	fn changed_endpoint_is_an_update() {
		let before = map(1, vec![peer("K1", &["100.64.0.2/32"])], vec![]);
		let mut changed = peer("K1", &["100.64.0.2/32"]);
		changed.endpoint = Some("203.0.113.10:51820".to_string());
		let after = map(2, vec![changed], vec![]);

		assert_eq!(plan(&before, &after).peers_to_update.len(), 1);
	}

	#[test]
	fn routes_key_on_canonical_form() {
		let before = map(1, vec![], vec![route("10.0.0.5/24")]);
		let after = map(2, vec![], vec![route("10.0.0.0/24")]);
		// Same network after masking host bits; nothing to do.
		assert!(plan(&before, &after).is_empty());
	}

	#[test]
	fn route_add_and_remove() {
		let before = map(1, vec![], vec![route("10.0.0.0/24")]);
		let after = map(2, vec![], vec![route("10.1.0.0/24")]);

		let p = plan(&before, &after);
		assert_eq!(p.routes_to_add.len(), 1);
		assert_eq!(p.routes_to_remove, vec!["10.0.0.0/24".to_string()]);
	}

	#[test]
	fn address_change_produces_node_delta() {
		let before = map(1, vec![], vec![]);
		let mut after = map(2, vec![], vec![]);
		after.peer_config = Some(PeerConfig {
			address: "100.64.7.5/32".to_string(),
			dns: vec![],
		});

		let p = plan(&before, &after);
		assert_eq!(p.node_config.unwrap().address, "100.64.7.5/32");
	}

	#[test]
	fn canonical_cidr_masks_host_bits() {
		assert_eq!(canonical_cidr("10.0.0.5/24"), "10.0.0.0/24");
		assert_eq!(canonical_cidr("100.64.0.2/32"), "100.64.0.2/32");
		assert_eq!(canonical_cidr(" 10.0.0.0/24 "), "10.0.0.0/24");
		assert_eq!(canonical_cidr("fd00::1/64"), "fd00::/64");
		assert_eq!(canonical_cidr("not-a-cidr"), "not-a-cidr");
	}

	// Strategy: small pools of keys/routes so snapshots overlap.
	fn arb_map() -> impl Strategy<Value = NetworkMap> {
		let peers = prop::collection::btree_map(
			prop::sample::select(vec!["K1", "K2", "K3", "K4"]),
			prop::sample::select(vec!["100.64.0.2/32", "100.64.0.3/32", "10.1.0.0/16"]),
			0..4,
		);
		let routes = prop::collection::btree_set(
			prop::sample::select(vec!["10.0.0.0/24", "10.1.0.0/24", "192.168.5.0/28"]),
			0..3,
		);
		(peers, routes).prop_map(|(peers, routes)| {
			map(
				0,
				peers
					.into_iter()
					.map(|(key, allowed)| peer(key, &[allowed]))
					.collect(),
				routes.into_iter().map(route).collect(),
			)
		})
	}

	proptest! {
		// plan(S0, S2) and plan(S0, S1) ⊕ plan(S1, S2) agree on net effects,
		// with later-wins tiebreak inside ⊕.
		#[test]
		fn plan_composition_law(
			(s0, s1, s2) in (arb_map(), arb_map(), arb_map()),
		) {
			let direct = plan(&s0, &s2);
			let composed = plan(&s0, &s1).compose(&plan(&s1, &s2));

			// Composition may carry ops that cancel against S0 (a key added
			// in S1 and removed in S2); restrict the comparison to keys the
			// direct plan touches, and require composed effects to cover
			// them identically.
			let composed_peer_effects = composed.peer_effects();
			for (key, effect) in direct.peer_effects() {
				prop_assert_eq!(composed_peer_effects.get(&key), Some(&effect));
			}
			let composed_route_effects = composed.route_effects();
			for (key, effect) in direct.route_effects() {
				prop_assert_eq!(composed_route_effects.get(&key), Some(&effect));
			}
		}

		#[test]
		fn self_plan_is_always_empty(s in arb_map()) {
			prop_assert!(plan(&s, &s).is_empty());
		}
	}
}
