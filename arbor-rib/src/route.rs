//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;

use arbor_utils::ip::Ip;
use arbor_utils::policy::PolicyTags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// A named routing protocol instance.
//
// The generation id is bumped every time the protocol re-registers, so
// announcements surviving from a previous incarnation can be told apart.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Protocol {
    pub name: String,
    pub kind: ProtocolKind,
    pub genid: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ProtocolKind {
    Igp,
    Egp,
}

// Route next-hop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Nexthop<A: Ip> {
    // Resolves to a directly connected neighbor on some vif.
    Peer { addr: A::Addr },
    // Not directly connected; must be re-resolved via another route.
    External { addr: A::Addr },
    // Drop packets silently.
    Discard,
    // Drop packets and signal unreachability.
    Unreachable,
}

// Interned next-hop registries, one object per address.
#[derive(Debug)]
pub struct NexthopRegistry<A: Ip> {
    peer_nexthops: BTreeMap<A::Addr, Nexthop<A>>,
    external_nexthops: BTreeMap<A::Addr, Nexthop<A>>,
}

// A route announced by one protocol instance for one destination prefix.
#[derive(Clone, Debug)]
pub struct RouteEntry<A: Ip> {
    pub net: A::Network,
    pub nexthop: Nexthop<A>,
    // Mandatory iff the next-hop is a peer next-hop.
    pub vif: Option<String>,
    pub protocol: Arc<Protocol>,
    pub distance: u8,
    pub metric: u32,
    pub policy_tags: PolicyTags,
    pub last_updated: DateTime<Utc>,
}

// Result of a route-range lookup: the matched route, if any, and the
// largest prefix containing the queried address for which the answer is
// guaranteed to remain unchanged under the current table state.
#[derive(Clone, Debug)]
pub struct RouteRange<A: Ip> {
    pub matched: Option<RouteEntry<A>>,
    pub valid_net: A::Network,
}

// ===== impl Protocol =====

impl Protocol {
    pub fn new(name: String, kind: ProtocolKind) -> Self {
        Protocol {
            name,
            kind,
            genid: 0,
        }
    }

    pub fn is_igp(&self) -> bool {
        self.kind == ProtocolKind::Igp
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ===== impl Nexthop =====

impl<A: Ip> Nexthop<A> {
    // Returns the next-hop address, unless this is a sentinel next-hop.
    pub fn addr(&self) -> Option<A::Addr> {
        match self {
            Nexthop::Peer { addr } | Nexthop::External { addr } => Some(*addr),
            Nexthop::Discard | Nexthop::Unreachable => None,
        }
    }
}

// ===== impl NexthopRegistry =====

impl<A: Ip> NexthopRegistry<A> {
    pub(crate) fn find_or_create_peer(&mut self, addr: A::Addr) -> Nexthop<A> {
        *self
            .peer_nexthops
            .entry(addr)
            .or_insert(Nexthop::Peer { addr })
    }

    pub(crate) fn find_or_create_external(
        &mut self,
        addr: A::Addr,
    ) -> Nexthop<A> {
        *self
            .external_nexthops
            .entry(addr)
            .or_insert(Nexthop::External { addr })
    }

    pub fn find_peer(&self, addr: A::Addr) -> Option<Nexthop<A>> {
        self.peer_nexthops.get(&addr).copied()
    }

    pub fn find_external(&self, addr: A::Addr) -> Option<Nexthop<A>> {
        self.external_nexthops.get(&addr).copied()
    }
}

impl<A: Ip> Default for NexthopRegistry<A> {
    fn default() -> Self {
        NexthopRegistry {
            peer_nexthops: Default::default(),
            external_nexthops: Default::default(),
        }
    }
}

// ===== impl RouteEntry =====

impl<A: Ip> RouteEntry<A> {
    // Preference between routes for the same prefix: lower administrative
    // distance wins, then lower metric. A newcomer must be strictly
    // preferred to displace an incumbent.
    pub fn is_preferred_over(&self, other: &RouteEntry<A>) -> bool {
        (self.distance, self.metric) < (other.distance, other.metric)
    }

    // Returns a copy of this route resolved onto the given vif.
    pub(crate) fn with_vif(&self, vif: Option<String>) -> RouteEntry<A> {
        let mut route = self.clone();
        route.vif = vif;
        route
    }
}
