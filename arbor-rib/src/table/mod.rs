//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

pub mod extint;
pub mod merged;
pub mod origin;
pub mod policy_connected;
pub mod policy_redist;
pub mod redist;
pub mod register;

use arbor_utils::ip::{Ip, IpNetworkKind};
use bitflags::bitflags;
use enum_as_inner::EnumAsInner;
use generational_arena::Arena;
use prefix_trie::PrefixMap;

use crate::route::{RouteEntry, RouteRange};
use crate::table::extint::ExtIntTable;
use crate::table::merged::MergedTable;
use crate::table::origin::OriginTable;
use crate::table::policy_connected::PolicyConnectedTable;
use crate::table::policy_redist::PolicyRedistTable;
use crate::table::redist::RedistTable;
use crate::table::register::RegisterTable;

// Stable identifier of a table within the per-RIB arena. Parent and next
// links are ids, so structural mutation walks ids instead of references.
pub type TableId = generational_arena::Index;

bitflags! {
    // Table classification mask used by track_back/track_forward when
    // splicing tables into a chain.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct TableKind: u8 {
        const ORIGIN = 0x01;
        const MERGED = 0x02;
        const EXT_INT = 0x04;
        const REDIST = 0x08;
        const POLICY_REDIST = 0x10;
        const POLICY_CONNECTED = 0x20;
        const REGISTER = 0x40;
        // Reserved for the export sink attachment point at the graph tail.
        const EXPORT = 0x80;
    }
}

// State shared by every table variant.
#[derive(Debug)]
pub struct TableCore {
    pub(crate) name: String,
    pub(crate) next: Option<TableId>,
}

// The route-table graph node. One variant per concrete table type.
#[derive(Debug, EnumAsInner)]
pub enum TableNode<A: Ip> {
    Origin(OriginTable<A>),
    Merged(MergedTable),
    ExtInt(ExtIntTable<A>),
    Redist(RedistTable<A>),
    PolicyConnected(PolicyConnectedTable<A>),
    PolicyRedist(PolicyRedistTable<A>),
    Register(RegisterTable<A>),
}

// Incremental route change flowing parent to child.
#[derive(Clone, Debug)]
pub enum RouteEvent<A: Ip> {
    Add(RouteEntry<A>),
    Delete(RouteEntry<A>),
    Replace {
        old: RouteEntry<A>,
        new: RouteEntry<A>,
    },
}

// Per-RIB arena of route tables.
#[derive(Debug)]
pub struct TableGraph<A: Ip> {
    arena: Arena<TableNode<A>>,
}

// ===== impl TableCore =====

impl TableCore {
    pub(crate) fn new(name: String) -> Self {
        TableCore { name, next: None }
    }
}

// ===== impl TableNode =====

impl<A: Ip> TableNode<A> {
    pub(crate) fn core(&self) -> &TableCore {
        match self {
            TableNode::Origin(t) => &t.core,
            TableNode::Merged(t) => &t.core,
            TableNode::ExtInt(t) => &t.core,
            TableNode::Redist(t) => &t.core,
            TableNode::PolicyConnected(t) => &t.core,
            TableNode::PolicyRedist(t) => &t.core,
            TableNode::Register(t) => &t.core,
        }
    }

    pub(crate) fn core_mut(&mut self) -> &mut TableCore {
        match self {
            TableNode::Origin(t) => &mut t.core,
            TableNode::Merged(t) => &mut t.core,
            TableNode::ExtInt(t) => &mut t.core,
            TableNode::Redist(t) => &mut t.core,
            TableNode::PolicyConnected(t) => &mut t.core,
            TableNode::PolicyRedist(t) => &mut t.core,
            TableNode::Register(t) => &mut t.core,
        }
    }

    pub(crate) fn kind(&self) -> TableKind {
        match self {
            TableNode::Origin(_) => TableKind::ORIGIN,
            TableNode::Merged(_) => TableKind::MERGED,
            TableNode::ExtInt(_) => TableKind::EXT_INT,
            TableNode::Redist(_) => TableKind::REDIST,
            TableNode::PolicyConnected(_) => TableKind::POLICY_CONNECTED,
            TableNode::PolicyRedist(_) => TableKind::POLICY_REDIST,
            TableNode::Register(_) => TableKind::REGISTER,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.core().name
    }

    // Returns the parent of a single-parent table. Binary tables have no
    // single upstream and origin tables are leaves.
    pub(crate) fn parent(&self) -> Option<TableId> {
        match self {
            TableNode::Origin(_) => None,
            TableNode::Merged(_) => None,
            TableNode::ExtInt(_) => None,
            TableNode::Redist(t) => Some(t.parent),
            TableNode::PolicyConnected(t) => Some(t.parent),
            TableNode::PolicyRedist(t) => Some(t.parent),
            TableNode::Register(t) => t.parent,
        }
    }

    // Replaces the upstream link matching `old_parent` with `new_parent`.
    pub(crate) fn replumb(
        &mut self,
        old_parent: Option<TableId>,
        new_parent: TableId,
    ) {
        match self {
            TableNode::Origin(_) => {
                unreachable!("origin tables have no parent")
            }
            TableNode::Merged(t) => {
                if Some(t.parent_a) == old_parent {
                    t.parent_a = new_parent;
                } else {
                    debug_assert_eq!(Some(t.parent_b), old_parent);
                    t.parent_b = new_parent;
                }
            }
            TableNode::ExtInt(t) => {
                if Some(t.int_parent) == old_parent {
                    t.int_parent = new_parent;
                } else {
                    debug_assert_eq!(Some(t.ext_parent), old_parent);
                    t.ext_parent = new_parent;
                }
            }
            TableNode::Redist(t) => {
                debug_assert_eq!(Some(t.parent), old_parent);
                t.parent = new_parent;
            }
            TableNode::PolicyConnected(t) => {
                debug_assert_eq!(Some(t.parent), old_parent);
                t.parent = new_parent;
            }
            TableNode::PolicyRedist(t) => {
                debug_assert_eq!(Some(t.parent), old_parent);
                t.parent = new_parent;
            }
            TableNode::Register(t) => {
                debug_assert_eq!(t.parent, old_parent);
                t.parent = Some(new_parent);
            }
        }
    }
}

// ===== impl RouteEvent =====

impl<A: Ip> RouteEvent<A> {
    pub(crate) fn net(&self) -> A::Network {
        match self {
            RouteEvent::Add(route) | RouteEvent::Delete(route) => route.net,
            RouteEvent::Replace { new, .. } => new.net,
        }
    }
}

// ===== impl TableGraph =====

impl<A: Ip> TableGraph<A> {
    pub(crate) fn insert(&mut self, node: TableNode<A>) -> TableId {
        self.arena.insert(node)
    }

    pub(crate) fn node(&self, id: TableId) -> &TableNode<A> {
        &self.arena[id]
    }

    pub(crate) fn node_mut(&mut self, id: TableId) -> &mut TableNode<A> {
        &mut self.arena[id]
    }

    pub(crate) fn next(&self, id: TableId) -> Option<TableId> {
        self.arena[id].core().next
    }

    pub(crate) fn set_next(&mut self, id: TableId, next: Option<TableId>) {
        self.arena[id].core_mut().next = next;
    }

    pub(crate) fn replumb(
        &mut self,
        id: TableId,
        old_parent: Option<TableId>,
        new_parent: TableId,
    ) {
        self.arena[id].replumb(old_parent, new_parent);
    }

    // Given a single-parent chain, walks upstream to the first table of the
    // run of tables matching the mask. Returns the starting table if it
    // does not match itself.
    pub(crate) fn track_back(&self, id: TableId, mask: TableKind) -> TableId {
        let mut id = id;
        if !self.arena[id].kind().intersects(mask) {
            return id;
        }
        while let Some(parent) = self.arena[id].parent() {
            if !self.arena[parent].kind().intersects(mask) {
                break;
            }
            id = parent;
        }
        id
    }

    // Walks downstream to the last consecutive table matching the mask, or
    // returns the starting table if its successor does not match.
    pub(crate) fn track_forward(
        &self,
        id: TableId,
        mask: TableKind,
    ) -> TableId {
        let mut id = id;
        while let Some(next) = self.arena[id].core().next {
            if !self.arena[next].kind().intersects(mask) {
                break;
            }
            id = next;
        }
        id
    }

    // Delivers one upstream event to the given table.
    pub(crate) fn process(
        &mut self,
        id: TableId,
        from: TableId,
        event: RouteEvent<A>,
    ) {
        match &self.arena[id] {
            TableNode::Origin(_) => {
                unreachable!("origin tables consume no upstream events")
            }
            TableNode::Merged(_) => self.merged_process(id, from, event),
            TableNode::ExtInt(_) => self.extint_process(id, from, event),
            TableNode::Redist(_) => self.redist_process(id, event),
            TableNode::PolicyConnected(_) => {
                self.policy_connected_process(id, event)
            }
            TableNode::PolicyRedist(_) => {
                self.policy_redist_process(id, event)
            }
            TableNode::Register(_) => self.register_process(id, event),
        }
    }

    // Forwards events to the downstream consumer of `from`, if plumbed.
    pub(crate) fn emit(&mut self, from: TableId, events: Vec<RouteEvent<A>>) {
        if let Some(next) = self.arena[from].core().next {
            for event in events {
                self.process(next, from, event);
            }
        }
    }

    // Synchronous longest-prefix match, recursing into parents as needed.
    pub(crate) fn lookup_route(
        &self,
        id: TableId,
        addr: A::Addr,
    ) -> Option<&RouteEntry<A>> {
        match &self.arena[id] {
            TableNode::Origin(t) => t.lookup_route(addr),
            TableNode::Merged(t) => {
                let a = self.lookup_route(t.parent_a, addr);
                let b = self.lookup_route(t.parent_b, addr);
                best_match(a, b)
            }
            TableNode::ExtInt(t) => {
                let int = self.lookup_route(t.int_parent, addr);
                let ext = t.lookup_ext_visible(addr);
                // An external route in the visible set has already won the
                // preference comparison for its prefix.
                match (int, ext) {
                    (Some(int), Some(ext)) => {
                        if int.net.prefix() > ext.net.prefix() {
                            Some(int)
                        } else {
                            Some(ext)
                        }
                    }
                    (int, ext) => int.or(ext),
                }
            }
            TableNode::Redist(t) => self.lookup_route(t.parent, addr),
            TableNode::PolicyConnected(t) => self.lookup_route(t.parent, addr),
            TableNode::PolicyRedist(t) => self.lookup_route(t.parent, addr),
            TableNode::Register(t) => {
                let parent = t.parent?;
                self.lookup_route(parent, addr)
            }
        }
    }

    // Exact-prefix lookup of the upstream offering for a destination.
    pub(crate) fn lookup_route_exact(
        &self,
        id: TableId,
        net: &A::Network,
    ) -> Option<&RouteEntry<A>> {
        match &self.arena[id] {
            TableNode::Origin(t) => t.routes.get(net),
            TableNode::Merged(t) => {
                let a = self.lookup_route_exact(t.parent_a, net);
                let b = self.lookup_route_exact(t.parent_b, net);
                best_match(a, b)
            }
            TableNode::ExtInt(t) => t
                .ext_visible
                .get(net)
                .or_else(|| self.lookup_route_exact(t.int_parent, net)),
            TableNode::Redist(t) => self.lookup_route_exact(t.parent, net),
            TableNode::PolicyConnected(t) => {
                self.lookup_route_exact(t.parent, net)
            }
            TableNode::PolicyRedist(t) => {
                self.lookup_route_exact(t.parent, net)
            }
            TableNode::Register(t) => {
                let parent = t.parent?;
                self.lookup_route_exact(parent, net)
            }
        }
    }

    // Longest-prefix match plus the largest prefix containing `addr` for
    // which the answer is guaranteed to remain unchanged.
    pub(crate) fn lookup_route_range(
        &self,
        id: TableId,
        addr: A::Addr,
    ) -> RouteRange<A> {
        match &self.arena[id] {
            TableNode::Origin(t) => {
                let (matched, valid_net) = trie_range::<A>(&t.routes, addr);
                RouteRange {
                    matched: matched.cloned(),
                    valid_net,
                }
            }
            TableNode::Merged(t) => {
                let ra = self.lookup_route_range(t.parent_a, addr);
                let rb = self.lookup_route_range(t.parent_b, addr);
                RouteRange {
                    matched: self.lookup_route(id, addr).cloned(),
                    valid_net: narrower::<A>(ra.valid_net, rb.valid_net),
                }
            }
            TableNode::ExtInt(t) => {
                let ri = self.lookup_route_range(t.int_parent, addr);
                let (_, ext_valid) = trie_range::<A>(&t.ext_visible, addr);
                RouteRange {
                    matched: self.lookup_route(id, addr).cloned(),
                    valid_net: narrower::<A>(ri.valid_net, ext_valid),
                }
            }
            TableNode::Redist(t) => self.lookup_route_range(t.parent, addr),
            TableNode::PolicyConnected(t) => {
                self.lookup_route_range(t.parent, addr)
            }
            TableNode::PolicyRedist(t) => {
                self.lookup_route_range(t.parent, addr)
            }
            TableNode::Register(t) => match t.parent {
                Some(parent) => self.lookup_route_range(parent, addr),
                None => RouteRange {
                    matched: None,
                    valid_net: A::Network::default(A::AF),
                },
            },
        }
    }
}

impl<A: Ip> Default for TableGraph<A> {
    fn default() -> Self {
        TableGraph {
            arena: Arena::new(),
        }
    }
}

// ===== helper functions =====

// Picks the best of two offerings for the same destination: longer prefix
// first, then route preference, with the first argument winning ties.
fn best_match<'a, A: Ip>(
    a: Option<&'a RouteEntry<A>>,
    b: Option<&'a RouteEntry<A>>,
) -> Option<&'a RouteEntry<A>> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if b.net.prefix() > a.net.prefix()
                || (b.net.prefix() == a.net.prefix() && b.is_preferred_over(a))
            {
                Some(b)
            } else {
                Some(a)
            }
        }
        (a, b) => a.or(b),
    }
}

// Of two prefixes containing the same address, returns the more specific.
fn narrower<A: Ip>(a: A::Network, b: A::Network) -> A::Network {
    if b.prefix() > a.prefix() { b } else { a }
}

// Computes the longest-prefix match within one route trie together with
// the largest prefix around `addr` free of any other route.
pub(crate) fn trie_range<A: Ip>(
    routes: &PrefixMap<A::Network, RouteEntry<A>>,
    addr: A::Addr,
) -> (Option<&RouteEntry<A>>, A::Network) {
    let host = A::Network::host_prefix(addr);
    let matched = routes.get_lpm(&host);
    let matched_net = matched.map(|(net, _)| *net);

    let mut valid_net = matched_net.unwrap_or_else(|| A::Network::default(A::AF));
    loop {
        let conflict = routes.iter().any(|(net, _)| {
            Some(*net) != matched_net && valid_net.is_supernet_of(*net)
        });
        if !conflict {
            break;
        }
        // Narrow toward the queried address by one bit.
        let plen = valid_net.prefix() + 1;
        match A::Network::new(addr, plen) {
            Ok(narrowed) => valid_net = narrowed.apply_mask(),
            Err(_) => break,
        }
    }
    (matched.map(|(_, route)| route), valid_net)
}
