//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};

use arbor_utils::ip::{Ip, IpNetworkKind};
use prefix_trie::PrefixMap;
use tracing::debug;

use crate::route::{Nexthop, RouteEntry};
use crate::table::{RouteEvent, TableCore, TableGraph, TableId, TableNode};

// Specialized binary merger whose parents are the internal (IGP) and
// external (EGP) sides of the RIB.
//
// Winner selection follows the merged-table rule. In addition, an external
// route whose next-hop is not directly connected is held back until a
// visible route covers the next-hop; it is then emitted carrying the
// resolving route's vif. Dependencies are tracked per resolving prefix so
// that resolutions are revisited when the resolving route goes away, and
// pending next-hops are retried when new coverage appears.
#[derive(Debug)]
pub struct ExtIntTable<A: Ip> {
    pub(crate) core: TableCore,
    pub(crate) int_parent: TableId,
    pub(crate) ext_parent: TableId,
    // External routes as emitted downstream: winners only, post-resolution.
    pub(crate) ext_visible: PrefixMap<A::Network, RouteEntry<A>>,
    // External net -> net of the route its next-hop resolved through.
    resolving: BTreeMap<A::Network, A::Network>,
    // Resolving net -> external nets depending on it.
    deps: BTreeMap<A::Network, BTreeSet<A::Network>>,
    // Unresolvable next-hop -> external nets waiting on it.
    unresolved: BTreeMap<A::Addr, BTreeSet<A::Network>>,
}

// ===== impl ExtIntTable =====

impl<A: Ip> ExtIntTable<A> {
    pub(crate) fn new(
        name: String,
        int_parent: TableId,
        ext_parent: TableId,
    ) -> Self {
        ExtIntTable {
            core: TableCore::new(name),
            int_parent,
            ext_parent,
            ext_visible: Default::default(),
            resolving: Default::default(),
            deps: Default::default(),
            unresolved: Default::default(),
        }
    }

    pub(crate) fn lookup_ext_visible(
        &self,
        addr: A::Addr,
    ) -> Option<&RouteEntry<A>> {
        let host = A::Network::host_prefix(addr);
        self.ext_visible.get_lpm(&host).map(|(_, route)| route)
    }

    fn record_resolved(&mut self, net: A::Network, resolving_net: A::Network) {
        self.resolving.insert(net, resolving_net);
        self.deps.entry(resolving_net).or_default().insert(net);
    }

    fn clear_resolved(&mut self, net: A::Network) {
        if let Some(resolving_net) = self.resolving.remove(&net)
            && let Some(dependents) = self.deps.get_mut(&resolving_net)
        {
            dependents.remove(&net);
            if dependents.is_empty() {
                self.deps.remove(&resolving_net);
            }
        }
    }

    fn add_unresolved(&mut self, addr: A::Addr, net: A::Network) {
        self.unresolved.entry(addr).or_default().insert(net);
    }

    fn remove_unresolved(&mut self, addr: A::Addr, net: A::Network) -> bool {
        let Some(nets) = self.unresolved.get_mut(&addr) else {
            return false;
        };
        let removed = nets.remove(&net);
        if nets.is_empty() {
            self.unresolved.remove(&addr);
        }
        removed
    }

    fn has_unresolved(&self, addr: A::Addr, net: A::Network) -> bool {
        self.unresolved
            .get(&addr)
            .is_some_and(|nets| nets.contains(&net))
    }

    fn take_dependents(&mut self, net: A::Network) -> BTreeSet<A::Network> {
        self.deps.remove(&net).unwrap_or_default()
    }

    // Pending next-hops covered by the given prefix.
    fn pending_within(
        &self,
        covering: &A::Network,
    ) -> Vec<(A::Addr, A::Network)> {
        self.unresolved
            .iter()
            .filter(|(addr, _)| covering.contains(**addr))
            .flat_map(|(addr, nets)| {
                nets.iter().map(move |net| (*addr, *net))
            })
            .collect()
    }
}

// ===== impl TableGraph =====

impl<A: Ip> TableGraph<A> {
    fn extint(&self, id: TableId) -> &ExtIntTable<A> {
        let TableNode::ExtInt(table) = self.node(id) else {
            unreachable!("not an ext/int table")
        };
        table
    }

    fn extint_mut(&mut self, id: TableId) -> &mut ExtIntTable<A> {
        let TableNode::ExtInt(table) = self.node_mut(id) else {
            unreachable!("not an ext/int table")
        };
        table
    }

    pub(crate) fn extint_process(
        &mut self,
        id: TableId,
        from: TableId,
        event: RouteEvent<A>,
    ) {
        let from_int = self.extint(id).int_parent == from;
        match event {
            RouteEvent::Add(route) => {
                if from_int {
                    self.extint_add_int(id, route);
                } else {
                    self.extint_add_ext(id, route);
                }
            }
            RouteEvent::Delete(route) => {
                if from_int {
                    self.extint_delete_int(id, route);
                } else {
                    self.extint_delete_ext(id, route);
                }
            }
            RouteEvent::Replace { old, new } => {
                // Decomposed; downstream still observes a well-formed
                // per-prefix event sequence.
                if from_int {
                    self.extint_delete_int(id, old);
                    self.extint_add_int(id, new);
                } else {
                    self.extint_delete_ext(id, old);
                    self.extint_add_ext(id, new);
                }
            }
        }
    }

    // Resolves a next-hop against the table's visible view. The resolving
    // route must itself carry a vif.
    fn extint_resolve(
        &self,
        id: TableId,
        addr: A::Addr,
    ) -> Option<(A::Network, Option<String>)> {
        let route = self.lookup_route(id, addr)?;
        route.vif.as_ref()?;
        Some((route.net, route.vif.clone()))
    }

    fn extint_add_int(&mut self, id: TableId, route: RouteEntry<A>) {
        let net = route.net;

        if let Some(ext) = self.extint(id).ext_visible.get(&net).cloned() {
            if !route.is_preferred_over(&ext) {
                // Masked by the visible external route.
                return;
            }
            // The internal route takes over; withdraw the external emission.
            let table = self.extint_mut(id);
            let Some(old) = table.ext_visible.remove(&net) else {
                return;
            };
            table.clear_resolved(net);
            // Capture the withdrawn route's dependents before new
            // resolutions through this prefix are recorded, so the retry
            // pass below does not feed freshly resolved routes back into
            // the recalculation.
            let dependents = table.take_dependents(net);
            self.emit(id, vec![RouteEvent::Replace { old, new: route }]);

            self.extint_resolve_pending(id, net);
            self.extint_recalculate_dependents(id, dependents);
        } else {
            let ext_parent = self.extint(id).ext_parent;
            if let Some(ext) = self.lookup_route_exact(ext_parent, &net)
                && needs_resolution(ext)
                && ext.is_preferred_over(&route)
            {
                // A preferred external route exists but cannot resolve its
                // next-hop; the prefix stays dark downstream.
                debug!(%net, "internal route suppressed by unresolved \
                    external route");
                return;
            }
            self.emit(id, vec![RouteEvent::Add(route)]);

            // Nothing could have resolved through this prefix before it
            // became visible; only pending next-hops need a retry.
            self.extint_resolve_pending(id, net);
        }
    }

    fn extint_delete_int(&mut self, id: TableId, route: RouteEntry<A>) {
        let net = route.net;

        if self.extint(id).ext_visible.get(&net).is_some() {
            // The internal route had been masked; nothing was emitted.
            return;
        }

        let ext_parent = self.extint(id).ext_parent;
        let ext_offer = self.lookup_route_exact(ext_parent, &net).cloned();

        if let Some(ext) = &ext_offer
            && needs_resolution(ext)
            && ext.is_preferred_over(&route)
        {
            // The prefix was dark: the preferred external route never
            // resolved, and the internal route was suppressed.
            return;
        }

        // The internal route was visible downstream.
        match ext_offer {
            Some(ext) => {
                // Promote the external route that had been masked.
                if let Nexthop::External { addr } = ext.nexthop {
                    self.extint_mut(id).remove_unresolved(addr, net);
                    match self.extint_resolve(id, addr) {
                        Some((resolving_net, vif)) => {
                            let emitted = ext.with_vif(vif);
                            let table = self.extint_mut(id);
                            table.ext_visible.insert(net, emitted.clone());
                            table.record_resolved(net, resolving_net);
                            self.emit(
                                id,
                                vec![RouteEvent::Replace {
                                    old: route,
                                    new: emitted,
                                }],
                            );
                        }
                        None => {
                            self.extint_mut(id).add_unresolved(addr, net);
                            self.emit(id, vec![RouteEvent::Delete(route)]);
                        }
                    }
                } else {
                    self.extint_mut(id).ext_visible.insert(net, ext.clone());
                    self.emit(
                        id,
                        vec![RouteEvent::Replace {
                            old: route,
                            new: ext,
                        }],
                    );
                }
            }
            None => {
                self.emit(id, vec![RouteEvent::Delete(route)]);
            }
        }

        self.extint_recalculate(id, net);
    }

    fn extint_add_ext(&mut self, id: TableId, route: RouteEntry<A>) {
        let net = route.net;
        let int_parent = self.extint(id).int_parent;
        let int_offer = self.lookup_route_exact(int_parent, &net).cloned();

        if let Some(int) = &int_offer
            && !route.is_preferred_over(int)
        {
            // Masked by the internal offering.
            return;
        }

        if let Nexthop::External { addr } = route.nexthop {
            match self.extint_resolve(id, addr) {
                Some((resolving_net, vif)) => {
                    let emitted = route.with_vif(vif);
                    let table = self.extint_mut(id);
                    table.ext_visible.insert(net, emitted.clone());
                    table.record_resolved(net, resolving_net);
                    self.emit(
                        id,
                        vec![match int_offer {
                            Some(int) => RouteEvent::Replace {
                                old: int,
                                new: emitted,
                            },
                            None => RouteEvent::Add(emitted),
                        }],
                    );
                    self.extint_resolve_pending(id, net);
                }
                None => {
                    // Held back until coverage for the next-hop appears. A
                    // defeated internal route is withdrawn regardless.
                    debug!(%net, "external route held back, next-hop \
                        unresolved");
                    self.extint_mut(id).add_unresolved(addr, net);
                    if let Some(int) = int_offer {
                        self.emit(id, vec![RouteEvent::Delete(int)]);
                    }
                }
            }
        } else {
            self.extint_mut(id).ext_visible.insert(net, route.clone());
            self.emit(
                id,
                vec![match int_offer {
                    Some(int) => RouteEvent::Replace {
                        old: int,
                        new: route,
                    },
                    None => RouteEvent::Add(route),
                }],
            );
            self.extint_resolve_pending(id, net);
        }
    }

    fn extint_delete_ext(&mut self, id: TableId, route: RouteEntry<A>) {
        let net = route.net;
        let int_parent = self.extint(id).int_parent;
        let int_offer = self.lookup_route_exact(int_parent, &net).cloned();

        // A withdrawn route that was pending resolution never made it
        // downstream; at most the internal route it defeated reappears.
        if let Some(addr) = route.nexthop.addr()
            && self.extint(id).has_unresolved(addr, net)
        {
            self.extint_mut(id).remove_unresolved(addr, net);
            if let Some(int) = int_offer
                && route.is_preferred_over(&int)
            {
                self.emit(id, vec![RouteEvent::Add(int)]);
            }
            return;
        }

        let Some(old) = self.extint_mut(id).ext_visible.remove(&net) else {
            // The route had been masked; nothing was emitted.
            return;
        };
        self.extint_mut(id).clear_resolved(net);

        self.emit(
            id,
            vec![match int_offer {
                Some(int) => RouteEvent::Replace { old, new: int },
                None => RouteEvent::Delete(old),
            }],
        );

        self.extint_recalculate(id, net);
    }

    // Retries every pending next-hop covered by the given prefix.
    fn extint_resolve_pending(&mut self, id: TableId, covering: A::Network) {
        let pending = self.extint(id).pending_within(&covering);

        for (addr, net) in pending {
            if !self.extint(id).has_unresolved(addr, net) {
                // Already handled by a resolution cascade.
                continue;
            }
            let ext_parent = self.extint(id).ext_parent;
            let Some(original) =
                self.lookup_route_exact(ext_parent, &net).cloned()
            else {
                self.extint_mut(id).remove_unresolved(addr, net);
                continue;
            };

            let int_parent = self.extint(id).int_parent;
            if let Some(int) = self.lookup_route_exact(int_parent, &net)
                && !original.is_preferred_over(int)
            {
                // Lost the prefix to the internal side in the meantime.
                self.extint_mut(id).remove_unresolved(addr, net);
                continue;
            }

            if let Some((resolving_net, vif)) = self.extint_resolve(id, addr)
            {
                let emitted = original.with_vif(vif);
                let table = self.extint_mut(id);
                table.remove_unresolved(addr, net);
                table.ext_visible.insert(net, emitted.clone());
                table.record_resolved(net, resolving_net);
                self.emit(id, vec![RouteEvent::Add(emitted)]);

                // The newly visible route may in turn cover other pending
                // next-hops.
                self.extint_resolve_pending(id, net);
            }
        }
    }

    // Revisits every external route that resolved through the given
    // prefix after its resolving route changed or went away.
    fn extint_recalculate(&mut self, id: TableId, gone_net: A::Network) {
        let dependents = self.extint_mut(id).take_dependents(gone_net);
        self.extint_recalculate_dependents(id, dependents);
    }

    fn extint_recalculate_dependents(
        &mut self,
        id: TableId,
        dependents: BTreeSet<A::Network>,
    ) {
        let mut worklist: Vec<A::Network> = dependents.into_iter().collect();

        while let Some(dep_net) = worklist.pop() {
            let table = self.extint_mut(id);
            let old = table.ext_visible.remove(&dep_net);
            table.clear_resolved(dep_net);
            let Some(old) = old else {
                continue;
            };

            let ext_parent = self.extint(id).ext_parent;
            let original = self.lookup_route_exact(ext_parent, &dep_net).cloned();
            let addr = original.as_ref().and_then(|o| o.nexthop.addr());

            match (original, addr) {
                (Some(original), Some(addr)) => {
                    match self.extint_resolve(id, addr) {
                        Some((resolving_net, vif)) => {
                            let emitted = original.with_vif(vif);
                            let table = self.extint_mut(id);
                            table.ext_visible.insert(dep_net, emitted.clone());
                            table.record_resolved(dep_net, resolving_net);
                            self.emit(
                                id,
                                vec![RouteEvent::Replace {
                                    old,
                                    new: emitted,
                                }],
                            );
                        }
                        None => {
                            let table = self.extint_mut(id);
                            table.add_unresolved(addr, dep_net);
                            worklist.extend(table.take_dependents(dep_net));
                            self.emit(id, vec![RouteEvent::Delete(old)]);
                        }
                    }
                }
                _ => {
                    // The original announcement is gone as well.
                    let table = self.extint_mut(id);
                    worklist.extend(table.take_dependents(dep_net));
                    self.emit(id, vec![RouteEvent::Delete(old)]);
                }
            }
        }
    }
}

// ===== helper functions =====

// True when the route's next-hop requires recursive resolution.
fn needs_resolution<A: Ip>(route: &RouteEntry<A>) -> bool {
    matches!(route.nexthop, Nexthop::External { .. })
}
