//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use arbor_utils::ip::{Ip, IpNetworkKind};
use prefix_trie::PrefixMap;
use tracing::debug;

use crate::error::Error;
use crate::route::{Protocol, RouteEntry};
use crate::table::{RouteEvent, TableCore, TableGraph, TableId, TableNode};

// Leaf table holding the full set of routes announced by one protocol
// instance. The protocol's administrative distance is stamped into every
// route it emits.
#[derive(Debug)]
pub struct OriginTable<A: Ip> {
    pub(crate) core: TableCore,
    pub(crate) protocol: Arc<Protocol>,
    pub(crate) admin_distance: u8,
    pub(crate) routes: PrefixMap<A::Network, RouteEntry<A>>,
}

// ===== impl OriginTable =====

impl<A: Ip> OriginTable<A> {
    pub(crate) fn new(
        name: String,
        protocol: Arc<Protocol>,
        admin_distance: u8,
    ) -> Self {
        OriginTable {
            core: TableCore::new(name),
            protocol,
            admin_distance,
            routes: Default::default(),
        }
    }

    pub(crate) fn lookup_route(&self, addr: A::Addr) -> Option<&RouteEntry<A>> {
        let host = A::Network::host_prefix(addr);
        self.routes.get_lpm(&host).map(|(_, route)| route)
    }
}

// ===== impl TableGraph =====

impl<A: Ip> TableGraph<A> {
    // Accepts an announcement into the origin table and propagates it
    // downstream. A duplicate announcement for the same prefix is a
    // protocol bug and is rejected.
    pub(crate) fn origin_add_route(
        &mut self,
        id: TableId,
        mut route: RouteEntry<A>,
    ) -> Result<(), Error> {
        let TableNode::Origin(table) = self.node_mut(id) else {
            unreachable!("not an origin table")
        };
        route.protocol = table.protocol.clone();
        route.distance = table.admin_distance;

        if table.routes.get(&route.net).is_some() {
            return Err(Error::DuplicateRoute(
                table.core.name.clone(),
                route.net.into(),
            ));
        }
        table.routes.insert(route.net, route.clone());

        self.emit(id, vec![RouteEvent::Add(route)]);
        Ok(())
    }

    // Withdraws the announcement for the given prefix, returning the
    // removed entry.
    pub(crate) fn origin_delete_route(
        &mut self,
        id: TableId,
        net: A::Network,
    ) -> Result<RouteEntry<A>, Error> {
        let TableNode::Origin(table) = self.node_mut(id) else {
            unreachable!("not an origin table")
        };
        let Some(route) = table.routes.remove(&net) else {
            return Err(Error::NoSuchRoute(
                table.core.name.clone(),
                net.into(),
            ));
        };

        self.emit(id, vec![RouteEvent::Delete(route.clone())]);
        Ok(route)
    }

    // Withdraws every route the protocol announced. The table itself
    // survives so the protocol can resume later.
    pub(crate) fn origin_shutdown(
        &mut self,
        id: TableId,
    ) -> Vec<RouteEntry<A>> {
        let TableNode::Origin(table) = self.node_mut(id) else {
            unreachable!("not an origin table")
        };
        debug!(table = %table.core.name, "routing protocol shutdown");

        let routes = std::mem::take(&mut table.routes);
        let removed = routes
            .iter()
            .map(|(_, route)| route.clone())
            .collect::<Vec<_>>();

        for route in &removed {
            self.emit(id, vec![RouteEvent::Delete(route.clone())]);
        }
        removed
    }
}
