//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use arbor_utils::ip::Ip;
use arbor_utils::policy::PolicyTags;
use prefix_trie::PrefixMap;

use crate::route::RouteEntry;
use crate::table::{RouteEvent, TableCore, TableGraph, TableId, TableNode};

// Opaque policy filter: classifies a route and returns the policy tags to
// attach to it. Policy-expression evaluation lives outside the RIB.
pub trait PolicyFilter<A: Ip>: std::fmt::Debug + Send + Sync {
    fn classify(&self, route: &RouteEntry<A>) -> PolicyTags;
}

// Filter that leaves routes untagged.
#[derive(Debug, Default)]
pub struct NullPolicyFilter;

// Sits immediately downstream of the connected-origin redist table and
// runs the policy filter over every route passing through, attaching the
// resulting tags.
#[derive(Debug)]
pub struct PolicyConnectedTable<A: Ip> {
    pub(crate) core: TableCore,
    pub(crate) parent: TableId,
    pub(crate) routes: PrefixMap<A::Network, RouteEntry<A>>,
    pub(crate) filter: Arc<dyn PolicyFilter<A>>,
}

// ===== impl NullPolicyFilter =====

impl<A: Ip> PolicyFilter<A> for NullPolicyFilter {
    fn classify(&self, route: &RouteEntry<A>) -> PolicyTags {
        route.policy_tags.clone()
    }
}

// ===== impl PolicyConnectedTable =====

impl<A: Ip> PolicyConnectedTable<A> {
    pub(crate) fn new(
        name: String,
        parent: TableId,
        filter: Arc<dyn PolicyFilter<A>>,
    ) -> Self {
        PolicyConnectedTable {
            core: TableCore::new(name),
            parent,
            routes: Default::default(),
            filter,
        }
    }

    fn tag(&self, route: &RouteEntry<A>) -> RouteEntry<A> {
        let mut route = route.clone();
        route.policy_tags = self.filter.classify(&route);
        route
    }
}

// ===== impl TableGraph =====

impl<A: Ip> TableGraph<A> {
    pub(crate) fn policy_connected_process(
        &mut self,
        id: TableId,
        event: RouteEvent<A>,
    ) {
        let TableNode::PolicyConnected(table) = self.node_mut(id) else {
            unreachable!("not a policy-connected table")
        };

        let event = match event {
            RouteEvent::Add(route) => {
                let route = table.tag(&route);
                table.routes.insert(route.net, route.clone());
                RouteEvent::Add(route)
            }
            RouteEvent::Delete(route) => {
                let route = table.tag(&route);
                table.routes.remove(&route.net);
                RouteEvent::Delete(route)
            }
            RouteEvent::Replace { old, new } => {
                let old = table.tag(&old);
                let new = table.tag(&new);
                table.routes.insert(new.net, new.clone());
                RouteEvent::Replace { old, new }
            }
        };
        self.emit(id, vec![event]);
    }

    // Re-runs the policy filter over every held route, emitting a replace
    // for each route whose tags changed. Used when the policy configuration
    // is reloaded.
    pub(crate) fn policy_connected_push_routes(&mut self, id: TableId) {
        let TableNode::PolicyConnected(table) = self.node_mut(id) else {
            unreachable!("not a policy-connected table")
        };

        let mut changed = Vec::new();
        let snapshot = table
            .routes
            .iter()
            .map(|(_, route)| route.clone())
            .collect::<Vec<_>>();
        for old in snapshot {
            let new = table.tag(&old);
            if new.policy_tags != old.policy_tags {
                table.routes.insert(new.net, new.clone());
                changed.push(RouteEvent::Replace { old, new });
            }
        }
        self.emit(id, changed);
    }
}
