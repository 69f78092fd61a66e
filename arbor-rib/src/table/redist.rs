//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use arbor_utils::ip::{Ip, IpAddrKind, IpNetworkKind};
use arbor_utils::queue::{DispatchError, DispatchQueue, DispatchResult};
use prefix_trie::PrefixMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

use crate::route::RouteEntry;
use crate::table::{RouteEvent, TableCore, TableGraph, TableId, TableNode};

// Route payload delivered to redistribution subscribers.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(bound = "")]
pub struct RedistRoute<A: Ip> {
    pub net: A::Network,
    pub nexthop_addr: A::Addr,
    pub vifname: Option<String>,
    pub metric: u32,
    pub admin_distance: u8,
    pub protocol_origin: String,
}

// One redistribution update on a subscriber's queue.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(bound = "")]
pub enum RedistEvent<A: Ip> {
    Add(RedistRoute<A>),
    Delete {
        net: A::Network,
        protocol_origin: String,
    },
    TransactionStart,
    TransactionCommit,
}

// Wire envelope sent to the redistribution consumer.
#[derive(Clone, Debug)]
pub struct RedistRequest<A: Ip> {
    pub subscription: u32,
    pub target: String,
    pub cookie: String,
    pub event: RedistEvent<A>,
}

#[derive(Debug)]
pub struct RedistSubscriber<A: Ip> {
    pub(crate) id: u32,
    pub(crate) target: String,
    pub(crate) cookie: String,
    // Restricts the subscription to routes within this network.
    pub(crate) network: Option<A::Network>,
    pub(crate) transactional: bool,
    in_transaction: bool,
    quiesced: bool,
    tx: UnboundedSender<RedistRequest<A>>,
    queue: DispatchQueue<RedistEvent<A>>,
}

// Pass-through table that additionally caches its parent's current routes,
// so a late-arriving subscriber can be served a full dump without blocking
// the parent.
#[derive(Debug)]
pub struct RedistTable<A: Ip> {
    pub(crate) core: TableCore,
    pub(crate) parent: TableId,
    pub(crate) routes: PrefixMap<A::Network, RouteEntry<A>>,
    pub(crate) subscribers: BTreeMap<u32, RedistSubscriber<A>>,
}

// ===== impl RedistRoute =====

impl<A: Ip> RedistRoute<A> {
    pub(crate) fn from_entry(route: &RouteEntry<A>) -> Self {
        RedistRoute {
            net: route.net,
            nexthop_addr: route
                .nexthop
                .addr()
                .unwrap_or_else(A::Addr::unspecified),
            vifname: route.vif.clone(),
            metric: route.metric,
            admin_distance: route.distance,
            protocol_origin: route.protocol.name.clone(),
        }
    }
}

// ===== impl RedistSubscriber =====

impl<A: Ip> RedistSubscriber<A> {
    // Queues one event, opening a transaction first if the subscriber asked
    // for transactional framing.
    fn enqueue(&mut self, event: RedistEvent<A>) {
        if self.transactional && !self.in_transaction {
            self.queue.push(RedistEvent::TransactionStart);
            self.in_transaction = true;
        }
        self.queue.push(event);
        self.quiesced = false;
    }

    // Sends the head of the queue if nothing is in flight.
    fn crank(&mut self) {
        if self.quiesced {
            return;
        }
        if let Some(event) = self.queue.dispatch() {
            let request = RedistRequest {
                subscription: self.id,
                target: self.target.clone(),
                cookie: self.cookie.clone(),
                event: event.clone(),
            };
            let _ = self.tx.send(request);
        }
    }

    fn wants(&self, net: &A::Network) -> bool {
        match &self.network {
            Some(filter) => filter.is_supernet_of(*net),
            None => true,
        }
    }
}

// ===== impl RedistTable =====

impl<A: Ip> RedistTable<A> {
    pub(crate) fn new(name: String, parent: TableId) -> Self {
        RedistTable {
            core: TableCore::new(name),
            parent,
            routes: Default::default(),
            subscribers: Default::default(),
        }
    }

    // Attaches a subscriber and dumps the currently cached routes to it
    // ahead of any live update.
    pub(crate) fn subscribe(
        &mut self,
        id: u32,
        target: &str,
        cookie: &str,
        network: Option<A::Network>,
        transactional: bool,
        tx: UnboundedSender<RedistRequest<A>>,
    ) {
        let mut subscriber = RedistSubscriber {
            id,
            target: target.to_owned(),
            cookie: cookie.to_owned(),
            network,
            transactional,
            in_transaction: false,
            quiesced: false,
            tx,
            queue: DispatchQueue::default(),
        };

        let dump = self
            .routes
            .iter()
            .map(|(_, route)| route)
            .filter(|route| subscriber.wants(&route.net))
            .map(RedistRoute::from_entry)
            .collect::<Vec<_>>();
        for route in dump {
            subscriber.enqueue(RedistEvent::Add(route));
        }
        subscriber.crank();

        self.subscribers.insert(id, subscriber);
    }

    pub(crate) fn unsubscribe(
        &mut self,
        target: &str,
        cookie: &str,
    ) -> Option<u32> {
        let id = self
            .subscribers
            .values()
            .find(|sub| sub.target == target && sub.cookie == cookie)
            .map(|sub| sub.id)?;
        self.subscribers.remove(&id);
        Some(id)
    }

    // Drops every subscription of a dead target, queued updates included.
    pub(crate) fn unsubscribe_target(&mut self, target: &str) -> Vec<u32> {
        let ids = self
            .subscribers
            .values()
            .filter(|sub| sub.target == target)
            .map(|sub| sub.id)
            .collect::<Vec<_>>();
        for id in &ids {
            self.subscribers.remove(id);
        }
        ids
    }

    pub(crate) fn completion(&mut self, id: u32, result: DispatchResult) {
        let Some(subscriber) = self.subscribers.get_mut(&id) else {
            return;
        };
        if !subscriber.queue.is_pending() {
            warn!(target = %subscriber.target,
                "redistribution completion with no dispatch outstanding");
            return;
        }
        let event = subscriber.queue.complete();

        match result {
            Ok(()) => {}
            Err(DispatchError::CommandFailed(reason)) => {
                warn!(target = %subscriber.target, %reason, ?event,
                    "redistribution update rejected");
            }
            Err(DispatchError::Transport(reason)) => {
                error!(target = %subscriber.target, %reason,
                    "redistribution transport error");
                subscriber.quiesced = true;
                return;
            }
        }
        subscriber.crank();
    }

    // Burst boundary: close open transactions and restart quiesced queues.
    pub(crate) fn flush(&mut self) {
        for subscriber in self.subscribers.values_mut() {
            if subscriber.transactional && subscriber.in_transaction {
                subscriber.queue.push(RedistEvent::TransactionCommit);
                subscriber.in_transaction = false;
            }
            subscriber.quiesced = false;
            subscriber.crank();
        }
    }
}

// ===== impl TableGraph =====

impl<A: Ip> TableGraph<A> {
    pub(crate) fn redist_process(&mut self, id: TableId, event: RouteEvent<A>) {
        let TableNode::Redist(table) = self.node_mut(id) else {
            unreachable!("not a redist table")
        };

        // Keep the cache current.
        match &event {
            RouteEvent::Add(route) => {
                table.routes.insert(route.net, route.clone());
            }
            RouteEvent::Delete(route) => {
                table.routes.remove(&route.net);
            }
            RouteEvent::Replace { new, .. } => {
                table.routes.insert(new.net, new.clone());
            }
        }

        // Publish to subscribers. A replace maps to delete-plus-add since
        // the redistribution surface has no replace.
        for subscriber in table.subscribers.values_mut() {
            if !subscriber.wants(&event.net()) {
                continue;
            }
            match &event {
                RouteEvent::Add(route) => {
                    subscriber
                        .enqueue(RedistEvent::Add(RedistRoute::from_entry(route)));
                }
                RouteEvent::Delete(route) => {
                    subscriber.enqueue(RedistEvent::Delete {
                        net: route.net,
                        protocol_origin: route.protocol.name.clone(),
                    });
                }
                RouteEvent::Replace { old, new } => {
                    subscriber.enqueue(RedistEvent::Delete {
                        net: old.net,
                        protocol_origin: old.protocol.name.clone(),
                    });
                    subscriber
                        .enqueue(RedistEvent::Add(RedistRoute::from_entry(new)));
                }
            }
            subscriber.crank();
        }

        self.emit(id, vec![event]);
    }
}
