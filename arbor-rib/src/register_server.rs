//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use arbor_utils::ip::{Ip, IpAddrKind};
use arbor_utils::queue::{DispatchError, DispatchQueue, DispatchResult};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};

use crate::route::RouteEntry;

// Notification delivered to a process that registered interest in how a
// destination resolves.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(bound = "")]
pub enum NotifyEvent<A: Ip> {
    // The best route still exists but its attributes changed.
    Changed {
        net: A::Network,
        nexthop_addr: A::Addr,
        metric: u32,
        admin_distance: u8,
        protocol_origin: String,
        multicast: bool,
    },
    // The registration's validity range is no longer trustworthy; the
    // subscriber must re-query.
    Invalidate {
        net: A::Network,
        multicast: bool,
    },
}

// Wire envelope sent to the notification consumer.
#[derive(Clone, Debug)]
pub struct NotifyRequest<A: Ip> {
    pub module: String,
    pub event: NotifyEvent<A>,
}

#[derive(Debug)]
struct NotifyQueue<A: Ip> {
    queue: DispatchQueue<NotifyEvent<A>>,
    active: bool,
}

// Per-subscriber notification queues with at most one notification in
// flight per subscriber. Queues drain on `flush`, after a burst.
#[derive(Debug)]
pub struct RegisterServer<A: Ip> {
    tx: UnboundedSender<NotifyRequest<A>>,
    queues: BTreeMap<String, NotifyQueue<A>>,
}

// ===== impl RegisterServer =====

impl<A: Ip> RegisterServer<A> {
    pub(crate) fn new(tx: UnboundedSender<NotifyRequest<A>>) -> Self {
        RegisterServer {
            tx,
            queues: Default::default(),
        }
    }

    pub(crate) fn send_route_changed(
        &mut self,
        module: &str,
        route: &RouteEntry<A>,
        multicast: bool,
    ) {
        self.add_entry(
            module,
            NotifyEvent::Changed {
                net: route.net,
                nexthop_addr: route
                    .nexthop
                    .addr()
                    .unwrap_or_else(A::Addr::unspecified),
                metric: route.metric,
                admin_distance: route.distance,
                protocol_origin: route.protocol.name.clone(),
                multicast,
            },
        );
    }

    pub(crate) fn send_invalidate(
        &mut self,
        module: &str,
        net: A::Network,
        multicast: bool,
    ) {
        self.add_entry(module, NotifyEvent::Invalidate { net, multicast });
    }

    // Starts draining every queue that has pending notifications.
    pub(crate) fn flush(&mut self) {
        let modules = self.queues.keys().cloned().collect::<Vec<_>>();
        for module in modules {
            let Some(queue) = self.queues.get_mut(&module) else {
                continue;
            };
            if queue.active || queue.queue.is_empty() {
                continue;
            }
            queue.active = true;
            self.send_next(&module);
        }
    }

    // Completion of the notification in flight to the given module. A
    // rejected notification is dropped and the queue continues; a transport
    // failure quiesces the subscriber until its next activity.
    pub(crate) fn completion(&mut self, module: &str, result: DispatchResult) {
        let Some(queue) = self.queues.get_mut(module) else {
            debug!(%module, "notification completion for unknown module");
            return;
        };
        if !queue.queue.is_pending() {
            warn!(%module, "notification completion with no dispatch \
                outstanding");
            return;
        }
        let event = queue.queue.complete();

        match result {
            Ok(()) => {}
            Err(DispatchError::CommandFailed(reason)) => {
                warn!(%module, %reason, ?event,
                    "registration update rejected by subscriber");
            }
            Err(DispatchError::Transport(reason)) => {
                error!(%module, %reason, "registration update transport \
                    error");
                queue.active = false;
                return;
            }
        }

        if queue.queue.is_empty() {
            queue.active = false;
        } else {
            self.send_next(module);
        }
    }

    // Drops a dead subscriber's queue, pending notifications included.
    pub(crate) fn forget(&mut self, module: &str) {
        self.queues.remove(module);
    }

    fn add_entry(&mut self, module: &str, event: NotifyEvent<A>) {
        self.queues
            .entry(module.to_owned())
            .or_insert_with(|| NotifyQueue {
                queue: DispatchQueue::default(),
                active: false,
            })
            .queue
            .push(event);
    }

    fn send_next(&mut self, module: &str) {
        let Some(queue) = self.queues.get_mut(module) else {
            return;
        };
        if let Some(event) = queue.queue.dispatch() {
            let request = NotifyRequest {
                module: module.to_owned(),
                event: event.clone(),
            };
            let _ = self.tx.send(request);
        }
    }
}
