//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use arbor_utils::ip::Ip;
use arbor_utils::policy::PolicyRedistMap;
use arbor_utils::queue::{DispatchError, DispatchQueue, DispatchResult};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

use crate::table::redist::{RedistEvent, RedistRoute};
use crate::table::{RouteEvent, TableCore, TableGraph, TableId, TableNode};

// Wire envelope for a policy-driven redistribution update.
#[derive(Clone, Debug)]
pub struct PolicyRedistRequest<A: Ip> {
    pub target: String,
    pub multicast: bool,
    pub event: RedistEvent<A>,
}

// Consults the policy-tag to protocol-set map and notifies every
// subscribing protocol of adds and deletes passing through. The forwarded
// route stream itself is unchanged; redistribution is a side effect.
#[derive(Debug)]
pub struct PolicyRedistTable<A: Ip> {
    pub(crate) core: TableCore,
    pub(crate) parent: TableId,
    pub(crate) redist_map: PolicyRedistMap,
    pub(crate) multicast: bool,
    tx: UnboundedSender<PolicyRedistRequest<A>>,
    outputs: BTreeMap<String, PolicyRedistOutput<A>>,
}

#[derive(Debug)]
struct PolicyRedistOutput<A: Ip> {
    queue: DispatchQueue<RedistEvent<A>>,
    quiesced: bool,
}

// ===== impl PolicyRedistTable =====

impl<A: Ip> PolicyRedistTable<A> {
    pub(crate) fn new(
        name: String,
        parent: TableId,
        multicast: bool,
        tx: UnboundedSender<PolicyRedistRequest<A>>,
    ) -> Self {
        PolicyRedistTable {
            core: TableCore::new(name),
            parent,
            redist_map: Default::default(),
            multicast,
            tx,
            outputs: Default::default(),
        }
    }

    fn enqueue(&mut self, target: &str, event: RedistEvent<A>) {
        let output = self.outputs.entry(target.to_owned()).or_default();
        output.queue.push(event);
        output.quiesced = false;
        self.crank(target);
    }

    fn crank(&mut self, target: &str) {
        let Some(output) = self.outputs.get_mut(target) else {
            return;
        };
        if output.quiesced {
            return;
        }
        if let Some(event) = output.queue.dispatch() {
            let request = PolicyRedistRequest {
                target: target.to_owned(),
                multicast: self.multicast,
                event: event.clone(),
            };
            let _ = self.tx.send(request);
        }
    }

    pub(crate) fn completion(&mut self, target: &str, result: DispatchResult) {
        let Some(output) = self.outputs.get_mut(target) else {
            return;
        };
        if !output.queue.is_pending() {
            warn!(%target,
                "policy redistribution completion with no dispatch \
                 outstanding");
            return;
        }
        let event = output.queue.complete();

        match result {
            Ok(()) => {}
            Err(DispatchError::CommandFailed(reason)) => {
                warn!(%target, %reason, ?event,
                    "policy redistribution update rejected");
            }
            Err(DispatchError::Transport(reason)) => {
                error!(%target, %reason,
                    "policy redistribution transport error");
                output.quiesced = true;
                return;
            }
        }
        self.crank(target);
    }

    pub(crate) fn flush(&mut self) {
        let targets = self.outputs.keys().cloned().collect::<Vec<_>>();
        for target in targets {
            if let Some(output) = self.outputs.get_mut(&target) {
                output.quiesced = false;
            }
            self.crank(&target);
        }
    }
}

impl<A: Ip> Default for PolicyRedistOutput<A> {
    fn default() -> Self {
        PolicyRedistOutput {
            queue: DispatchQueue::default(),
            quiesced: false,
        }
    }
}

// ===== impl TableGraph =====

impl<A: Ip> TableGraph<A> {
    pub(crate) fn policy_redist_process(
        &mut self,
        id: TableId,
        event: RouteEvent<A>,
    ) {
        let TableNode::PolicyRedist(table) = self.node_mut(id) else {
            unreachable!("not a policy-redist table")
        };

        match &event {
            RouteEvent::Add(route) => {
                let targets = table.redist_map.targets_for(&route.policy_tags);
                for target in targets {
                    table.enqueue(
                        &target,
                        RedistEvent::Add(RedistRoute::from_entry(route)),
                    );
                }
            }
            RouteEvent::Delete(route) => {
                let targets = table.redist_map.targets_for(&route.policy_tags);
                for target in targets {
                    table.enqueue(
                        &target,
                        RedistEvent::Delete {
                            net: route.net,
                            protocol_origin: route.protocol.name.clone(),
                        },
                    );
                }
            }
            RouteEvent::Replace { old, new } => {
                let old_targets =
                    table.redist_map.targets_for(&old.policy_tags);
                let new_targets =
                    table.redist_map.targets_for(&new.policy_tags);

                // Targets losing the route get a delete, targets gaining it
                // an add, and targets keeping it a delete-plus-add refresh.
                for target in &old_targets {
                    table.enqueue(
                        target,
                        RedistEvent::Delete {
                            net: old.net,
                            protocol_origin: old.protocol.name.clone(),
                        },
                    );
                }
                for target in &new_targets {
                    table.enqueue(
                        target,
                        RedistEvent::Add(RedistRoute::from_entry(new)),
                    );
                }
            }
        }

        self.emit(id, vec![event]);
    }
}
