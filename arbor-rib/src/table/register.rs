//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;

use arbor_utils::ip::{Ip, IpNetworkKind};
use arbor_utils::queue::DispatchResult;
use prefix_trie::PrefixMap;
use tracing::debug;

use crate::error::Error;
use crate::register_server::RegisterServer;
use crate::route::RouteRange;
use crate::table::{RouteEvent, TableCore, TableGraph, TableId, TableNode};

// Interest registration: the pair of a validity range and the subscribers
// holding it. The matched net, if any, is the prefix of the route that
// answered the original query.
#[derive(Clone, Debug)]
pub struct RouteRegister<A: Ip> {
    pub valid_net: A::Network,
    pub matched_net: Option<A::Network>,
    pub modules: BTreeSet<String>,
}

// Tracks external subscriptions and notifies subscribers of route events
// affecting their validity range.
#[derive(Debug)]
pub struct RegisterTable<A: Ip> {
    pub(crate) core: TableCore,
    pub(crate) parent: Option<TableId>,
    pub(crate) registers: PrefixMap<A::Network, RouteRegister<A>>,
    pub(crate) server: RegisterServer<A>,
    pub(crate) multicast: bool,
}

// ===== impl RegisterTable =====

impl<A: Ip> RegisterTable<A> {
    pub(crate) fn new(
        name: String,
        server: RegisterServer<A>,
        multicast: bool,
    ) -> Self {
        RegisterTable {
            core: TableCore::new(name),
            parent: None,
            registers: Default::default(),
            server,
            multicast,
        }
    }
}

// ===== impl TableGraph =====

impl<A: Ip> TableGraph<A> {
    fn register_mut(&mut self, id: TableId) -> &mut RegisterTable<A> {
        let TableNode::Register(table) = self.node_mut(id) else {
            unreachable!("not a register table")
        };
        table
    }

    // Registers the module's interest in the resolution of `addr`. Returns
    // the current answer and the validity range it holds for.
    pub(crate) fn register_route_range(
        &mut self,
        id: TableId,
        addr: A::Addr,
        module: &str,
    ) -> RouteRange<A> {
        let range = match self.node(id).parent() {
            Some(parent) => self.lookup_route_range(parent, addr),
            None => RouteRange {
                matched: None,
                valid_net: A::Network::default(A::AF),
            },
        };
        debug!(%addr, %module, valid_net = %range.valid_net,
            "route registration");

        let matched_net = range.matched.as_ref().map(|route| route.net);
        let table = self.register_mut(id);
        match table.registers.get_mut(&range.valid_net) {
            Some(register) => {
                register.modules.insert(module.to_owned());
            }
            None => {
                let mut modules = BTreeSet::new();
                modules.insert(module.to_owned());
                table.registers.insert(
                    range.valid_net,
                    RouteRegister {
                        valid_net: range.valid_net,
                        matched_net,
                        modules,
                    },
                );
            }
        }
        range
    }

    // Drops the module's registration for the given validity range.
    pub(crate) fn deregister_route_range(
        &mut self,
        id: TableId,
        valid_net: A::Network,
        module: &str,
    ) -> Result<(), Error> {
        let table = self.register_mut(id);
        let Some(register) = table.registers.get_mut(&valid_net) else {
            return Err(Error::NoSuchRegistration(
                valid_net.into(),
                module.to_owned(),
            ));
        };
        if !register.modules.remove(module) {
            return Err(Error::NoSuchRegistration(
                valid_net.into(),
                module.to_owned(),
            ));
        }
        if register.modules.is_empty() {
            table.registers.remove(&valid_net);
        }
        Ok(())
    }

    pub(crate) fn register_process(
        &mut self,
        id: TableId,
        event: RouteEvent<A>,
    ) {
        let event_net = event.net();
        let TableNode::Register(table) = self.node_mut(id) else {
            unreachable!("not a register table")
        };
        let multicast = table.multicast;

        // Registrations whose validity range overlaps the event are no
        // longer trustworthy: remove them and tell their subscribers.
        let affected = table
            .registers
            .iter()
            .filter(|(valid_net, _)| {
                valid_net.is_supernet_of(event_net)
                    || event_net.is_supernet_of(**valid_net)
            })
            .map(|(_, register)| register.clone())
            .collect::<Vec<_>>();

        for register in affected {
            table.registers.remove(&register.valid_net);

            match &event {
                RouteEvent::Replace { new, .. }
                    if register.matched_net == Some(event_net) =>
                {
                    // The answer itself changed in place.
                    for module in &register.modules {
                        table.server.send_route_changed(module, new, multicast);
                    }
                }
                _ => {
                    for module in &register.modules {
                        table.server.send_invalidate(
                            module, event_net, multicast,
                        );
                    }
                }
            }
        }

        self.emit(id, vec![event]);
    }

    pub(crate) fn register_flush(&mut self, id: TableId) {
        self.register_mut(id).server.flush();
    }

    pub(crate) fn register_forget(&mut self, id: TableId, module: &str) {
        self.register_mut(id).server.forget(module);
    }

    pub(crate) fn register_completion(
        &mut self,
        id: TableId,
        module: &str,
        result: DispatchResult,
    ) {
        self.register_mut(id).server.completion(module, result);
    }
}
