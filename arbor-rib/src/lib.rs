//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod register_server;
pub mod rib;
pub mod route;
pub mod table;
pub mod vif;

mod vif_manager;

use std::sync::Arc;

use arbor_ifmgr::cmds::IfCmd;
use arbor_ifmgr::mirror::IfMirror;
use arbor_ifmgr::tree::IfTree;
use arbor_utils::ip::{Ipv4, Ipv6};
use arbor_utils::policy::PolicyTags;
use arbor_utils::queue::DispatchResult;
use ipnetwork::{Ipv4Network, Ipv6Network};
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tracing::debug;

use crate::rib::{Rib, RibChannels};
use crate::route::RouteRange;
use crate::table::policy_connected::PolicyFilter;
use crate::vif::VifSpec;

// One RIB process: one RIB per address family and transport kind, the
// interface mirror they all feed from, and the vif-manager tree copy.
#[derive(Debug)]
pub struct Master {
    pub rib4_unicast: Rib<Ipv4>,
    pub rib4_multicast: Rib<Ipv4>,
    pub rib6_unicast: Rib<Ipv6>,
    pub rib6_multicast: Rib<Ipv6>,
    pub mirror: IfMirror,
    // Previously seen interface tree, diffed on every mirror hint.
    iftree: IfTree,
}

// Control-surface requests consumed by the master event loop. Lookups and
// registrations carry a reply channel; mutations report failures through
// the log only.
#[derive(Debug)]
pub enum RibRequest {
    AddIgpTable {
        protocol: String,
        target_class: String,
        target_instance: String,
        unicast: bool,
        multicast: bool,
    },
    AddEgpTable {
        protocol: String,
        target_class: String,
        target_instance: String,
        unicast: bool,
        multicast: bool,
    },
    DeleteIgpTable {
        protocol: String,
        target_class: String,
        target_instance: String,
        unicast: bool,
        multicast: bool,
    },
    DeleteEgpTable {
        protocol: String,
        target_class: String,
        target_instance: String,
        unicast: bool,
        multicast: bool,
    },
    AddRoute4 {
        protocol: String,
        net: Ipv4Network,
        nexthop: Ipv4Addr,
        vifname: Option<String>,
        metric: u32,
        policy_tags: PolicyTags,
        unicast: bool,
        multicast: bool,
    },
    ReplaceRoute4 {
        protocol: String,
        net: Ipv4Network,
        nexthop: Ipv4Addr,
        vifname: Option<String>,
        metric: u32,
        policy_tags: PolicyTags,
        unicast: bool,
        multicast: bool,
    },
    DeleteRoute4 {
        protocol: String,
        net: Ipv4Network,
        unicast: bool,
        multicast: bool,
    },
    AddRoute6 {
        protocol: String,
        net: Ipv6Network,
        nexthop: Ipv6Addr,
        vifname: Option<String>,
        metric: u32,
        policy_tags: PolicyTags,
        unicast: bool,
        multicast: bool,
    },
    ReplaceRoute6 {
        protocol: String,
        net: Ipv6Network,
        nexthop: Ipv6Addr,
        vifname: Option<String>,
        metric: u32,
        policy_tags: PolicyTags,
        unicast: bool,
        multicast: bool,
    },
    DeleteRoute6 {
        protocol: String,
        net: Ipv6Network,
        unicast: bool,
        multicast: bool,
    },
    RegisterInterest4 {
        module: String,
        addr: Ipv4Addr,
        reply: oneshot::Sender<RouteRange<Ipv4>>,
    },
    DeregisterInterest4 {
        module: String,
        net: Ipv4Network,
    },
    RegisterInterest6 {
        module: String,
        addr: Ipv6Addr,
        reply: oneshot::Sender<RouteRange<Ipv6>>,
    },
    DeregisterInterest6 {
        module: String,
        net: Ipv6Network,
    },
    LookupRouteByDest4 {
        addr: Ipv4Addr,
        reply: oneshot::Sender<Ipv4Addr>,
    },
    LookupRouteByDest6 {
        addr: Ipv6Addr,
        reply: oneshot::Sender<Ipv6Addr>,
    },
    SetProtocolAdminDistance {
        protocol: String,
        ipv4: bool,
        ipv6: bool,
        unicast: bool,
        multicast: bool,
        admin_distance: u8,
    },
    GetProtocolAdminDistance {
        protocol: String,
        ipv4: bool,
        multicast: bool,
        reply: oneshot::Sender<u8>,
    },
    RedistEnable4 {
        target: String,
        from_protocol: String,
        network: Option<Ipv4Network>,
        cookie: String,
        transactional: bool,
        unicast: bool,
        multicast: bool,
    },
    RedistDisable4 {
        target: String,
        from_protocol: String,
        cookie: String,
        unicast: bool,
        multicast: bool,
    },
    RedistEnable6 {
        target: String,
        from_protocol: String,
        network: Option<Ipv6Network>,
        cookie: String,
        transactional: bool,
        unicast: bool,
        multicast: bool,
    },
    RedistDisable6 {
        target: String,
        from_protocol: String,
        cookie: String,
        unicast: bool,
        multicast: bool,
    },
    InsertPolicyRedistTags {
        target: String,
        tags: Vec<u32>,
    },
    ResetPolicyRedistTags {
        target: String,
    },
    PushRoutes,
    NewVif {
        spec: VifSpec,
    },
    AddVifAddr4 {
        vifname: String,
        addr: Ipv4Addr,
        subnet: Ipv4Network,
    },
    AddVifAddr6 {
        vifname: String,
        addr: Ipv6Addr,
        subnet: Ipv6Network,
    },
    TargetDeath {
        target_class: String,
        target_instance: String,
    },
    NotifyCompletion4 {
        module: String,
        multicast: bool,
        result: DispatchResult,
    },
    NotifyCompletion6 {
        module: String,
        multicast: bool,
        result: DispatchResult,
    },
    RedistCompletion4 {
        subscription: u32,
        multicast: bool,
        result: DispatchResult,
    },
    RedistCompletion6 {
        subscription: u32,
        multicast: bool,
        result: DispatchResult,
    },
    PolicyRedistCompletion4 {
        target: String,
        multicast: bool,
        result: DispatchResult,
    },
    PolicyRedistCompletion6 {
        target: String,
        multicast: bool,
        result: DispatchResult,
    },
}

// ===== impl Master =====

impl Master {
    pub fn new(
        channels4: RibChannels<Ipv4>,
        channels6: RibChannels<Ipv6>,
        filter4: Arc<dyn PolicyFilter<Ipv4>>,
        filter6: Arc<dyn PolicyFilter<Ipv6>>,
    ) -> Self {
        Master {
            rib4_unicast: Rib::new(false, channels4.clone(), filter4.clone()),
            rib4_multicast: Rib::new(true, channels4, filter4),
            rib6_unicast: Rib::new(false, channels6.clone(), filter6.clone()),
            rib6_multicast: Rib::new(true, channels6, filter6),
            mirror: IfMirror::new("rib"),
            iftree: Default::default(),
        }
    }

    // Applies one replicated interface-mirror command; hints trigger a
    // vif reconciliation pass across all RIBs.
    pub fn process_mirror_cmd(&mut self, cmd: IfCmd) {
        if self.mirror.push(cmd).is_some() {
            vif_manager::updates_made(self);
        }
    }

    // The transport to the interface producer went away: the mirrored tree
    // is untrustworthy and every mirrored vif is withdrawn.
    pub fn mirror_disconnected(&mut self) {
        self.mirror.transport_disconnected();
        vif_manager::updates_made(self);
    }

    pub fn process_request(&mut self, request: RibRequest) {
        match request {
            RibRequest::AddIgpTable {
                protocol,
                target_class,
                target_instance,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib4_unicast.add_igp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                    let _ = self.rib6_unicast.add_igp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                }
                if multicast {
                    let _ = self.rib4_multicast.add_igp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                    let _ = self.rib6_multicast.add_igp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                }
            }
            RibRequest::AddEgpTable {
                protocol,
                target_class,
                target_instance,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib4_unicast.add_egp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                    let _ = self.rib6_unicast.add_egp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                }
                if multicast {
                    let _ = self.rib4_multicast.add_egp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                    let _ = self.rib6_multicast.add_egp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                }
            }
            RibRequest::DeleteIgpTable {
                protocol,
                target_class,
                target_instance,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib4_unicast.delete_igp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                    let _ = self.rib6_unicast.delete_igp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                }
                if multicast {
                    let _ = self.rib4_multicast.delete_igp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                    let _ = self.rib6_multicast.delete_igp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                }
            }
            RibRequest::DeleteEgpTable {
                protocol,
                target_class,
                target_instance,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib4_unicast.delete_egp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                    let _ = self.rib6_unicast.delete_egp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                }
                if multicast {
                    let _ = self.rib4_multicast.delete_egp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                    let _ = self.rib6_multicast.delete_egp_table(
                        &protocol,
                        &target_class,
                        &target_instance,
                    );
                }
            }
            RibRequest::AddRoute4 {
                protocol,
                net,
                nexthop,
                vifname,
                metric,
                policy_tags,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib4_unicast.add_route(
                        &protocol,
                        net,
                        nexthop,
                        vifname.as_deref(),
                        metric,
                        policy_tags.clone(),
                    );
                }
                if multicast {
                    let _ = self.rib4_multicast.add_route(
                        &protocol,
                        net,
                        nexthop,
                        vifname.as_deref(),
                        metric,
                        policy_tags,
                    );
                }
            }
            RibRequest::ReplaceRoute4 {
                protocol,
                net,
                nexthop,
                vifname,
                metric,
                policy_tags,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib4_unicast.replace_route(
                        &protocol,
                        net,
                        nexthop,
                        vifname.as_deref(),
                        metric,
                        policy_tags.clone(),
                    );
                }
                if multicast {
                    let _ = self.rib4_multicast.replace_route(
                        &protocol,
                        net,
                        nexthop,
                        vifname.as_deref(),
                        metric,
                        policy_tags,
                    );
                }
            }
            RibRequest::DeleteRoute4 {
                protocol,
                net,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib4_unicast.delete_route(&protocol, net);
                }
                if multicast {
                    let _ = self.rib4_multicast.delete_route(&protocol, net);
                }
            }
            RibRequest::AddRoute6 {
                protocol,
                net,
                nexthop,
                vifname,
                metric,
                policy_tags,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib6_unicast.add_route(
                        &protocol,
                        net,
                        nexthop,
                        vifname.as_deref(),
                        metric,
                        policy_tags.clone(),
                    );
                }
                if multicast {
                    let _ = self.rib6_multicast.add_route(
                        &protocol,
                        net,
                        nexthop,
                        vifname.as_deref(),
                        metric,
                        policy_tags,
                    );
                }
            }
            RibRequest::ReplaceRoute6 {
                protocol,
                net,
                nexthop,
                vifname,
                metric,
                policy_tags,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib6_unicast.replace_route(
                        &protocol,
                        net,
                        nexthop,
                        vifname.as_deref(),
                        metric,
                        policy_tags.clone(),
                    );
                }
                if multicast {
                    let _ = self.rib6_multicast.replace_route(
                        &protocol,
                        net,
                        nexthop,
                        vifname.as_deref(),
                        metric,
                        policy_tags,
                    );
                }
            }
            RibRequest::DeleteRoute6 {
                protocol,
                net,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib6_unicast.delete_route(&protocol, net);
                }
                if multicast {
                    let _ = self.rib6_multicast.delete_route(&protocol, net);
                }
            }
            RibRequest::RegisterInterest4 {
                module,
                addr,
                reply,
            } => {
                let range = self.rib4_unicast.route_register(addr, &module);
                let _ = reply.send(range);
            }
            RibRequest::DeregisterInterest4 { module, net } => {
                let _ = self.rib4_unicast.route_deregister(net, &module);
            }
            RibRequest::RegisterInterest6 {
                module,
                addr,
                reply,
            } => {
                let range = self.rib6_unicast.route_register(addr, &module);
                let _ = reply.send(range);
            }
            RibRequest::DeregisterInterest6 { module, net } => {
                let _ = self.rib6_unicast.route_deregister(net, &module);
            }
            RibRequest::LookupRouteByDest4 { addr, reply } => {
                let _ = reply.send(self.rib4_unicast.lookup_route(addr));
            }
            RibRequest::LookupRouteByDest6 { addr, reply } => {
                let _ = reply.send(self.rib6_unicast.lookup_route(addr));
            }
            RibRequest::SetProtocolAdminDistance {
                protocol,
                ipv4,
                ipv6,
                unicast,
                multicast,
                admin_distance,
            } => {
                if ipv4 && unicast {
                    let _ = self
                        .rib4_unicast
                        .set_protocol_admin_distance(&protocol, admin_distance);
                }
                if ipv4 && multicast {
                    let _ = self
                        .rib4_multicast
                        .set_protocol_admin_distance(&protocol, admin_distance);
                }
                if ipv6 && unicast {
                    let _ = self
                        .rib6_unicast
                        .set_protocol_admin_distance(&protocol, admin_distance);
                }
                if ipv6 && multicast {
                    let _ = self
                        .rib6_multicast
                        .set_protocol_admin_distance(&protocol, admin_distance);
                }
            }
            RibRequest::GetProtocolAdminDistance {
                protocol,
                ipv4,
                multicast,
                reply,
            } => {
                let admin_distance = match (ipv4, multicast) {
                    (true, false) => {
                        self.rib4_unicast.get_protocol_admin_distance(&protocol)
                    }
                    (true, true) => self
                        .rib4_multicast
                        .get_protocol_admin_distance(&protocol),
                    (false, false) => {
                        self.rib6_unicast.get_protocol_admin_distance(&protocol)
                    }
                    (false, true) => self
                        .rib6_multicast
                        .get_protocol_admin_distance(&protocol),
                };
                let _ = reply.send(admin_distance);
            }
            RibRequest::RedistEnable4 {
                target,
                from_protocol,
                network,
                cookie,
                transactional,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib4_unicast.redist_enable(
                        &target,
                        &from_protocol,
                        network,
                        &cookie,
                        transactional,
                    );
                }
                if multicast {
                    let _ = self.rib4_multicast.redist_enable(
                        &target,
                        &from_protocol,
                        network,
                        &cookie,
                        transactional,
                    );
                }
            }
            RibRequest::RedistDisable4 {
                target,
                from_protocol,
                cookie,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib4_unicast.redist_disable(
                        &target,
                        &from_protocol,
                        &cookie,
                    );
                }
                if multicast {
                    let _ = self.rib4_multicast.redist_disable(
                        &target,
                        &from_protocol,
                        &cookie,
                    );
                }
            }
            RibRequest::RedistEnable6 {
                target,
                from_protocol,
                network,
                cookie,
                transactional,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib6_unicast.redist_enable(
                        &target,
                        &from_protocol,
                        network,
                        &cookie,
                        transactional,
                    );
                }
                if multicast {
                    let _ = self.rib6_multicast.redist_enable(
                        &target,
                        &from_protocol,
                        network,
                        &cookie,
                        transactional,
                    );
                }
            }
            RibRequest::RedistDisable6 {
                target,
                from_protocol,
                cookie,
                unicast,
                multicast,
            } => {
                if unicast {
                    let _ = self.rib6_unicast.redist_disable(
                        &target,
                        &from_protocol,
                        &cookie,
                    );
                }
                if multicast {
                    let _ = self.rib6_multicast.redist_disable(
                        &target,
                        &from_protocol,
                        &cookie,
                    );
                }
            }
            RibRequest::InsertPolicyRedistTags { target, tags } => {
                self.rib4_unicast
                    .insert_policy_redist_tags(&target, tags.iter().copied());
                self.rib4_multicast
                    .insert_policy_redist_tags(&target, tags.iter().copied());
                self.rib6_unicast
                    .insert_policy_redist_tags(&target, tags.iter().copied());
                self.rib6_multicast
                    .insert_policy_redist_tags(&target, tags.iter().copied());
            }
            RibRequest::ResetPolicyRedistTags { target } => {
                self.rib4_unicast.reset_policy_redist_tags(&target);
                self.rib4_multicast.reset_policy_redist_tags(&target);
                self.rib6_unicast.reset_policy_redist_tags(&target);
                self.rib6_multicast.reset_policy_redist_tags(&target);
            }
            RibRequest::PushRoutes => {
                self.rib4_unicast.push_routes();
                self.rib4_multicast.push_routes();
                self.rib6_unicast.push_routes();
                self.rib6_multicast.push_routes();
            }
            RibRequest::NewVif { spec } => {
                let _ = self.rib4_unicast.new_vif(&spec);
                let _ = self.rib4_multicast.new_vif(&spec);
                let _ = self.rib6_unicast.new_vif(&spec);
                let _ = self.rib6_multicast.new_vif(&spec);
            }
            RibRequest::AddVifAddr4 {
                vifname,
                addr,
                subnet,
            } => {
                let _ = self.rib4_unicast.add_vif_address(
                    &vifname, addr, subnet, None, None,
                );
                let _ = self.rib4_multicast.add_vif_address(
                    &vifname, addr, subnet, None, None,
                );
            }
            RibRequest::AddVifAddr6 {
                vifname,
                addr,
                subnet,
            } => {
                let _ = self.rib6_unicast.add_vif_address(
                    &vifname, addr, subnet, None, None,
                );
                let _ = self.rib6_multicast.add_vif_address(
                    &vifname, addr, subnet, None, None,
                );
            }
            RibRequest::TargetDeath {
                target_class,
                target_instance,
            } => {
                self.rib4_unicast
                    .target_death(&target_class, &target_instance);
                self.rib4_multicast
                    .target_death(&target_class, &target_instance);
                self.rib6_unicast
                    .target_death(&target_class, &target_instance);
                self.rib6_multicast
                    .target_death(&target_class, &target_instance);
            }
            RibRequest::NotifyCompletion4 {
                module,
                multicast,
                result,
            } => {
                if multicast {
                    self.rib4_multicast.notify_completion(&module, result);
                } else {
                    self.rib4_unicast.notify_completion(&module, result);
                }
            }
            RibRequest::NotifyCompletion6 {
                module,
                multicast,
                result,
            } => {
                if multicast {
                    self.rib6_multicast.notify_completion(&module, result);
                } else {
                    self.rib6_unicast.notify_completion(&module, result);
                }
            }
            RibRequest::RedistCompletion4 {
                subscription,
                multicast,
                result,
            } => {
                if multicast {
                    self.rib4_multicast.redist_completion(subscription, result);
                } else {
                    self.rib4_unicast.redist_completion(subscription, result);
                }
            }
            RibRequest::RedistCompletion6 {
                subscription,
                multicast,
                result,
            } => {
                if multicast {
                    self.rib6_multicast.redist_completion(subscription, result);
                } else {
                    self.rib6_unicast.redist_completion(subscription, result);
                }
            }
            RibRequest::PolicyRedistCompletion4 {
                target,
                multicast,
                result,
            } => {
                if multicast {
                    self.rib4_multicast
                        .policy_redist_completion(&target, result);
                } else {
                    self.rib4_unicast.policy_redist_completion(&target, result);
                }
            }
            RibRequest::PolicyRedistCompletion6 {
                target,
                multicast,
                result,
            } => {
                if multicast {
                    self.rib6_multicast
                        .policy_redist_completion(&target, result);
                } else {
                    self.rib6_unicast.policy_redist_completion(&target, result);
                }
            }
        }
    }

    async fn run(
        &mut self,
        mut request_rx: UnboundedReceiver<RibRequest>,
        mut mirror_rx: UnboundedReceiver<IfCmd>,
    ) {
        let mut mirror_open = true;
        loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else { break };
                    self.process_request(request);
                }
                cmd = mirror_rx.recv(), if mirror_open => {
                    match cmd {
                        Some(cmd) => self.process_mirror_cmd(cmd),
                        None => {
                            mirror_open = false;
                            self.mirror_disconnected();
                        }
                    }
                }
            }
        }
        debug!("master event loop finished");
    }
}

// ===== global functions =====

// Spawns the RIB process task. Returns the control-surface sender and the
// mirror command sender that the interface producer replicates into.
pub fn start(
    channels4: RibChannels<Ipv4>,
    channels6: RibChannels<Ipv6>,
    filter4: Arc<dyn PolicyFilter<Ipv4>>,
    filter6: Arc<dyn PolicyFilter<Ipv6>>,
) -> (UnboundedSender<RibRequest>, UnboundedSender<IfCmd>) {
    let (request_tx, request_rx) = unbounded_channel();
    let (mirror_tx, mirror_rx) = unbounded_channel();

    tokio::spawn(async move {
        let mut master = Master::new(channels4, channels6, filter4, filter6);
        master.mirror.transport_ready();
        master.run(request_rx, mirror_rx).await;
    });

    (request_tx, mirror_tx)
}
