//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;

use arbor_utils::ip::{Ip, IpAddrKind, IpNetworkKind};
use arbor_utils::policy::PolicyTags;
use arbor_utils::queue::DispatchResult;
use chrono::Utc;
use derive_new::new;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::register_server::{NotifyRequest, RegisterServer};
use crate::route::{
    NexthopRegistry, Protocol, ProtocolKind, RouteEntry, RouteRange,
};
use crate::table::extint::ExtIntTable;
use crate::table::merged::MergedTable;
use crate::table::origin::OriginTable;
use crate::table::policy_connected::{PolicyConnectedTable, PolicyFilter};
use crate::table::policy_redist::{PolicyRedistRequest, PolicyRedistTable};
use crate::table::redist::{RedistRequest, RedistTable};
use crate::table::register::RegisterTable;
use crate::table::{TableGraph, TableId, TableKind, TableNode};
use crate::vif::{RibVif, VifAddr, VifSpec};

// Administrative distance bounds.
pub const CONNECTED_ADMIN_DISTANCE: u8 = 0;
pub const UNKNOWN_ADMIN_DISTANCE: u8 = 255;

// Environment variable overriding the default static-route distance.
const STATIC_DISTANCE_ENV: &str = "RIB_STATIC_DISTANCE";

// Outbound channels shared by the tables of one RIB.
#[derive(Clone, Debug, new)]
pub struct RibChannels<A: Ip> {
    pub notify_tx: UnboundedSender<NotifyRequest<A>>,
    pub redist_tx: UnboundedSender<RedistRequest<A>>,
    pub policy_redist_tx: UnboundedSender<PolicyRedistRequest<A>>,
}

// One Routing Information Base instance: a single address family, unicast
// or multicast.
//
// The RIB owns the route-table graph, arbitrating among the announcements
// of the registered protocols and feeding the winning routes to the final
// table, whose output is the RIB's observable result.
#[derive(Debug)]
pub struct Rib<A: Ip> {
    graph: TableGraph<A>,
    // Table directories, keyed by table name.
    igp_origin_tables: BTreeMap<String, TableId>,
    egp_origin_tables: BTreeMap<String, TableId>,
    merged_tables: BTreeMap<String, TableId>,
    redist_tables: BTreeMap<String, TableId>,
    // Origin tables keyed by "<protocol> <target class> <target instance>",
    // so protocol death events can be routed to the right table.
    instances: BTreeMap<String, TableId>,
    // Protocol registry and preference table.
    protocols: BTreeMap<String, Arc<Protocol>>,
    admin_distances: BTreeMap<String, u8>,
    // Interned next-hops.
    nexthops: NexthopRegistry<A>,
    // Vifs, live and pending deletion.
    vifs: BTreeMap<String, RibVif<A>>,
    deleted_vifs: BTreeMap<String, RibVif<A>>,
    // Fixed plumbing landmarks.
    connected_origin: TableId,
    register_table: TableId,
    policy_redist_table: TableId,
    policy_connected_table: TableId,
    ext_int_table: Option<TableId>,
    final_table: TableId,
    // Redistribution subscription directory for completion routing.
    redist_subs: BTreeMap<u32, TableId>,
    next_sub_id: u32,
    channels: RibChannels<A>,
    multicast: bool,
    errors_are_fatal: bool,
}

// ===== impl Rib =====

impl<A: Ip> Rib<A> {
    pub fn new(
        multicast: bool,
        channels: RibChannels<A>,
        filter: Arc<dyn PolicyFilter<A>>,
    ) -> Self {
        let mut graph = TableGraph::default();

        // Fixed tail chain: RegisterTable -> PolicyRedistTable ->
        // Redist:all, the final table.
        let server = RegisterServer::new(channels.notify_tx.clone());
        let register_table = graph.insert(TableNode::Register(
            RegisterTable::new("RegisterTable".to_owned(), server, multicast),
        ));
        let policy_redist_table =
            graph.insert(TableNode::PolicyRedist(PolicyRedistTable::new(
                "PolicyRedistTable".to_owned(),
                register_table,
                multicast,
                channels.policy_redist_tx.clone(),
            )));
        graph.set_next(register_table, Some(policy_redist_table));
        let final_table = graph.insert(TableNode::Redist(RedistTable::new(
            redist_tablename("all"),
            policy_redist_table,
        )));
        graph.set_next(policy_redist_table, Some(final_table));

        // Connected chain: connected origin -> Redist:connected ->
        // PolicyConnectedTable, plumbed ahead of the tail.
        let connected_protocol = Arc::new(Protocol::new(
            "connected".to_owned(),
            ProtocolKind::Igp,
        ));
        let connected_origin = graph.insert(TableNode::Origin(
            OriginTable::new(
                "connected".to_owned(),
                connected_protocol.clone(),
                CONNECTED_ADMIN_DISTANCE,
            ),
        ));
        let connected_redist =
            graph.insert(TableNode::Redist(RedistTable::new(
                redist_tablename("connected"),
                connected_origin,
            )));
        let policy_connected_table =
            graph.insert(TableNode::PolicyConnected(PolicyConnectedTable::new(
                "PolicyConnectedTable".to_owned(),
                connected_redist,
                filter,
            )));
        graph.set_next(connected_origin, Some(connected_redist));
        graph.set_next(connected_redist, Some(policy_connected_table));
        graph.set_next(policy_connected_table, Some(register_table));
        graph.replumb(register_table, None, policy_connected_table);

        let mut rib = Rib {
            graph,
            igp_origin_tables: BTreeMap::new(),
            egp_origin_tables: BTreeMap::new(),
            merged_tables: BTreeMap::new(),
            redist_tables: BTreeMap::new(),
            instances: BTreeMap::new(),
            protocols: BTreeMap::new(),
            admin_distances: default_admin_distances(),
            nexthops: NexthopRegistry::default(),
            vifs: BTreeMap::new(),
            deleted_vifs: BTreeMap::new(),
            connected_origin,
            register_table,
            policy_redist_table,
            policy_connected_table,
            ext_int_table: None,
            final_table,
            redist_subs: BTreeMap::new(),
            next_sub_id: 0,
            channels,
            multicast,
            errors_are_fatal: false,
        };
        rib.protocols
            .insert("connected".to_owned(), connected_protocol);
        rib.igp_origin_tables
            .insert("connected".to_owned(), connected_origin);
        rib.redist_tables
            .insert(redist_tablename("all"), final_table);
        rib.redist_tables
            .insert(redist_tablename("connected"), connected_redist);
        rib
    }

    pub fn name(&self) -> String {
        format!(
            "{} {} RIB",
            if self.multicast { "Multicast" } else { "Unicast" },
            A::AF,
        )
    }

    pub fn multicast(&self) -> bool {
        self.multicast
    }

    // In test mode, structural and admission-target errors abort.
    pub fn set_errors_are_fatal(&mut self) {
        self.errors_are_fatal = true;
    }

    fn report(&self, error: Error) -> Error {
        error.log();
        if self.errors_are_fatal
            && (error.is_structural()
                || matches!(
                    error,
                    Error::UnknownProtocol(_) | Error::NoSuchTable(_)
                ))
        {
            panic!("fatal RIB error: {error}");
        }
        error
    }

    // ===== Origin table management =====

    fn find_origin_table(&self, tablename: &str) -> Option<TableId> {
        self.igp_origin_tables
            .get(tablename)
            .or_else(|| self.egp_origin_tables.get(tablename))
            .copied()
    }

    pub fn add_igp_table(
        &mut self,
        tablename: &str,
        target_class: &str,
        target_instance: &str,
    ) -> Result<(), Error> {
        debug!(table = %tablename, "add IGP table");
        self.add_origin_table(
            tablename,
            target_class,
            target_instance,
            ProtocolKind::Igp,
        )?;

        // A RedistTable is unconditionally plumbed behind each IGP origin,
        // tracking its routes so a late redistribution consumer can be
        // served a dump.
        let origin = match self.igp_origin_tables.get(tablename) {
            Some(origin) => *origin,
            None => return Err(self.report(Error::NoSuchTable(tablename.to_owned()))),
        };
        self.add_redist_table(origin)
    }

    pub fn add_egp_table(
        &mut self,
        tablename: &str,
        target_class: &str,
        target_instance: &str,
    ) -> Result<(), Error> {
        debug!(table = %tablename, "add EGP table");
        self.add_origin_table(
            tablename,
            target_class,
            target_instance,
            ProtocolKind::Egp,
        )
    }

    pub fn delete_igp_table(
        &mut self,
        tablename: &str,
        target_class: &str,
        target_instance: &str,
    ) -> Result<(), Error> {
        self.delete_origin_table(tablename, target_class, target_instance)
    }

    pub fn delete_egp_table(
        &mut self,
        tablename: &str,
        target_class: &str,
        target_instance: &str,
    ) -> Result<(), Error> {
        self.delete_origin_table(tablename, target_class, target_instance)
    }

    fn add_origin_table(
        &mut self,
        tablename: &str,
        target_class: &str,
        target_instance: &str,
        kind: ProtocolKind,
    ) -> Result<(), Error> {
        // Register the protocol, or bump its generation id on re-register
        // so surviving announcements from the previous incarnation can be
        // identified.
        let protocol = match self.protocols.get(tablename) {
            Some(protocol) => {
                let mut bumped = (**protocol).clone();
                bumped.genid += 1;
                let bumped = Arc::new(bumped);
                self.protocols.insert(tablename.to_owned(), bumped.clone());
                bumped
            }
            None => {
                let protocol =
                    Arc::new(Protocol::new(tablename.to_owned(), kind));
                self.protocols.insert(tablename.to_owned(), protocol.clone());
                protocol
            }
        };

        let existing = match kind {
            ProtocolKind::Igp => self.igp_origin_tables.get(tablename),
            ProtocolKind::Egp => self.egp_origin_tables.get(tablename),
        }
        .copied();
        if let Some(origin) = existing {
            // Table already exists, hence reuse it; refresh the protocol
            // stamped into newly admitted routes.
            if let Some(table) = self.graph.node_mut(origin).as_origin_mut()
            {
                table.protocol = protocol;
            }
            if !target_instance.is_empty() {
                self.instances.insert(
                    instance_key(tablename, target_class, target_instance),
                    origin,
                );
            }
            return Ok(());
        }

        // Remember the first IGP and EGP origins before creating the new
        // table; plumbing depends on what already exists.
        let existing_igp = self.igp_origin_tables.values().next().copied();
        let existing_egp = self.egp_origin_tables.values().next().copied();

        let admin_distance = self.get_protocol_admin_distance(tablename);
        let origin = self.graph.insert(TableNode::Origin(OriginTable::new(
            tablename.to_owned(),
            protocol,
            admin_distance,
        )));
        match kind {
            ProtocolKind::Igp => {
                self.igp_origin_tables
                    .insert(tablename.to_owned(), origin);
            }
            ProtocolKind::Egp => {
                self.egp_origin_tables
                    .insert(tablename.to_owned(), origin);
            }
        }
        if !target_instance.is_empty() {
            self.instances.insert(
                instance_key(tablename, target_class, target_instance),
                origin,
            );
        }

        self.plumb_origin_table(origin, kind, existing_igp, existing_egp)
    }

    fn delete_origin_table(
        &mut self,
        tablename: &str,
        target_class: &str,
        target_instance: &str,
    ) -> Result<(), Error> {
        let Some(origin) = self.find_origin_table(tablename) else {
            return Err(self.report(Error::NoSuchTable(tablename.to_owned())));
        };

        if !target_instance.is_empty() {
            let key = instance_key(tablename, target_class, target_instance);
            if self.instances.get(&key) != Some(&origin) {
                return Err(self
                    .report(Error::NoSuchTable(tablename.to_owned())));
            }
            self.instances.remove(&key);
        }

        // Remove all the routes this table used to originate, but keep the
        // table so the protocol can resume.
        let removed = self.graph.origin_shutdown(origin);
        for route in &removed {
            if let Some(vifname) = &route.vif {
                self.vif_usage_decr(vifname);
            }
        }
        self.flush();
        Ok(())
    }

    // Protocol death observed on the transport: withdraw everything the
    // matching origin table announced.
    pub fn target_death(&mut self, target_class: &str, target_instance: &str) {
        let suffix = format!(" {target_class} {target_instance}");
        let Some((key, origin)) = self
            .instances
            .iter()
            .find(|(key, _)| key.ends_with(&suffix))
            .map(|(key, origin)| (key.clone(), *origin))
        else {
            return;
        };

        info!(%target_class, %target_instance,
            "received death event, shutting down origin table");
        self.instances.remove(&key);
        let removed = self.graph.origin_shutdown(origin);
        for route in &removed {
            if let Some(vifname) = &route.vif {
                self.vif_usage_decr(vifname);
            }
        }

        // Drop anything still queued toward the dead target.
        self.graph
            .register_forget(self.register_table, target_class);
        for redist in self.redist_tables.values() {
            if let Some(table) = self.graph.node_mut(*redist).as_redist_mut() {
                for id in table.unsubscribe_target(target_class) {
                    self.redist_subs.remove(&id);
                }
            }
        }

        self.flush();
    }

    // ===== Plumbing =====

    fn plumb_origin_table(
        &mut self,
        origin: TableId,
        kind: ProtocolKind,
        existing_igp: Option<TableId>,
        existing_egp: Option<TableId>,
    ) -> Result<(), Error> {
        match (kind, existing_igp, existing_egp) {
            // First origin of either kind: plumb ahead of the tail chain.
            (_, None, None) => self.plumb_ahead_of_first(origin),
            // First origin of its kind while the other kind exists: the
            // graph gains its ext/int boundary.
            (ProtocolKind::Igp, None, Some(_))
            | (ProtocolKind::Egp, _, None) => {
                self.plumb_ahead_of_ext_int(origin, kind)
            }
            // Another origin of an existing kind: merge with its siblings.
            (ProtocolKind::Igp, Some(existing), _) => {
                self.plumb_ahead_of_merged(origin, existing)
            }
            (ProtocolKind::Egp, _, Some(existing)) => {
                self.plumb_ahead_of_merged(origin, existing)
            }
        }
    }

    // Precondition: the tail chain (register / policy-redist / redist
    // tables) exists and ends at the final table. This holds from
    // construction onward.
    fn tail_chain_head(&self) -> Result<TableId, Error> {
        let mask = TableKind::REDIST
            | TableKind::POLICY_REDIST
            | TableKind::REGISTER;
        if !self.graph.node(self.final_table).kind().intersects(mask) {
            return Err(Error::FinalTableNotPlumbed(
                self.graph.node(self.final_table).name().to_owned(),
            ));
        }
        Ok(self.graph.track_back(self.final_table, mask))
    }

    fn plumb_ahead_of_first(&mut self, origin: TableId) -> Result<(), Error> {
        debug!("plumbing first origin table ahead of the tail chain");
        let head = match self.tail_chain_head() {
            Ok(head) => head,
            Err(error) => return Err(self.report(error)),
        };
        self.graph.replumb(head, None, origin);
        self.graph.set_next(origin, Some(head));
        Ok(())
    }

    fn plumb_ahead_of_ext_int(
        &mut self,
        origin: TableId,
        kind: ProtocolKind,
    ) -> Result<(), Error> {
        if self.ext_int_table.is_some() {
            return Err(self.report(Error::ExtIntTableAlreadyExists));
        }
        let next_table = match self.tail_chain_head() {
            Ok(head) => head,
            Err(error) => return Err(self.report(error)),
        };
        let Some(existing) = self.graph.node(next_table).parent() else {
            return Err(self.report(Error::FinalTableNotPlumbed(
                self.graph.node(next_table).name().to_owned(),
            )));
        };

        let (int_parent, ext_parent) = match kind {
            ProtocolKind::Igp => (origin, existing),
            ProtocolKind::Egp => (existing, origin),
        };
        let ext_int = self.graph.insert(TableNode::ExtInt(ExtIntTable::new(
            "ExtIntTable".to_owned(),
            int_parent,
            ext_parent,
        )));
        self.ext_int_table = Some(ext_int);

        self.graph.set_next(ext_int, Some(next_table));
        self.graph.replumb(next_table, Some(existing), ext_int);
        self.graph.set_next(existing, Some(ext_int));
        self.graph.set_next(origin, Some(ext_int));
        Ok(())
    }

    fn plumb_ahead_of_merged(
        &mut self,
        origin: TableId,
        existing: TableId,
    ) -> Result<(), Error> {
        // Skip past any redist or policy-connected tables hanging off the
        // existing origin.
        let existing = self
            .graph
            .track_forward(existing, TableKind::REDIST | TableKind::POLICY_CONNECTED);
        let next_table = self.graph.next(existing);

        let name = format!(
            "Merged:{}+{}",
            self.graph.node(existing).name(),
            self.graph.node(origin).name(),
        );
        if self.merged_tables.contains_key(&name) {
            return Err(self.report(Error::TableAlreadyExists(name)));
        }
        let merged = self.graph.insert(TableNode::Merged(MergedTable::new(
            name.clone(),
            existing,
            origin,
        )));
        self.merged_tables.insert(name, merged);

        self.graph.set_next(merged, next_table);
        if let Some(next_table) = next_table {
            self.graph.replumb(next_table, Some(existing), merged);
        }
        self.graph.set_next(existing, Some(merged));
        self.graph.set_next(origin, Some(merged));

        // The existing table can have been the last one; then it isn't
        // anymore.
        if self.final_table == existing {
            self.final_table = merged;
        }
        Ok(())
    }

    fn add_redist_table(&mut self, parent: TableId) -> Result<(), Error> {
        let name = redist_tablename(self.graph.node(parent).name());
        if self.redist_tables.contains_key(&name) {
            // RedistTable already exists, no sweat.
            return Ok(());
        }

        let next_table = self.graph.next(parent);
        let redist = self.graph.insert(TableNode::Redist(RedistTable::new(
            name.clone(),
            parent,
        )));
        self.redist_tables.insert(name, redist);

        self.graph.set_next(redist, next_table);
        if let Some(next_table) = next_table {
            self.graph.replumb(next_table, Some(parent), redist);
        }
        self.graph.set_next(parent, Some(redist));
        Ok(())
    }

    // ===== Route admission =====

    pub fn add_route(
        &mut self,
        tablename: &str,
        net: A::Network,
        nexthop_addr: A::Addr,
        vifname: Option<&str>,
        metric: u32,
        policy_tags: PolicyTags,
    ) -> Result<(), Error> {
        let Some(protocol) = self.protocols.get(tablename).cloned() else {
            return Err(
                self.report(Error::UnknownProtocol(tablename.to_owned()))
            );
        };
        let Some(origin) = self.find_origin_table(tablename) else {
            return Err(self.report(Error::NoSuchTable(tablename.to_owned())));
        };

        // For IGPs only the low 16 bits of the metric are significant.
        let mut metric = metric;
        if protocol.is_igp() && metric > 0xffff {
            warn!(table = %tablename, %net, %metric,
                "IGP metric exceeds 16 bits, truncating");
            metric &= 0xffff;
        }

        let (nexthop, vif) = match vifname.filter(|name| !name.is_empty()) {
            // Route with an explicitly specified network interface.
            Some(vifname) => {
                if !self.vifs.contains_key(vifname) {
                    return Err(
                        self.report(Error::NoSuchVif(vifname.to_owned()))
                    );
                }
                let nexthop = self.nexthops.find_or_create_peer(nexthop_addr);
                (nexthop, Some(vifname.to_owned()))
            }
            None => {
                // An IGP next-hop that is one of our own addresses is
                // rejected at admission.
                if protocol.is_igp() && self.is_self_address(nexthop_addr) {
                    return Err(self.report(Error::SelfAddressNexthop(
                        tablename.to_owned(),
                        net.into(),
                        nexthop_addr.into(),
                    )));
                }

                // Search for a route to a directly connected destination.
                let vif = self
                    .graph
                    .lookup_route(self.connected_origin, nexthop_addr)
                    .and_then(|route| route.vif.clone());
                match vif {
                    Some(vifname) => {
                        let nexthop =
                            self.nexthops.find_or_create_peer(nexthop_addr);
                        (nexthop, Some(vifname))
                    }
                    None if protocol.is_igp() => {
                        // An IGP must have a directly connected interface
                        // toward the next-hop router.
                        return Err(self.report(Error::NexthopNotConnected(
                            tablename.to_owned(),
                            net.into(),
                            nexthop_addr.into(),
                        )));
                    }
                    None => {
                        let nexthop = self
                            .nexthops
                            .find_or_create_external(nexthop_addr);
                        (nexthop, None)
                    }
                }
            }
        };

        let route = RouteEntry {
            net,
            nexthop,
            vif: vif.clone(),
            protocol,
            distance: 0,
            metric,
            policy_tags,
            last_updated: Utc::now(),
        };
        if let Err(error) = self.graph.origin_add_route(origin, route) {
            return Err(self.report(error));
        }
        if let Some(vifname) = vif {
            self.vif_usage_incr(&vifname);
        }

        self.flush();
        Ok(())
    }

    pub fn replace_route(
        &mut self,
        tablename: &str,
        net: A::Network,
        nexthop_addr: A::Addr,
        vifname: Option<&str>,
        metric: u32,
        policy_tags: PolicyTags,
    ) -> Result<(), Error> {
        let Some(origin) = self.find_origin_table(tablename) else {
            return Err(self.report(Error::NoSuchTable(tablename.to_owned())));
        };
        let removed = match self.graph.origin_delete_route(origin, net) {
            Ok(removed) => removed,
            Err(error) => return Err(self.report(error)),
        };
        if let Some(vifname) = &removed.vif {
            self.vif_usage_decr(vifname);
        }

        // No need to flush here, adding the replacement will.
        self.add_route(
            tablename,
            net,
            nexthop_addr,
            vifname,
            metric,
            policy_tags,
        )
    }

    pub fn delete_route(
        &mut self,
        tablename: &str,
        net: A::Network,
    ) -> Result<(), Error> {
        let Some(origin) = self.find_origin_table(tablename) else {
            return Err(self.report(Error::NoSuchTable(tablename.to_owned())));
        };
        let removed = match self.graph.origin_delete_route(origin, net) {
            Ok(removed) => removed,
            Err(error) => return Err(self.report(error)),
        };
        if let Some(vifname) = &removed.vif {
            self.vif_usage_decr(vifname);
        }
        self.flush();
        Ok(())
    }

    fn is_self_address(&self, addr: A::Addr) -> bool {
        self.vifs
            .values()
            .any(|vif| vif.find_addr(addr).is_some())
    }

    // Burst boundary: drain notification queues and close redistribution
    // transactions.
    pub fn flush(&mut self) {
        self.graph.register_flush(self.register_table);
        for redist in self.redist_tables.values() {
            if let Some(table) = self.graph.node_mut(*redist).as_redist_mut() {
                table.flush();
            }
        }
        if let Some(table) = self
            .graph
            .node_mut(self.policy_redist_table)
            .as_policy_redist_mut()
        {
            table.flush();
        }
    }

    // ===== Lookups =====

    // Resolved next-hop for the destination, or the zero address on a miss.
    pub fn lookup_route(&self, addr: A::Addr) -> A::Addr {
        match self.graph.lookup_route(self.final_table, addr) {
            Some(route) if route.vif.is_some() => route
                .nexthop
                .addr()
                .unwrap_or_else(A::Addr::unspecified),
            _ => A::Addr::unspecified(),
        }
    }

    pub fn lookup_route_entry(&self, addr: A::Addr) -> Option<&RouteEntry<A>> {
        self.graph.lookup_route(self.final_table, addr)
    }

    pub fn route_range_lookup(&self, addr: A::Addr) -> RouteRange<A> {
        self.graph.lookup_route_range(self.final_table, addr)
    }

    // ===== Registrations =====

    pub fn route_register(
        &mut self,
        addr: A::Addr,
        module: &str,
    ) -> RouteRange<A> {
        self.graph
            .register_route_range(self.register_table, addr, module)
    }

    pub fn route_deregister(
        &mut self,
        valid_net: A::Network,
        module: &str,
    ) -> Result<(), Error> {
        self.graph
            .deregister_route_range(self.register_table, valid_net, module)
            .map_err(|error| self.report(error))
    }

    pub fn notify_completion(&mut self, module: &str, result: DispatchResult) {
        self.graph
            .register_completion(self.register_table, module, result);
    }

    // ===== Administrative distances =====

    pub fn set_protocol_admin_distance(
        &mut self,
        protocol: &str,
        admin_distance: u8,
    ) -> Result<(), Error> {
        if self.find_origin_table(protocol).is_some() {
            return Err(
                self.report(Error::AdminDistanceInUse(protocol.to_owned()))
            );
        }
        self.admin_distances
            .insert(protocol.to_owned(), admin_distance);
        Ok(())
    }

    pub fn get_protocol_admin_distance(&self, protocol: &str) -> u8 {
        match self.admin_distances.get(protocol) {
            Some(admin_distance) => *admin_distance,
            None => {
                warn!(%protocol, "administrative distance unknown");
                UNKNOWN_ADMIN_DISTANCE
            }
        }
    }

    pub fn protocol_admin_distances(&self) -> Vec<(String, u8)> {
        self.admin_distances
            .iter()
            .map(|(protocol, admin_distance)| {
                (protocol.clone(), *admin_distance)
            })
            .collect()
    }

    // ===== Redistribution =====

    pub fn redist_enable(
        &mut self,
        target: &str,
        from_protocol: &str,
        network: Option<A::Network>,
        cookie: &str,
        transactional: bool,
    ) -> Result<u32, Error> {
        let name = redist_tablename(from_protocol);
        let Some(redist) = self.redist_tables.get(&name).copied() else {
            return Err(self.report(Error::NoSuchRedistTable(name)));
        };

        let id = self.next_sub_id;
        self.next_sub_id += 1;
        let tx = self.channels.redist_tx.clone();
        if let Some(table) = self.graph.node_mut(redist).as_redist_mut() {
            table.subscribe(id, target, cookie, network, transactional, tx);
        }
        self.redist_subs.insert(id, redist);
        Ok(id)
    }

    pub fn redist_disable(
        &mut self,
        target: &str,
        from_protocol: &str,
        cookie: &str,
    ) -> Result<(), Error> {
        let name = redist_tablename(from_protocol);
        let Some(redist) = self.redist_tables.get(&name).copied() else {
            return Err(self.report(Error::NoSuchRedistTable(name)));
        };

        let removed = self
            .graph
            .node_mut(redist)
            .as_redist_mut()
            .and_then(|table| table.unsubscribe(target, cookie));
        match removed {
            Some(id) => {
                self.redist_subs.remove(&id);
                Ok(())
            }
            None => Err(self.report(Error::NoSuchRedistSubscription(
                target.to_owned(),
                cookie.to_owned(),
            ))),
        }
    }

    pub fn redist_completion(&mut self, id: u32, result: DispatchResult) {
        let Some(redist) = self.redist_subs.get(&id).copied() else {
            return;
        };
        if let Some(table) = self.graph.node_mut(redist).as_redist_mut() {
            table.completion(id, result);
        }
    }

    // ===== Policy =====

    pub fn insert_policy_redist_tags(
        &mut self,
        target: &str,
        tags: impl IntoIterator<Item = u32>,
    ) {
        if let Some(table) = self
            .graph
            .node_mut(self.policy_redist_table)
            .as_policy_redist_mut()
        {
            table.redist_map.insert_tags(target, tags);
        }
    }

    pub fn reset_policy_redist_tags(&mut self, target: &str) {
        if let Some(table) = self
            .graph
            .node_mut(self.policy_redist_table)
            .as_policy_redist_mut()
        {
            table.redist_map.reset_target(target);
        }
    }

    pub fn policy_redist_completion(
        &mut self,
        target: &str,
        result: DispatchResult,
    ) {
        if let Some(table) = self
            .graph
            .node_mut(self.policy_redist_table)
            .as_policy_redist_mut()
        {
            table.completion(target, result);
        }
    }

    // Re-runs the policy filter over the connected routes after a policy
    // reload.
    pub fn push_routes(&mut self) {
        self.graph
            .policy_connected_push_routes(self.policy_connected_table);
        self.flush();
    }

    // ===== Vif management =====

    pub fn find_vif(&self, vifname: &str) -> Option<&RibVif<A>> {
        self.vifs.get(vifname)
    }

    pub fn find_deleted_vif(&self, vifname: &str) -> Option<&RibVif<A>> {
        self.deleted_vifs.get(vifname)
    }

    pub fn new_vif(&mut self, spec: &VifSpec) -> Result<(), Error> {
        debug!(vif = %spec.name, "new vif");
        if self.vifs.contains_key(&spec.name) {
            return Err(
                self.report(Error::VifAlreadyExists(spec.name.clone()))
            );
        }

        // If the vif is pending deletion, reuse it so surviving route
        // references stay coherent.
        let vif = match self.deleted_vifs.remove(&spec.name) {
            Some(mut vif) => {
                vif.copy_in(spec);
                vif
            }
            None => RibVif::new(spec),
        };
        self.vifs.insert(spec.name.clone(), vif);
        Ok(())
    }

    pub fn delete_vif(&mut self, vifname: &str) -> Result<(), Error> {
        let Some(vif) = self.vifs.get(vifname) else {
            return Err(self.report(Error::NoSuchVif(vifname.to_owned())));
        };

        // Withdraw the connected routes first, so their references drain
        // from the usage counter of the still-registered vif.
        if vif.underlying_up {
            let snapshot = vif.clone();
            for va in &snapshot.addrs {
                self.delete_connected_route(&snapshot, va);
            }
        }

        // If the vif is still used by some routes, keep it around pending
        // deletion; otherwise drop it now.
        let Some(mut vif) = self.vifs.remove(vifname) else {
            return Err(self.report(Error::NoSuchVif(vifname.to_owned())));
        };
        if vif.usage > 0 {
            vif.deleted = true;
            self.deleted_vifs.insert(vifname.to_owned(), vif);
        }
        Ok(())
    }

    pub fn set_vif_flags(
        &mut self,
        vifname: &str,
        spec: &VifSpec,
    ) -> Result<(), Error> {
        let Some(vif) = self.vifs.get_mut(vifname) else {
            return Err(self.report(Error::NoSuchVif(vifname.to_owned())));
        };

        let old_up = vif.underlying_up;
        vif.p2p = spec.p2p;
        vif.loopback = spec.loopback;
        vif.multicast_capable = spec.multicast_capable;
        vif.broadcast_capable = spec.broadcast_capable;
        vif.underlying_up = spec.underlying_up;
        vif.mtu = spec.mtu;

        if old_up == spec.underlying_up {
            return Ok(());
        }

        let snapshot = vif.clone();
        for va in &snapshot.addrs {
            if spec.underlying_up {
                self.add_connected_route(&snapshot, va);
            } else {
                self.delete_connected_route(&snapshot, va);
            }
        }
        Ok(())
    }

    pub fn add_vif_address(
        &mut self,
        vifname: &str,
        addr: A::Addr,
        subnet: A::Network,
        broadcast_addr: Option<A::Addr>,
        peer_addr: Option<A::Addr>,
    ) -> Result<(), Error> {
        let Some(vif) = self.vifs.get_mut(vifname) else {
            return Err(self.report(Error::NoSuchVif(vifname.to_owned())));
        };

        let va = VifAddr {
            addr,
            subnet: subnet.apply_mask(),
            broadcast_addr,
            peer_addr,
        };
        vif.addrs.retain(|existing| existing.addr != addr);
        vif.addrs.push(va);

        if vif.underlying_up {
            let vif = vif.clone();
            self.add_connected_route(&vif, &va);
        }
        Ok(())
    }

    pub fn delete_vif_address(
        &mut self,
        vifname: &str,
        addr: A::Addr,
    ) -> Result<(), Error> {
        let Some(vif) = self.vifs.get_mut(vifname) else {
            return Err(self.report(Error::NoSuchVif(vifname.to_owned())));
        };
        let Some(pos) =
            vif.addrs.iter().position(|existing| existing.addr == addr)
        else {
            return Err(self.report(Error::NoSuchVifAddress(
                vifname.to_owned(),
                addr.into(),
            )));
        };

        let va = vif.addrs.remove(pos);
        if vif.underlying_up {
            let vif = vif.clone();
            self.delete_connected_route(&vif, &va);
        }
        Ok(())
    }

    // Synthesizes the connected route(s) for one vif address: the subnet
    // route, plus a host route for the point-to-point peer when it lies
    // outside the subnet.
    fn add_connected_route(&mut self, vif: &RibVif<A>, va: &VifAddr<A>) {
        let _ = self.add_route(
            "connected",
            va.subnet,
            va.addr,
            Some(&vif.name),
            0,
            PolicyTags::default(),
        );

        if vif.p2p
            && let Some(peer) = va.peer_addr
            && !va.subnet.contains(peer)
        {
            let _ = self.add_route(
                "connected",
                A::Network::host_prefix(peer),
                peer,
                Some(&vif.name),
                0,
                PolicyTags::default(),
            );
        }
    }

    fn delete_connected_route(&mut self, vif: &RibVif<A>, va: &VifAddr<A>) {
        let _ = self.delete_route("connected", va.subnet);

        if vif.p2p
            && let Some(peer) = va.peer_addr
            && !va.subnet.contains(peer)
        {
            let _ =
                self.delete_route("connected", A::Network::host_prefix(peer));
        }
    }

    fn vif_usage_incr(&mut self, vifname: &str) {
        if let Some(vif) = self.vifs.get_mut(vifname) {
            vif.usage += 1;
        } else if let Some(vif) = self.deleted_vifs.get_mut(vifname) {
            vif.usage += 1;
        }
    }

    fn vif_usage_decr(&mut self, vifname: &str) {
        if let Some(vif) = self.vifs.get_mut(vifname) {
            vif.usage = vif.usage.saturating_sub(1);
            return;
        }
        if let Some(vif) = self.deleted_vifs.get_mut(vifname) {
            vif.usage = vif.usage.saturating_sub(1);
            if vif.usage == 0 {
                debug!(vif = %vifname, "destroying deleted vif");
                self.deleted_vifs.remove(vifname);
            }
        }
    }

    // ===== Introspection =====

    pub fn registered_protocol_names(&self) -> Vec<String> {
        self.protocols.keys().cloned().collect()
    }

    pub fn protocol(&self, name: &str) -> Option<&Arc<Protocol>> {
        self.protocols.get(name)
    }

    pub fn nexthop_registry(&self) -> &NexthopRegistry<A> {
        &self.nexthops
    }
}

// ===== helper functions =====

fn redist_tablename(from_table: &str) -> String {
    format!("Redist:{from_table}")
}

fn instance_key(
    tablename: &str,
    target_class: &str,
    target_instance: &str,
) -> String {
    format!("{tablename} {target_class} {target_instance}")
}

// Default administrative distances; the static-route distance can be
// overridden through the environment.
fn default_admin_distances() -> BTreeMap<String, u8> {
    let mut static_distance = 1;
    if let Ok(value) = std::env::var(STATIC_DISTANCE_ENV)
        && let Ok(value) = value.parse::<u8>()
    {
        info!(distance = %value,
            "setting 'static' distance from {} environment variable",
            STATIC_DISTANCE_ENV);
        static_distance = value;
    }

    [
        ("connected", CONNECTED_ADMIN_DISTANCE),
        ("static", static_distance),
        ("eigrp-summary", 5),
        ("ebgp", 20),
        ("eigrp-internal", 90),
        ("igrp", 100),
        ("ospf", 110),
        ("is-is", 115),
        ("rip", 120),
        ("eigrp-external", 170),
        ("ibgp", 200),
        ("fib2mrib", 254),
        ("unknown", UNKNOWN_ADMIN_DISTANCE),
    ]
    .into_iter()
    .map(|(name, admin_distance)| (name.to_owned(), admin_distance))
    .collect()
}
