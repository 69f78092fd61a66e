//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use arbor_utils::ip::Ip;

// Address-family-independent vif attributes, as delivered by the interface
// mirror.
#[derive(Clone, Debug, Default)]
pub struct VifSpec {
    pub name: String,
    pub ifname: String,
    pub p2p: bool,
    pub loopback: bool,
    pub multicast_capable: bool,
    pub broadcast_capable: bool,
    pub underlying_up: bool,
    pub mtu: u32,
}

// An address configured on a vif.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VifAddr<A: Ip> {
    pub addr: A::Addr,
    pub subnet: A::Network,
    pub broadcast_addr: Option<A::Addr>,
    pub peer_addr: Option<A::Addr>,
}

// Virtual interface as seen by one RIB.
//
// A vif is logically deleted when `deleted` is set; its storage lives on in
// the deleted-vifs holding map until no route references it anymore, so
// routes may keep a reference across a brief delete/add cycle.
#[derive(Clone, Debug)]
pub struct RibVif<A: Ip> {
    pub name: String,
    pub ifname: String,
    pub p2p: bool,
    pub loopback: bool,
    pub multicast_capable: bool,
    pub broadcast_capable: bool,
    pub underlying_up: bool,
    pub mtu: u32,
    pub addrs: Vec<VifAddr<A>>,
    pub(crate) usage: u32,
    pub(crate) deleted: bool,
}

// ===== impl RibVif =====

impl<A: Ip> RibVif<A> {
    pub(crate) fn new(spec: &VifSpec) -> Self {
        RibVif {
            name: spec.name.clone(),
            ifname: spec.ifname.clone(),
            p2p: spec.p2p,
            loopback: spec.loopback,
            multicast_capable: spec.multicast_capable,
            broadcast_capable: spec.broadcast_capable,
            underlying_up: spec.underlying_up,
            mtu: spec.mtu,
            addrs: Vec::new(),
            usage: 0,
            deleted: false,
        }
    }

    // Replaces the attributes of a resurrected vif, keeping the usage
    // counter. The address list starts over and is refilled by the caller.
    pub(crate) fn copy_in(&mut self, spec: &VifSpec) {
        self.ifname.clone_from(&spec.ifname);
        self.p2p = spec.p2p;
        self.loopback = spec.loopback;
        self.multicast_capable = spec.multicast_capable;
        self.broadcast_capable = spec.broadcast_capable;
        self.underlying_up = spec.underlying_up;
        self.mtu = spec.mtu;
        self.addrs.clear();
        self.deleted = false;
    }

    pub fn usage(&self) -> u32 {
        self.usage
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub(crate) fn find_addr(&self, addr: A::Addr) -> Option<&VifAddr<A>> {
        self.addrs.iter().find(|va| va.addr == addr)
    }
}
