//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use arbor_utils::mac_addr::MacAddr;
use serde::{Deserialize, Serialize};

// Replicated interface configuration state: interfaces contain vifs, vifs
// contain addresses. All maps are keyed by name or address; equality is
// structural.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IfTree {
    interfaces: BTreeMap<String, IfIface>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IfIface {
    pub name: String,
    pub enabled: bool,
    pub mtu: u32,
    pub mac: MacAddr,
    pub pif_index: u32,
    pub no_carrier: bool,
    pub baudrate: u64,
    pub vifs: BTreeMap<String, IfVif>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IfVif {
    pub name: String,
    pub enabled: bool,
    pub multicast_capable: bool,
    pub broadcast_capable: bool,
    pub p2p_capable: bool,
    pub loopback: bool,
    pub pif_index: u32,
    pub ipv4addrs: BTreeMap<Ipv4Addr, IfAddrV4>,
    pub ipv6addrs: BTreeMap<Ipv6Addr, IfAddrV6>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IfAddrV4 {
    pub addr: Ipv4Addr,
    pub prefix_len: u32,
    pub enabled: bool,
    pub multicast_capable: bool,
    pub loopback: bool,
    pub broadcast_addr: Option<Ipv4Addr>,
    pub endpoint_addr: Option<Ipv4Addr>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IfAddrV6 {
    pub addr: Ipv6Addr,
    pub prefix_len: u32,
    pub enabled: bool,
    pub multicast_capable: bool,
    pub loopback: bool,
    pub endpoint_addr: Option<Ipv6Addr>,
}

// ===== impl IfTree =====

impl IfTree {
    pub fn interfaces(&self) -> &BTreeMap<String, IfIface> {
        &self.interfaces
    }

    pub fn interfaces_mut(&mut self) -> &mut BTreeMap<String, IfIface> {
        &mut self.interfaces
    }

    pub fn find_iface(&self, ifname: &str) -> Option<&IfIface> {
        self.interfaces.get(ifname)
    }

    pub fn find_iface_mut(&mut self, ifname: &str) -> Option<&mut IfIface> {
        self.interfaces.get_mut(ifname)
    }

    pub fn find_vif(&self, ifname: &str, vifname: &str) -> Option<&IfVif> {
        self.find_iface(ifname)
            .and_then(|iface| iface.vifs.get(vifname))
    }

    pub fn find_vif_mut(
        &mut self,
        ifname: &str,
        vifname: &str,
    ) -> Option<&mut IfVif> {
        self.find_iface_mut(ifname)
            .and_then(|iface| iface.vifs.get_mut(vifname))
    }

    pub fn find_addr4(
        &self,
        ifname: &str,
        vifname: &str,
        addr: &Ipv4Addr,
    ) -> Option<&IfAddrV4> {
        self.find_vif(ifname, vifname)
            .and_then(|vif| vif.ipv4addrs.get(addr))
    }

    pub fn find_addr4_mut(
        &mut self,
        ifname: &str,
        vifname: &str,
        addr: &Ipv4Addr,
    ) -> Option<&mut IfAddrV4> {
        self.find_vif_mut(ifname, vifname)
            .and_then(|vif| vif.ipv4addrs.get_mut(addr))
    }

    pub fn find_addr6(
        &self,
        ifname: &str,
        vifname: &str,
        addr: &Ipv6Addr,
    ) -> Option<&IfAddrV6> {
        self.find_vif(ifname, vifname)
            .and_then(|vif| vif.ipv6addrs.get(addr))
    }

    pub fn find_addr6_mut(
        &mut self,
        ifname: &str,
        vifname: &str,
        addr: &Ipv6Addr,
    ) -> Option<&mut IfAddrV6> {
        self.find_vif_mut(ifname, vifname)
            .and_then(|vif| vif.ipv6addrs.get_mut(addr))
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn clear(&mut self) {
        self.interfaces.clear();
    }
}

// ===== impl IfIface =====

impl IfIface {
    pub fn new(name: String) -> Self {
        IfIface {
            name,
            enabled: false,
            mtu: 0,
            mac: MacAddr::default(),
            pif_index: 0,
            no_carrier: false,
            baudrate: 0,
            vifs: Default::default(),
        }
    }
}

// ===== impl IfVif =====

impl IfVif {
    pub fn new(name: String) -> Self {
        IfVif {
            name,
            enabled: false,
            multicast_capable: false,
            broadcast_capable: false,
            p2p_capable: false,
            loopback: false,
            pif_index: 0,
            ipv4addrs: Default::default(),
            ipv6addrs: Default::default(),
        }
    }
}

// ===== impl IfAddrV4 =====

impl IfAddrV4 {
    pub fn new(addr: Ipv4Addr) -> Self {
        IfAddrV4 {
            addr,
            prefix_len: 0,
            enabled: false,
            multicast_capable: false,
            loopback: false,
            broadcast_addr: None,
            endpoint_addr: None,
        }
    }
}

// ===== impl IfAddrV6 =====

impl IfAddrV6 {
    pub fn new(addr: Ipv6Addr) -> Self {
        IfAddrV6 {
            addr,
            prefix_len: 0,
            enabled: false,
            multicast_capable: false,
            loopback: false,
            endpoint_addr: None,
        }
    }
}
