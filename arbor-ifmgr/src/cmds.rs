//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use arbor_utils::mac_addr::MacAddr;
use serde::{Deserialize, Serialize};

use crate::tree::{IfAddrV4, IfAddrV6, IfIface, IfTree, IfVif};

// Typed mutation command for the replicated interface tree.
//
// Commands mutate the tree through `apply` and are forwarded verbatim to
// every attached mirror. `TreeComplete` and `UpdatesMade` are out-of-band
// hints carrying no tree mutation.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum IfCmd {
    IfAdd { ifname: String },
    IfRemove { ifname: String },
    IfSetEnabled { ifname: String, enabled: bool },
    IfSetMtu { ifname: String, mtu: u32 },
    IfSetMac { ifname: String, mac: MacAddr },
    IfSetPifIndex { ifname: String, pif_index: u32 },
    IfSetNoCarrier { ifname: String, no_carrier: bool },
    IfSetBaudrate { ifname: String, baudrate: u64 },
    VifAdd { ifname: String, vifname: String },
    VifRemove { ifname: String, vifname: String },
    VifSetEnabled { ifname: String, vifname: String, enabled: bool },
    VifSetMulticastCapable { ifname: String, vifname: String, capable: bool },
    VifSetBroadcastCapable { ifname: String, vifname: String, capable: bool },
    VifSetP2pCapable { ifname: String, vifname: String, capable: bool },
    VifSetLoopback { ifname: String, vifname: String, loopback: bool },
    VifSetPifIndex { ifname: String, vifname: String, pif_index: u32 },
    V4Add { ifname: String, vifname: String, addr: Ipv4Addr },
    V4Remove { ifname: String, vifname: String, addr: Ipv4Addr },
    V4SetPrefix { ifname: String, vifname: String, addr: Ipv4Addr, prefix_len: u32 },
    V4SetEnabled { ifname: String, vifname: String, addr: Ipv4Addr, enabled: bool },
    V4SetMulticastCapable { ifname: String, vifname: String, addr: Ipv4Addr, capable: bool },
    V4SetLoopback { ifname: String, vifname: String, addr: Ipv4Addr, loopback: bool },
    V4SetBroadcast { ifname: String, vifname: String, addr: Ipv4Addr, broadcast_addr: Option<Ipv4Addr> },
    V4SetEndpoint { ifname: String, vifname: String, addr: Ipv4Addr, endpoint_addr: Option<Ipv4Addr> },
    V6Add { ifname: String, vifname: String, addr: Ipv6Addr },
    V6Remove { ifname: String, vifname: String, addr: Ipv6Addr },
    V6SetPrefix { ifname: String, vifname: String, addr: Ipv6Addr, prefix_len: u32 },
    V6SetEnabled { ifname: String, vifname: String, addr: Ipv6Addr, enabled: bool },
    V6SetMulticastCapable { ifname: String, vifname: String, addr: Ipv6Addr, capable: bool },
    V6SetLoopback { ifname: String, vifname: String, addr: Ipv6Addr, loopback: bool },
    V6SetEndpoint { ifname: String, vifname: String, addr: Ipv6Addr, endpoint_addr: Option<Ipv6Addr> },
    TreeComplete,
    UpdatesMade,
}

// ===== impl IfCmd =====

impl IfCmd {
    // Applies the command to the tree.
    //
    // Adding an entity that already exists and removing one that is already
    // gone are not failures; setting an attribute of a missing entity is.
    pub fn apply(&self, tree: &mut IfTree) -> bool {
        match self {
            IfCmd::IfAdd { ifname } => {
                tree.interfaces_mut()
                    .entry(ifname.clone())
                    .or_insert_with(|| IfIface::new(ifname.clone()));
                true
            }
            IfCmd::IfRemove { ifname } => {
                tree.interfaces_mut().remove(ifname);
                true
            }
            IfCmd::IfSetEnabled { ifname, enabled } => {
                let Some(iface) = tree.find_iface_mut(ifname) else {
                    return false;
                };
                iface.enabled = *enabled;
                true
            }
            IfCmd::IfSetMtu { ifname, mtu } => {
                let Some(iface) = tree.find_iface_mut(ifname) else {
                    return false;
                };
                iface.mtu = *mtu;
                true
            }
            IfCmd::IfSetMac { ifname, mac } => {
                let Some(iface) = tree.find_iface_mut(ifname) else {
                    return false;
                };
                iface.mac = *mac;
                true
            }
            IfCmd::IfSetPifIndex { ifname, pif_index } => {
                let Some(iface) = tree.find_iface_mut(ifname) else {
                    return false;
                };
                iface.pif_index = *pif_index;
                true
            }
            IfCmd::IfSetNoCarrier { ifname, no_carrier } => {
                let Some(iface) = tree.find_iface_mut(ifname) else {
                    return false;
                };
                iface.no_carrier = *no_carrier;
                true
            }
            IfCmd::IfSetBaudrate { ifname, baudrate } => {
                let Some(iface) = tree.find_iface_mut(ifname) else {
                    return false;
                };
                iface.baudrate = *baudrate;
                true
            }
            IfCmd::VifAdd { ifname, vifname } => {
                let Some(iface) = tree.find_iface_mut(ifname) else {
                    return false;
                };
                iface
                    .vifs
                    .entry(vifname.clone())
                    .or_insert_with(|| IfVif::new(vifname.clone()));
                true
            }
            IfCmd::VifRemove { ifname, vifname } => {
                let Some(iface) = tree.find_iface_mut(ifname) else {
                    return false;
                };
                iface.vifs.remove(vifname);
                true
            }
            IfCmd::VifSetEnabled { ifname, vifname, enabled } => {
                let Some(vif) = tree.find_vif_mut(ifname, vifname) else {
                    return false;
                };
                vif.enabled = *enabled;
                true
            }
            IfCmd::VifSetMulticastCapable { ifname, vifname, capable } => {
                let Some(vif) = tree.find_vif_mut(ifname, vifname) else {
                    return false;
                };
                vif.multicast_capable = *capable;
                true
            }
            IfCmd::VifSetBroadcastCapable { ifname, vifname, capable } => {
                let Some(vif) = tree.find_vif_mut(ifname, vifname) else {
                    return false;
                };
                vif.broadcast_capable = *capable;
                true
            }
            IfCmd::VifSetP2pCapable { ifname, vifname, capable } => {
                let Some(vif) = tree.find_vif_mut(ifname, vifname) else {
                    return false;
                };
                vif.p2p_capable = *capable;
                true
            }
            IfCmd::VifSetLoopback { ifname, vifname, loopback } => {
                let Some(vif) = tree.find_vif_mut(ifname, vifname) else {
                    return false;
                };
                vif.loopback = *loopback;
                true
            }
            IfCmd::VifSetPifIndex { ifname, vifname, pif_index } => {
                let Some(vif) = tree.find_vif_mut(ifname, vifname) else {
                    return false;
                };
                vif.pif_index = *pif_index;
                true
            }
            IfCmd::V4Add { ifname, vifname, addr } => {
                let Some(vif) = tree.find_vif_mut(ifname, vifname) else {
                    return false;
                };
                vif.ipv4addrs
                    .entry(*addr)
                    .or_insert_with(|| IfAddrV4::new(*addr));
                true
            }
            IfCmd::V4Remove { ifname, vifname, addr } => {
                let Some(vif) = tree.find_vif_mut(ifname, vifname) else {
                    return false;
                };
                vif.ipv4addrs.remove(addr);
                true
            }
            IfCmd::V4SetPrefix { ifname, vifname, addr, prefix_len } => {
                let Some(a) = tree.find_addr4_mut(ifname, vifname, addr)
                else {
                    return false;
                };
                a.prefix_len = *prefix_len;
                true
            }
            IfCmd::V4SetEnabled { ifname, vifname, addr, enabled } => {
                let Some(a) = tree.find_addr4_mut(ifname, vifname, addr)
                else {
                    return false;
                };
                a.enabled = *enabled;
                true
            }
            IfCmd::V4SetMulticastCapable { ifname, vifname, addr, capable } => {
                let Some(a) = tree.find_addr4_mut(ifname, vifname, addr)
                else {
                    return false;
                };
                a.multicast_capable = *capable;
                true
            }
            IfCmd::V4SetLoopback { ifname, vifname, addr, loopback } => {
                let Some(a) = tree.find_addr4_mut(ifname, vifname, addr)
                else {
                    return false;
                };
                a.loopback = *loopback;
                true
            }
            IfCmd::V4SetBroadcast { ifname, vifname, addr, broadcast_addr } => {
                let Some(a) = tree.find_addr4_mut(ifname, vifname, addr)
                else {
                    return false;
                };
                a.broadcast_addr = *broadcast_addr;
                true
            }
            IfCmd::V4SetEndpoint { ifname, vifname, addr, endpoint_addr } => {
                let Some(a) = tree.find_addr4_mut(ifname, vifname, addr)
                else {
                    return false;
                };
                a.endpoint_addr = *endpoint_addr;
                true
            }
            IfCmd::V6Add { ifname, vifname, addr } => {
                let Some(vif) = tree.find_vif_mut(ifname, vifname) else {
                    return false;
                };
                vif.ipv6addrs
                    .entry(*addr)
                    .or_insert_with(|| IfAddrV6::new(*addr));
                true
            }
            IfCmd::V6Remove { ifname, vifname, addr } => {
                let Some(vif) = tree.find_vif_mut(ifname, vifname) else {
                    return false;
                };
                vif.ipv6addrs.remove(addr);
                true
            }
            IfCmd::V6SetPrefix { ifname, vifname, addr, prefix_len } => {
                let Some(a) = tree.find_addr6_mut(ifname, vifname, addr)
                else {
                    return false;
                };
                a.prefix_len = *prefix_len;
                true
            }
            IfCmd::V6SetEnabled { ifname, vifname, addr, enabled } => {
                let Some(a) = tree.find_addr6_mut(ifname, vifname, addr)
                else {
                    return false;
                };
                a.enabled = *enabled;
                true
            }
            IfCmd::V6SetMulticastCapable { ifname, vifname, addr, capable } => {
                let Some(a) = tree.find_addr6_mut(ifname, vifname, addr)
                else {
                    return false;
                };
                a.multicast_capable = *capable;
                true
            }
            IfCmd::V6SetLoopback { ifname, vifname, addr, loopback } => {
                let Some(a) = tree.find_addr6_mut(ifname, vifname, addr)
                else {
                    return false;
                };
                a.loopback = *loopback;
                true
            }
            IfCmd::V6SetEndpoint { ifname, vifname, addr, endpoint_addr } => {
                let Some(a) = tree.find_addr6_mut(ifname, vifname, addr)
                else {
                    return false;
                };
                a.endpoint_addr = *endpoint_addr;
                true
            }
            // Hints carry no tree mutation.
            IfCmd::TreeComplete | IfCmd::UpdatesMade => true,
        }
    }

    // Returns true for the out-of-band hint commands.
    pub fn is_hint(&self) -> bool {
        matches!(self, IfCmd::TreeComplete | IfCmd::UpdatesMade)
    }
}

// ===== global functions =====

// Serializes the full tree into the canonical command sequence: interface,
// interface attributes, vifs, vif attributes, IPv4 addresses, then IPv6
// addresses, terminated by `TreeComplete`. Replaying the sequence into an
// empty tree reproduces the original.
pub fn tree_to_commands(tree: &IfTree) -> Vec<IfCmd> {
    let mut cmds = Vec::new();

    for iface in tree.interfaces().values() {
        iface_to_commands(iface, &mut cmds);
    }
    cmds.push(IfCmd::TreeComplete);
    cmds
}

fn iface_to_commands(iface: &IfIface, cmds: &mut Vec<IfCmd>) {
    let ifname = &iface.name;

    cmds.push(IfCmd::IfAdd { ifname: ifname.clone() });
    cmds.push(IfCmd::IfSetEnabled {
        ifname: ifname.clone(),
        enabled: iface.enabled,
    });
    cmds.push(IfCmd::IfSetMtu { ifname: ifname.clone(), mtu: iface.mtu });
    cmds.push(IfCmd::IfSetMac { ifname: ifname.clone(), mac: iface.mac });
    cmds.push(IfCmd::IfSetPifIndex {
        ifname: ifname.clone(),
        pif_index: iface.pif_index,
    });
    cmds.push(IfCmd::IfSetNoCarrier {
        ifname: ifname.clone(),
        no_carrier: iface.no_carrier,
    });
    cmds.push(IfCmd::IfSetBaudrate {
        ifname: ifname.clone(),
        baudrate: iface.baudrate,
    });

    for vif in iface.vifs.values() {
        vif_to_commands(ifname, vif, cmds);
    }
}

fn vif_to_commands(ifname: &str, vif: &IfVif, cmds: &mut Vec<IfCmd>) {
    let ifname = ifname.to_owned();
    let vifname = &vif.name;

    cmds.push(IfCmd::VifAdd {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
    });
    cmds.push(IfCmd::VifSetEnabled {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        enabled: vif.enabled,
    });
    cmds.push(IfCmd::VifSetMulticastCapable {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        capable: vif.multicast_capable,
    });
    cmds.push(IfCmd::VifSetBroadcastCapable {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        capable: vif.broadcast_capable,
    });
    cmds.push(IfCmd::VifSetP2pCapable {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        capable: vif.p2p_capable,
    });
    cmds.push(IfCmd::VifSetLoopback {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        loopback: vif.loopback,
    });
    cmds.push(IfCmd::VifSetPifIndex {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        pif_index: vif.pif_index,
    });

    for addr in vif.ipv4addrs.values() {
        addr4_to_commands(&ifname, vifname, addr, cmds);
    }
    for addr in vif.ipv6addrs.values() {
        addr6_to_commands(&ifname, vifname, addr, cmds);
    }
}

fn addr4_to_commands(
    ifname: &str,
    vifname: &str,
    addr: &IfAddrV4,
    cmds: &mut Vec<IfCmd>,
) {
    let ifname = ifname.to_owned();
    let vifname = vifname.to_owned();

    cmds.push(IfCmd::V4Add {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        addr: addr.addr,
    });
    cmds.push(IfCmd::V4SetPrefix {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        addr: addr.addr,
        prefix_len: addr.prefix_len,
    });
    cmds.push(IfCmd::V4SetEnabled {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        addr: addr.addr,
        enabled: addr.enabled,
    });
    cmds.push(IfCmd::V4SetMulticastCapable {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        addr: addr.addr,
        capable: addr.multicast_capable,
    });
    cmds.push(IfCmd::V4SetLoopback {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        addr: addr.addr,
        loopback: addr.loopback,
    });
    cmds.push(IfCmd::V4SetBroadcast {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        addr: addr.addr,
        broadcast_addr: addr.broadcast_addr,
    });
    cmds.push(IfCmd::V4SetEndpoint {
        ifname,
        vifname,
        addr: addr.addr,
        endpoint_addr: addr.endpoint_addr,
    });
}

fn addr6_to_commands(
    ifname: &str,
    vifname: &str,
    addr: &IfAddrV6,
    cmds: &mut Vec<IfCmd>,
) {
    let ifname = ifname.to_owned();
    let vifname = vifname.to_owned();

    cmds.push(IfCmd::V6Add {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        addr: addr.addr,
    });
    cmds.push(IfCmd::V6SetPrefix {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        addr: addr.addr,
        prefix_len: addr.prefix_len,
    });
    cmds.push(IfCmd::V6SetEnabled {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        addr: addr.addr,
        enabled: addr.enabled,
    });
    cmds.push(IfCmd::V6SetMulticastCapable {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        addr: addr.addr,
        capable: addr.multicast_capable,
    });
    cmds.push(IfCmd::V6SetLoopback {
        ifname: ifname.clone(),
        vifname: vifname.clone(),
        addr: addr.addr,
        loopback: addr.loopback,
    });
    cmds.push(IfCmd::V6SetEndpoint {
        ifname,
        vifname,
        addr: addr.addr,
        endpoint_addr: addr.endpoint_addr,
    });
}
