//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use arbor_ifmgr::tree::{IfIface, IfVif};
use ipnetwork::{Ipv4Network, Ipv6Network};
use tracing::warn;

use crate::Master;
use crate::vif::VifSpec;

// Applies the difference between the previously seen interface tree and
// the mirror's current one to every RIB of the process: vif removals and
// additions, flag updates, and per-family address changes.
pub(crate) fn updates_made(master: &mut Master) {
    let new_tree = master.mirror.iftree().clone();
    let old_tree = std::mem::replace(&mut master.iftree, new_tree.clone());

    // Remove vifs that do not exist anymore.
    for (ifname, old_iface) in old_tree.interfaces() {
        for vifname in old_iface.vifs.keys() {
            if new_tree.find_vif(ifname, vifname).is_none() {
                let _ = master.rib4_unicast.delete_vif(vifname);
                let _ = master.rib4_multicast.delete_vif(vifname);
                let _ = master.rib6_unicast.delete_vif(vifname);
                let _ = master.rib6_multicast.delete_vif(vifname);
            }
        }
    }

    // Add new vifs, update existing ones, and reconcile addresses.
    for (ifname, iface) in new_tree.interfaces() {
        for (vifname, vif) in &iface.vifs {
            let old_vif = old_tree.find_vif(ifname, vifname);
            let spec = vif_spec(ifname, iface, vif);

            match old_vif {
                Some(_) => {
                    let _ = master.rib4_unicast.set_vif_flags(vifname, &spec);
                    let _ =
                        master.rib4_multicast.set_vif_flags(vifname, &spec);
                    let _ = master.rib6_unicast.set_vif_flags(vifname, &spec);
                    let _ =
                        master.rib6_multicast.set_vif_flags(vifname, &spec);
                }
                None => {
                    let _ = master.rib4_unicast.new_vif(&spec);
                    let _ = master.rib4_multicast.new_vif(&spec);
                    let _ = master.rib6_unicast.new_vif(&spec);
                    let _ = master.rib6_multicast.new_vif(&spec);
                }
            }

            // Delete addresses that vanished.
            if let Some(old_vif) = old_vif {
                for addr in old_vif.ipv4addrs.keys() {
                    if !vif.ipv4addrs.contains_key(addr) {
                        let _ = master
                            .rib4_unicast
                            .delete_vif_address(vifname, *addr);
                        let _ = master
                            .rib4_multicast
                            .delete_vif_address(vifname, *addr);
                    }
                }
                for addr in old_vif.ipv6addrs.keys() {
                    if !vif.ipv6addrs.contains_key(addr) {
                        let _ = master
                            .rib6_unicast
                            .delete_vif_address(vifname, *addr);
                        let _ = master
                            .rib6_multicast
                            .delete_vif_address(vifname, *addr);
                    }
                }
            }

            // Add new addresses and replace changed ones.
            for (addr, a4) in &vif.ipv4addrs {
                let old_a4 =
                    old_vif.and_then(|old_vif| old_vif.ipv4addrs.get(addr));
                if old_a4 == Some(a4) {
                    continue;
                }
                if old_a4.is_some() {
                    // Delete the old address so it can be replaced.
                    let _ =
                        master.rib4_unicast.delete_vif_address(vifname, *addr);
                    let _ = master
                        .rib4_multicast
                        .delete_vif_address(vifname, *addr);
                }

                let Ok(prefix_len) = u8::try_from(a4.prefix_len) else {
                    warn!(%addr, prefix_len = %a4.prefix_len,
                        "invalid IPv4 prefix length");
                    continue;
                };
                let Ok(subnet) = Ipv4Network::new(*addr, prefix_len) else {
                    warn!(%addr, %prefix_len, "invalid IPv4 subnet");
                    continue;
                };
                let _ = master.rib4_unicast.add_vif_address(
                    vifname,
                    *addr,
                    subnet,
                    a4.broadcast_addr,
                    a4.endpoint_addr,
                );
                let _ = master.rib4_multicast.add_vif_address(
                    vifname,
                    *addr,
                    subnet,
                    a4.broadcast_addr,
                    a4.endpoint_addr,
                );
            }
            for (addr, a6) in &vif.ipv6addrs {
                let old_a6 =
                    old_vif.and_then(|old_vif| old_vif.ipv6addrs.get(addr));
                if old_a6 == Some(a6) {
                    continue;
                }
                if old_a6.is_some() {
                    let _ =
                        master.rib6_unicast.delete_vif_address(vifname, *addr);
                    let _ = master
                        .rib6_multicast
                        .delete_vif_address(vifname, *addr);
                }

                let Ok(prefix_len) = u8::try_from(a6.prefix_len) else {
                    warn!(%addr, prefix_len = %a6.prefix_len,
                        "invalid IPv6 prefix length");
                    continue;
                };
                let Ok(subnet) = Ipv6Network::new(*addr, prefix_len) else {
                    warn!(%addr, %prefix_len, "invalid IPv6 subnet");
                    continue;
                };
                let _ = master.rib6_unicast.add_vif_address(
                    vifname,
                    *addr,
                    subnet,
                    None,
                    a6.endpoint_addr,
                );
                let _ = master.rib6_multicast.add_vif_address(
                    vifname,
                    *addr,
                    subnet,
                    None,
                    a6.endpoint_addr,
                );
            }
        }
    }
}

// Builds the per-RIB vif attributes from the mirrored interface and vif
// state. A vif is usable only when both it and its interface are enabled
// and the link has carrier.
fn vif_spec(ifname: &str, iface: &IfIface, vif: &IfVif) -> VifSpec {
    VifSpec {
        name: vif.name.clone(),
        ifname: ifname.to_owned(),
        p2p: vif.p2p_capable,
        loopback: vif.loopback,
        multicast_capable: vif.multicast_capable,
        broadcast_capable: vif.broadcast_capable,
        underlying_up: iface.enabled && vif.enabled && !iface.no_carrier,
        mtu: iface.mtu,
    }
}
