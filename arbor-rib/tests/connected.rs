//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use arbor_ifmgr::cmds::IfCmd;
use arbor_ifmgr::replicate::ReplicationManager;
use arbor_rib::Master;
use arbor_rib::rib::RibChannels;
use arbor_rib::table::policy_connected::NullPolicyFilter;
use ipnetwork::Ipv4Network;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

fn net(s: &str) -> Ipv4Network {
    s.parse().unwrap()
}

fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn master() -> Master {
    let (notify4_tx, _notify4_rx) = unbounded_channel();
    let (redist4_tx, _redist4_rx) = unbounded_channel();
    let (policy4_tx, _policy4_rx) = unbounded_channel();
    let (notify6_tx, _notify6_rx) = unbounded_channel();
    let (redist6_tx, _redist6_rx) = unbounded_channel();
    let (policy6_tx, _policy6_rx) = unbounded_channel();

    Master::new(
        RibChannels::new(notify4_tx, redist4_tx, policy4_tx),
        RibChannels::new(notify6_tx, redist6_tx, policy6_tx),
        Arc::new(NullPolicyFilter),
        Arc::new(NullPolicyFilter),
    )
}

// Delivers every replicated command to the RIB process and acknowledges
// it to the producer.
fn pump(
    manager: &mut ReplicationManager,
    rx: &mut UnboundedReceiver<IfCmd>,
    master: &mut Master,
) {
    while let Ok(cmd) = rx.try_recv() {
        master.process_mirror_cmd(cmd);
        manager.completion("rib", Ok(()));
    }
}

// Interface state flows from the authoritative producer through the
// mirror into every RIB as connected routes.
#[test]
fn test_connected_route_injection() {
    let mut master = master();
    assert!(master.mirror.transport_ready());

    let mut manager = ReplicationManager::default();
    let (tx, mut rx) = unbounded_channel();
    assert!(manager.add_mirror("rib", tx));
    pump(&mut manager, &mut rx, &mut master);
    assert!(master.mirror.is_running());

    for cmd in [
        IfCmd::IfAdd {
            ifname: "eth0".to_owned(),
        },
        IfCmd::VifAdd {
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
        },
        IfCmd::V4Add {
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
            addr: addr("10.0.0.1"),
        },
        IfCmd::V4SetPrefix {
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
            addr: addr("10.0.0.1"),
            prefix_len: 24,
        },
        IfCmd::IfSetEnabled {
            ifname: "eth0".to_owned(),
            enabled: true,
        },
        IfCmd::VifSetEnabled {
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
            enabled: true,
        },
    ] {
        manager.push(cmd);
    }
    manager.updates_made();
    pump(&mut manager, &mut rx, &mut master);

    // The mirror replica matches the producer tree.
    assert_eq!(master.mirror.iftree(), manager.iftree());

    // Every RIB of the matching family carries the connected route.
    for rib in [&master.rib4_unicast, &master.rib4_multicast] {
        let route = rib
            .lookup_route_entry(addr("10.0.0.5"))
            .expect("connected route missing");
        assert_eq!(route.net, net("10.0.0.0/24"));
        assert_eq!(route.distance, 0);
        assert_eq!(route.metric, 0);
        assert_eq!(route.vif.as_deref(), Some("vif0"));
        assert_eq!(route.protocol.name, "connected");
    }

    // Taking the interface down withdraws the route.
    manager.push(IfCmd::IfSetEnabled {
        ifname: "eth0".to_owned(),
        enabled: false,
    });
    manager.updates_made();
    pump(&mut manager, &mut rx, &mut master);
    assert!(
        master
            .rib4_unicast
            .lookup_route_entry(addr("10.0.0.5"))
            .is_none()
    );

    // Bringing it back re-injects it.
    manager.push(IfCmd::IfSetEnabled {
        ifname: "eth0".to_owned(),
        enabled: true,
    });
    manager.updates_made();
    pump(&mut manager, &mut rx, &mut master);
    assert!(
        master
            .rib4_unicast
            .lookup_route_entry(addr("10.0.0.5"))
            .is_some()
    );
}

// Losing the transport to the producer clears the mirror and withdraws
// every mirrored vif.
#[test]
fn test_mirror_disconnect_withdraws_vifs() {
    let mut master = master();
    assert!(master.mirror.transport_ready());

    let mut manager = ReplicationManager::default();
    let (tx, mut rx) = unbounded_channel();
    assert!(manager.add_mirror("rib", tx));

    for cmd in [
        IfCmd::IfAdd {
            ifname: "eth0".to_owned(),
        },
        IfCmd::IfSetEnabled {
            ifname: "eth0".to_owned(),
            enabled: true,
        },
        IfCmd::VifAdd {
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
        },
        IfCmd::VifSetEnabled {
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
            enabled: true,
        },
        IfCmd::V4Add {
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
            addr: addr("10.0.0.1"),
        },
        IfCmd::V4SetPrefix {
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
            addr: addr("10.0.0.1"),
            prefix_len: 24,
        },
    ] {
        manager.push(cmd);
    }
    manager.updates_made();
    pump(&mut manager, &mut rx, &mut master);
    assert!(master.rib4_unicast.find_vif("vif0").is_some());

    master.mirror_disconnected();
    assert!(!master.mirror.is_running());
    assert!(master.rib4_unicast.find_vif("vif0").is_none());
    assert!(
        master
            .rib4_unicast
            .lookup_route_entry(addr("10.0.0.5"))
            .is_none()
    );
}
