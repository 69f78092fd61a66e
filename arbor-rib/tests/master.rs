//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use arbor_rib::rib::RibChannels;
use arbor_rib::table::policy_connected::NullPolicyFilter;
use arbor_rib::vif::VifSpec;
use arbor_rib::{RibRequest, start};
use arbor_utils::policy::PolicyTags;
use ipnetwork::Ipv4Network;
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::oneshot;

fn net(s: &str) -> Ipv4Network {
    s.parse().unwrap()
}

fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

// Drives the control surface through the spawned event loop.
#[tokio::test]
async fn test_master_event_loop() {
    let (notify4_tx, _notify4_rx) = unbounded_channel();
    let (redist4_tx, _redist4_rx) = unbounded_channel();
    let (policy4_tx, _policy4_rx) = unbounded_channel();
    let (notify6_tx, _notify6_rx) = unbounded_channel();
    let (redist6_tx, _redist6_rx) = unbounded_channel();
    let (policy6_tx, _policy6_rx) = unbounded_channel();

    let (request_tx, _mirror_tx) = start(
        RibChannels::new(notify4_tx, redist4_tx, policy4_tx),
        RibChannels::new(notify6_tx, redist6_tx, policy6_tx),
        Arc::new(NullPolicyFilter),
        Arc::new(NullPolicyFilter),
    );

    request_tx
        .send(RibRequest::AddIgpTable {
            protocol: "ospf".to_owned(),
            target_class: "ospfd".to_owned(),
            target_instance: "i1".to_owned(),
            unicast: true,
            multicast: false,
        })
        .unwrap();
    request_tx
        .send(RibRequest::NewVif {
            spec: VifSpec {
                name: "vif0".to_owned(),
                ifname: "eth0".to_owned(),
                underlying_up: true,
                ..Default::default()
            },
        })
        .unwrap();
    request_tx
        .send(RibRequest::AddVifAddr4 {
            vifname: "vif0".to_owned(),
            addr: addr("10.0.0.1"),
            subnet: net("10.0.0.0/24"),
        })
        .unwrap();
    request_tx
        .send(RibRequest::AddRoute4 {
            protocol: "ospf".to_owned(),
            net: net("10.1.0.0/16"),
            nexthop: addr("10.0.0.2"),
            vifname: None,
            metric: 5,
            policy_tags: PolicyTags::default(),
            unicast: true,
            multicast: false,
        })
        .unwrap();

    let (reply_tx, reply_rx) = oneshot::channel();
    request_tx
        .send(RibRequest::LookupRouteByDest4 {
            addr: addr("10.1.2.3"),
            reply: reply_tx,
        })
        .unwrap();
    assert_eq!(reply_rx.await.unwrap(), addr("10.0.0.2"));

    let (reply_tx, reply_rx) = oneshot::channel();
    request_tx
        .send(RibRequest::GetProtocolAdminDistance {
            protocol: "ospf".to_owned(),
            ipv4: true,
            multicast: false,
            reply: reply_tx,
        })
        .unwrap();
    assert_eq!(reply_rx.await.unwrap(), 110);

    // Withdraw and observe the miss.
    request_tx
        .send(RibRequest::DeleteRoute4 {
            protocol: "ospf".to_owned(),
            net: net("10.1.0.0/16"),
            unicast: true,
            multicast: false,
        })
        .unwrap();
    let (reply_tx, reply_rx) = oneshot::channel();
    request_tx
        .send(RibRequest::LookupRouteByDest4 {
            addr: addr("10.1.2.3"),
            reply: reply_tx,
        })
        .unwrap();
    assert_eq!(reply_rx.await.unwrap(), addr("0.0.0.0"));
}
