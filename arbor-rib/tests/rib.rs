//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use arbor_rib::error::{Error, ErrorCode};
use arbor_rib::register_server::{NotifyEvent, NotifyRequest};
use arbor_rib::rib::{Rib, RibChannels};
use arbor_rib::route::{Nexthop, RouteEntry};
use arbor_rib::table::policy_connected::{NullPolicyFilter, PolicyFilter};
use arbor_rib::table::policy_redist::PolicyRedistRequest;
use arbor_rib::table::redist::{RedistEvent, RedistRequest};
use arbor_rib::vif::VifSpec;
use arbor_utils::ip::Ipv4;
use arbor_utils::policy::PolicyTags;
use ipnetwork::Ipv4Network;
use maplit::btreeset;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

struct Harness {
    rib: Rib<Ipv4>,
    notify_rx: UnboundedReceiver<NotifyRequest<Ipv4>>,
    redist_rx: UnboundedReceiver<RedistRequest<Ipv4>>,
    policy_redist_rx: UnboundedReceiver<PolicyRedistRequest<Ipv4>>,
}

fn harness_with_filter(filter: Arc<dyn PolicyFilter<Ipv4>>) -> Harness {
    let (notify_tx, notify_rx) = unbounded_channel();
    let (redist_tx, redist_rx) = unbounded_channel();
    let (policy_redist_tx, policy_redist_rx) = unbounded_channel();
    let rib = Rib::new(
        false,
        RibChannels::new(notify_tx, redist_tx, policy_redist_tx),
        filter,
    );
    Harness {
        rib,
        notify_rx,
        redist_rx,
        policy_redist_rx,
    }
}

fn harness() -> Harness {
    harness_with_filter(Arc::new(NullPolicyFilter))
}

fn net(s: &str) -> Ipv4Network {
    s.parse().unwrap()
}

fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

// Brings up vif0 on eth0 with address 10.0.0.1/24, injecting the matching
// connected route.
fn ethernet_vif(rib: &mut Rib<Ipv4>) {
    let spec = VifSpec {
        name: "vif0".to_owned(),
        ifname: "eth0".to_owned(),
        multicast_capable: true,
        broadcast_capable: true,
        underlying_up: true,
        mtu: 1500,
        ..Default::default()
    };
    rib.new_vif(&spec).unwrap();
    rib.add_vif_address(
        "vif0",
        addr("10.0.0.1"),
        net("10.0.0.0/24"),
        None,
        None,
    )
    .unwrap();
}

fn add_route(
    rib: &mut Rib<Ipv4>,
    protocol: &str,
    dest: &str,
    nexthop: &str,
    metric: u32,
) {
    rib.add_route(
        protocol,
        net(dest),
        addr(nexthop),
        None,
        metric,
        PolicyTags::default(),
    )
    .unwrap();
}

fn drain_notify(harness: &mut Harness) -> Vec<NotifyEvent<Ipv4>> {
    let mut events = Vec::new();
    while let Ok(request) = harness.notify_rx.try_recv() {
        events.push(request.event.clone());
        harness.rib.notify_completion(&request.module, Ok(()));
    }
    events
}

fn drain_redist(harness: &mut Harness) -> Vec<RedistEvent<Ipv4>> {
    let mut events = Vec::new();
    while let Ok(request) = harness.redist_rx.try_recv() {
        events.push(request.event.clone());
        harness.rib.redist_completion(request.subscription, Ok(()));
    }
    events
}

fn drain_policy_redist(
    harness: &mut Harness,
) -> Vec<PolicyRedistRequest<Ipv4>> {
    let mut requests = Vec::new();
    while let Ok(request) = harness.policy_redist_rx.try_recv() {
        harness
            .rib
            .policy_redist_completion(&request.target, Ok(()));
        requests.push(request);
    }
    requests
}

// Connected route injection through the vif layer.
#[test]
fn test_connected_route() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);

    let route = harness
        .rib
        .lookup_route_entry(addr("10.0.0.5"))
        .expect("connected route missing");
    assert_eq!(route.net, net("10.0.0.0/24"));
    assert_eq!(route.distance, 0);
    assert_eq!(route.metric, 0);
    assert_eq!(route.vif.as_deref(), Some("vif0"));
    assert_eq!(route.protocol.name, "connected");
    assert_eq!(route.nexthop, Nexthop::Peer { addr: addr("10.0.0.1") });
}

// A point-to-point vif also gets a host route for its peer.
#[test]
fn test_p2p_peer_route() {
    let mut harness = harness();
    let spec = VifSpec {
        name: "ppp0".to_owned(),
        ifname: "ppp0".to_owned(),
        p2p: true,
        underlying_up: true,
        ..Default::default()
    };
    harness.rib.new_vif(&spec).unwrap();
    harness
        .rib
        .add_vif_address(
            "ppp0",
            addr("192.0.2.1"),
            net("192.0.2.0/30"),
            None,
            Some(addr("198.51.100.9")),
        )
        .unwrap();

    let route = harness
        .rib
        .lookup_route_entry(addr("198.51.100.9"))
        .expect("peer host route missing");
    assert_eq!(route.net, net("198.51.100.9/32"));
    assert_eq!(route.vif.as_deref(), Some("ppp0"));
}

// Merged IGP arbitration: OSPF (administrative distance 110) beats RIP
// (120) regardless of metric.
#[test]
fn test_merged_igp_preference() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();
    harness.rib.add_igp_table("rip", "", "").unwrap();

    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);
    add_route(&mut harness.rib, "rip", "10.1.0.0/16", "10.0.0.3", 1);
    assert_eq!(harness.rib.lookup_route(addr("10.1.2.3")), addr("10.0.0.2"));

    // Withdrawing the better route surfaces the backup.
    harness.rib.delete_route("ospf", net("10.1.0.0/16")).unwrap();
    assert_eq!(harness.rib.lookup_route(addr("10.1.2.3")), addr("10.0.0.3"));

    harness.rib.delete_route("rip", net("10.1.0.0/16")).unwrap();
    assert_eq!(harness.rib.lookup_route(addr("10.1.2.3")), addr("0.0.0.0"));
}

// Winner selection across several origins follows (distance, metric)
// ordering.
#[test]
fn test_winner_ordering() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();
    harness.rib.add_igp_table("rip", "", "").unwrap();
    harness.rib.add_igp_table("static", "", "").unwrap();

    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);
    add_route(&mut harness.rib, "rip", "10.1.0.0/16", "10.0.0.3", 1);
    add_route(&mut harness.rib, "static", "10.1.0.0/16", "10.0.0.4", 10);

    // static (1) < ospf (110) < rip (120).
    assert_eq!(harness.rib.lookup_route(addr("10.1.9.9")), addr("10.0.0.4"));
    harness.rib.delete_route("static", net("10.1.0.0/16")).unwrap();
    assert_eq!(harness.rib.lookup_route(addr("10.1.9.9")), addr("10.0.0.2"));
    harness.rib.delete_route("ospf", net("10.1.0.0/16")).unwrap();
    assert_eq!(harness.rib.lookup_route(addr("10.1.9.9")), addr("10.0.0.3"));
}

// A more specific route always wins over a preferred but less specific
// one.
#[test]
fn test_longest_prefix_beats_preference() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();
    harness.rib.add_igp_table("rip", "", "").unwrap();

    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);
    add_route(&mut harness.rib, "rip", "10.1.2.0/24", "10.0.0.3", 1);

    assert_eq!(harness.rib.lookup_route(addr("10.1.2.3")), addr("10.0.0.3"));
    assert_eq!(harness.rib.lookup_route(addr("10.1.9.9")), addr("10.0.0.2"));
}

// Ext/int recursion: an EGP route is held back until a visible route
// covers its next-hop, and withdrawn again when coverage goes away.
#[test]
fn test_extint_recursive_resolution() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();
    harness.rib.add_egp_table("ebgp", "", "").unwrap();

    // Only the EGP announcement exists; its next-hop does not resolve.
    add_route(&mut harness.rib, "ebgp", "1.2.0.0/16", "192.0.2.7", 0);
    assert_eq!(harness.rib.lookup_route(addr("1.2.3.4")), addr("0.0.0.0"));

    // Observe the final table's event stream from here on.
    harness
        .rib
        .redist_enable("probe", "all", None, "", false)
        .unwrap();
    drain_redist(&mut harness);

    // An IGP route covering the next-hop appears; the EGP route resolves
    // through it.
    harness
        .rib
        .add_route(
            "ospf",
            net("192.0.2.0/24"),
            addr("10.0.0.1"),
            Some("vif0"),
            1,
            PolicyTags::default(),
        )
        .unwrap();
    assert_eq!(harness.rib.lookup_route(addr("192.0.2.7")), addr("10.0.0.1"));
    assert_eq!(harness.rib.lookup_route(addr("1.2.3.4")), addr("192.0.2.7"));

    // Exactly two adds surface: the IGP route and the resolved EGP route.
    // In particular the fresh resolution must not be re-emitted.
    let events = drain_redist(&mut harness);
    assert_eq!(events.len(), 2);
    match (&events[0], &events[1]) {
        (RedistEvent::Add(first), RedistEvent::Add(second)) => {
            assert_eq!(first.net, net("192.0.2.0/24"));
            assert_eq!(second.net, net("1.2.0.0/16"));
        }
        events => panic!("unexpected event sequence {events:?}"),
    }

    let resolved = harness
        .rib
        .lookup_route_entry(addr("1.2.3.4"))
        .expect("resolved EGP route missing");
    assert_eq!(resolved.net, net("1.2.0.0/16"));
    assert_eq!(resolved.vif.as_deref(), Some("vif0"));
    assert_eq!(
        resolved.nexthop,
        Nexthop::External { addr: addr("192.0.2.7") }
    );

    // Removing the IGP route invalidates the dependent EGP route; both
    // prefixes are withdrawn and nothing else is emitted.
    harness.rib.delete_route("ospf", net("192.0.2.0/24")).unwrap();
    assert_eq!(harness.rib.lookup_route(addr("1.2.3.4")), addr("0.0.0.0"));

    let events = drain_redist(&mut harness);
    assert_eq!(events.len(), 2);
    assert!(
        events.iter().all(|event| matches!(event, RedistEvent::Delete { .. }))
    );
}

// An EGP route that defeats the IGP offering for the same prefix replaces
// it, and the IGP route resurfaces on withdrawal.
#[test]
fn test_extint_same_prefix_arbitration() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();
    harness.rib.add_egp_table("ebgp", "", "").unwrap();

    add_route(&mut harness.rib, "ospf", "10.5.0.0/16", "10.0.0.2", 5);
    // ebgp has distance 20, beating ospf's 110; the next-hop is directly
    // connected so no recursion is involved.
    add_route(&mut harness.rib, "ebgp", "10.5.0.0/16", "10.0.0.7", 0);
    assert_eq!(harness.rib.lookup_route(addr("10.5.1.1")), addr("10.0.0.7"));

    harness.rib.delete_route("ebgp", net("10.5.0.0/16")).unwrap();
    assert_eq!(harness.rib.lookup_route(addr("10.5.1.1")), addr("10.0.0.2"));
}

// Registration notification: a more specific route landing inside the
// validity range invalidates the registration, exactly once.
#[test]
fn test_register_invalidate() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();

    let range = harness.rib.route_register(addr("10.1.2.3"), "X");
    assert!(range.matched.is_none());
    assert_eq!(range.valid_net, net("10.1.0.0/16"));

    add_route(&mut harness.rib, "ospf", "10.1.2.0/24", "10.0.0.9", 1);

    let events = drain_notify(&mut harness);
    assert_eq!(events.len(), 1);
    match &events[0] {
        NotifyEvent::Invalidate { net: event_net, multicast } => {
            assert_eq!(*event_net, net("10.1.2.0/24"));
            assert!(!multicast);
        }
        event => panic!("unexpected notification {event:?}"),
    }

    // The registration is gone; further changes are not notified.
    add_route(&mut harness.rib, "ospf", "10.1.3.0/24", "10.0.0.9", 1);
    assert!(drain_notify(&mut harness).is_empty());
}

// A replace of the exact matched prefix produces a Changed notification
// carrying the new best route.
#[test]
fn test_register_route_changed() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();
    harness.rib.add_igp_table("static", "", "").unwrap();

    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);
    let range = harness.rib.route_register(addr("10.1.2.3"), "X");
    assert_eq!(range.valid_net, net("10.1.0.0/16"));
    assert_eq!(
        range.matched.as_ref().map(|route| route.net),
        Some(net("10.1.0.0/16"))
    );

    // A preferred route for the same prefix displaces the matched one.
    add_route(&mut harness.rib, "static", "10.1.0.0/16", "10.0.0.4", 10);

    let events = drain_notify(&mut harness);
    assert_eq!(events.len(), 1);
    match &events[0] {
        NotifyEvent::Changed {
            net: event_net,
            nexthop_addr,
            metric,
            admin_distance,
            protocol_origin,
            multicast,
        } => {
            assert_eq!(*event_net, net("10.1.0.0/16"));
            assert_eq!(*nexthop_addr, addr("10.0.0.4"));
            assert_eq!(*metric, 10);
            assert_eq!(*admin_distance, 1);
            assert_eq!(protocol_origin, "static");
            assert!(!multicast);
        }
        event => panic!("unexpected notification {event:?}"),
    }
}

#[test]
fn test_deregister_interest() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();

    let range = harness.rib.route_register(addr("10.1.2.3"), "X");
    harness.rib.route_deregister(range.valid_net, "X").unwrap();
    assert!(matches!(
        harness.rib.route_deregister(range.valid_net, "X"),
        Err(Error::NoSuchRegistration(..))
    ));

    // No notification after the registration was dropped.
    add_route(&mut harness.rib, "ospf", "10.1.2.0/24", "10.0.0.9", 1);
    assert!(drain_notify(&mut harness).is_empty());
}

// Route-range lookup: the returned prefix contains the queried address
// and excludes every more specific route.
#[test]
fn test_route_range_validity() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();
    harness.rib.add_igp_table("rip", "", "").unwrap();

    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);
    add_route(&mut harness.rib, "rip", "10.1.2.0/24", "10.0.0.3", 1);

    let range = harness.rib.route_range_lookup(addr("10.1.3.1"));
    assert_eq!(
        range.matched.as_ref().map(|route| route.net),
        Some(net("10.1.0.0/16"))
    );
    assert_eq!(range.valid_net, net("10.1.3.0/24"));
    assert!(range.valid_net.contains(addr("10.1.3.1")));

    // Every address inside the validity range resolves identically.
    assert_eq!(
        harness.rib.lookup_route(addr("10.1.3.1")),
        harness.rib.lookup_route(addr("10.1.3.200")),
    );

    // Inside the more specific route, the range shrinks accordingly.
    let range = harness.rib.route_range_lookup(addr("10.1.2.5"));
    assert_eq!(
        range.matched.as_ref().map(|route| route.net),
        Some(net("10.1.2.0/24"))
    );
    assert_eq!(range.valid_net, net("10.1.2.0/24"));
}

// Policy-tag redistribution: a tagged connected route is emitted to the
// targets subscribed to its tag and to no one else.
#[test]
fn test_policy_redist_tags() {
    #[derive(Debug)]
    struct TagFilter;

    impl PolicyFilter<Ipv4> for TagFilter {
        fn classify(&self, route: &RouteEntry<Ipv4>) -> PolicyTags {
            if route.net == "10.2.0.0/24".parse::<Ipv4Network>().unwrap() {
                [42].into_iter().collect()
            } else {
                route.policy_tags.clone()
            }
        }
    }

    let mut harness = harness_with_filter(Arc::new(TagFilter));
    harness.rib.insert_policy_redist_tags("bgp-export", [42]);
    harness.rib.insert_policy_redist_tags("rip-export", [7]);

    let spec = VifSpec {
        name: "vif0".to_owned(),
        ifname: "eth0".to_owned(),
        underlying_up: true,
        ..Default::default()
    };
    harness.rib.new_vif(&spec).unwrap();
    harness
        .rib
        .add_vif_address(
            "vif0",
            addr("10.2.0.1"),
            net("10.2.0.0/24"),
            None,
            None,
        )
        .unwrap();
    // A second, untagged connected route must not be redistributed.
    harness
        .rib
        .add_vif_address(
            "vif0",
            addr("10.3.0.1"),
            net("10.3.0.0/24"),
            None,
            None,
        )
        .unwrap();

    let requests = drain_policy_redist(&mut harness);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target, "bgp-export");
    assert!(!requests[0].multicast);
    match &requests[0].event {
        RedistEvent::Add(route) => {
            assert_eq!(route.net, net("10.2.0.0/24"));
            assert_eq!(route.protocol_origin, "connected");
            assert_eq!(route.admin_distance, 0);
        }
        event => panic!("unexpected redistribution event {event:?}"),
    }
}

// A redistribution subscriber attached after routes are present receives
// exactly the current route set before any live update.
#[test]
fn test_redist_late_subscriber_dump() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();

    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);
    add_route(&mut harness.rib, "ospf", "10.2.0.0/16", "10.0.0.2", 5);

    harness
        .rib
        .redist_enable("fea", "ospf", None, "cookie-1", false)
        .unwrap();

    // Live update after the subscription.
    add_route(&mut harness.rib, "ospf", "10.3.0.0/16", "10.0.0.2", 5);

    let events = drain_redist(&mut harness);
    assert_eq!(events.len(), 3);
    let dump = events[..2]
        .iter()
        .map(|event| match event {
            RedistEvent::Add(route) => route.net,
            event => panic!("expected an add, got {event:?}"),
        })
        .collect();
    assert_eq!(
        btreeset! {net("10.1.0.0/16"), net("10.2.0.0/16")},
        dump
    );
    match &events[2] {
        RedistEvent::Add(route) => assert_eq!(route.net, net("10.3.0.0/16")),
        event => panic!("expected an add, got {event:?}"),
    }
}

// Transactional subscribers get start/commit framing around bursts.
#[test]
fn test_redist_transaction_framing() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();

    harness
        .rib
        .redist_enable("fea", "ospf", None, "cookie-1", true)
        .unwrap();
    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);

    let events = drain_redist(&mut harness);
    assert!(matches!(events[0], RedistEvent::TransactionStart));
    assert!(matches!(events[1], RedistEvent::Add(_)));
    assert!(matches!(events[2], RedistEvent::TransactionCommit));
}

// There is no redistribution table behind an EGP origin.
#[test]
fn test_no_egp_redist_table() {
    let mut harness = harness();
    harness.rib.add_egp_table("ebgp", "", "").unwrap();

    let error = harness
        .rib
        .redist_enable("fea", "ebgp", None, "c", false)
        .unwrap_err();
    assert!(matches!(error, Error::NoSuchRedistTable(_)));
    assert_eq!(error.code(), ErrorCode::NoSuchEntity);
}

// Per-prefix event sequences observed at the final table are well formed:
// adds and deletes strictly alternate.
#[test]
fn test_event_sequence_well_formed() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();
    harness.rib.add_igp_table("rip", "", "").unwrap();
    harness.rib.add_igp_table("static", "", "").unwrap();

    harness
        .rib
        .redist_enable("probe", "all", None, "", false)
        .unwrap();
    drain_redist(&mut harness);

    let target = net("10.1.0.0/16");
    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);
    add_route(&mut harness.rib, "rip", "10.1.0.0/16", "10.0.0.3", 1);
    add_route(&mut harness.rib, "static", "10.1.0.0/16", "10.0.0.4", 10);
    harness.rib.delete_route("static", target).unwrap();
    harness.rib.delete_route("ospf", target).unwrap();
    harness.rib.delete_route("rip", target).unwrap();

    let mut present = false;
    let mut transitions = 0;
    for event in drain_redist(&mut harness) {
        match event {
            RedistEvent::Add(route) if route.net == target => {
                assert!(!present, "add of a prefix that is already present");
                present = true;
                transitions += 1;
            }
            RedistEvent::Delete { net, .. } if net == target => {
                assert!(present, "delete of a prefix that is not present");
                present = false;
                transitions += 1;
            }
            _ => {}
        }
    }
    assert!(!present);
    assert!(transitions >= 2);
}

// Lookups at the final table agree with the admitted announcements.
#[test]
fn test_lookup_consistency() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();

    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);

    // An address covered only by the connected route.
    let route = harness.rib.lookup_route_entry(addr("10.0.0.77")).unwrap();
    assert_eq!(route.protocol.name, "connected");
    // An address covered only by the OSPF route.
    let route = harness.rib.lookup_route_entry(addr("10.1.0.77")).unwrap();
    assert_eq!(route.protocol.name, "ospf");
    assert_eq!(route.metric, 5);
    // An uncovered address.
    assert!(harness.rib.lookup_route_entry(addr("172.16.0.1")).is_none());

    // Admitted next-hops are interned in the registry.
    let registry = harness.rib.nexthop_registry();
    assert!(registry.find_peer(addr("10.0.0.2")).is_some());
    assert!(registry.find_external(addr("10.0.0.2")).is_none());

    assert_eq!(harness.rib.name(), "Unicast IPv4 RIB");
    assert!(!harness.rib.multicast());
    assert!(
        harness
            .rib
            .registered_protocol_names()
            .contains(&"connected".to_owned())
    );
}

// A vif still referenced by routes survives deletion in the holding map
// and is destroyed once the last reference drops.
#[test]
fn test_deleted_vif_retention() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("static", "", "").unwrap();

    add_route(&mut harness.rib, "static", "10.9.0.0/16", "10.0.0.9", 1);

    harness.rib.delete_vif("vif0").unwrap();
    assert!(harness.rib.find_vif("vif0").is_none());
    let held = harness
        .rib
        .find_deleted_vif("vif0")
        .expect("vif should be held while referenced");
    assert!(held.is_deleted());
    assert_eq!(held.usage(), 1);

    // The connected routes went away with the vif.
    assert_eq!(harness.rib.lookup_route(addr("10.0.0.5")), addr("0.0.0.0"));

    // Dropping the last referencing route destroys the vif.
    harness.rib.delete_route("static", net("10.9.0.0/16")).unwrap();
    assert!(harness.rib.find_deleted_vif("vif0").is_none());
}

// A vif deleted and re-added while referenced is resurrected from the
// holding map.
#[test]
fn test_deleted_vif_resurrection() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("static", "", "").unwrap();
    add_route(&mut harness.rib, "static", "10.9.0.0/16", "10.0.0.9", 1);

    harness.rib.delete_vif("vif0").unwrap();
    assert!(harness.rib.find_deleted_vif("vif0").is_some());

    let spec = VifSpec {
        name: "vif0".to_owned(),
        ifname: "eth0".to_owned(),
        underlying_up: true,
        ..Default::default()
    };
    harness.rib.new_vif(&spec).unwrap();
    assert!(harness.rib.find_deleted_vif("vif0").is_none());
    let vif = harness.rib.find_vif("vif0").unwrap();
    assert!(!vif.is_deleted());
    assert_eq!(vif.usage(), 1);
}

// Duplicate announcements and withdrawals of unknown prefixes are
// protocol bugs and are rejected.
#[test]
fn test_origin_rejects_duplicates_and_unknown_deletes() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();

    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);
    assert!(matches!(
        harness.rib.add_route(
            "ospf",
            net("10.1.0.0/16"),
            addr("10.0.0.2"),
            None,
            7,
            PolicyTags::default(),
        ),
        Err(Error::DuplicateRoute(..))
    ));
    assert!(matches!(
        harness.rib.delete_route("ospf", net("10.99.0.0/16")),
        Err(Error::NoSuchRoute(..))
    ));

    // replace_route is the sanctioned way to update an announcement.
    harness
        .rib
        .replace_route(
            "ospf",
            net("10.1.0.0/16"),
            addr("10.0.0.3"),
            None,
            7,
            PolicyTags::default(),
        )
        .unwrap();
    assert_eq!(harness.rib.lookup_route(addr("10.1.1.1")), addr("10.0.0.3"));
}

// IGP admission checks: unresolvable and self-address next-hops are
// rejected, oversized metrics are truncated.
#[test]
fn test_igp_admission_checks() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness.rib.add_igp_table("ospf", "", "").unwrap();

    assert!(matches!(
        harness.rib.add_route(
            "ospf",
            net("10.1.0.0/16"),
            addr("172.16.0.1"),
            None,
            5,
            PolicyTags::default(),
        ),
        Err(Error::NexthopNotConnected(..))
    ));
    assert!(matches!(
        harness.rib.add_route(
            "ospf",
            net("10.1.0.0/16"),
            addr("10.0.0.1"),
            None,
            5,
            PolicyTags::default(),
        ),
        Err(Error::SelfAddressNexthop(..))
    ));

    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 0x1_0005);
    let route = harness.rib.lookup_route_entry(addr("10.1.1.1")).unwrap();
    assert_eq!(route.metric, 0x0005);

    assert!(matches!(
        harness.rib.add_route(
            "nonesuch",
            net("10.8.0.0/16"),
            addr("10.0.0.2"),
            None,
            1,
            PolicyTags::default(),
        ),
        Err(Error::UnknownProtocol(_))
    ));
}

// The preference table is frozen for a protocol once its origin table
// exists.
#[test]
fn test_admin_distance_table() {
    let mut harness = harness();
    harness
        .rib
        .set_protocol_admin_distance("ebgp", 30)
        .unwrap();
    assert_eq!(harness.rib.get_protocol_admin_distance("ebgp"), 30);

    harness.rib.add_egp_table("ebgp", "", "").unwrap();
    assert!(matches!(
        harness.rib.set_protocol_admin_distance("ebgp", 40),
        Err(Error::AdminDistanceInUse(_))
    ));

    // Unknown protocols fall back to the maximum distance.
    assert_eq!(harness.rib.get_protocol_admin_distance("nonesuch"), 255);

    let distances = harness.rib.protocol_admin_distances();
    assert!(distances.contains(&("connected".to_owned(), 0)));
    assert!(distances.contains(&("ospf".to_owned(), 110)));
    assert!(distances.contains(&("ebgp".to_owned(), 30)));
}

// In test mode, admitting a route for an unknown protocol aborts.
#[test]
#[should_panic(expected = "fatal RIB error")]
fn test_errors_are_fatal() {
    let mut harness = harness();
    harness.rib.set_errors_are_fatal();
    let _ = harness.rib.add_route(
        "nonesuch",
        net("10.0.0.0/8"),
        addr("10.0.0.2"),
        None,
        1,
        PolicyTags::default(),
    );
}

// Protocol shutdown withdraws every announcement but keeps the table, and
// re-registration bumps the generation id.
#[test]
fn test_protocol_shutdown_and_reregistration() {
    let mut harness = harness();
    ethernet_vif(&mut harness.rib);
    harness
        .rib
        .add_igp_table("ospf", "ospfd", "instance-1")
        .unwrap();
    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);
    let genid = harness.rib.protocol("ospf").unwrap().genid;

    harness.rib.target_death("ospfd", "instance-1");
    assert_eq!(harness.rib.lookup_route(addr("10.1.1.1")), addr("0.0.0.0"));

    // The table survives; the protocol can resume and re-announce.
    harness
        .rib
        .add_igp_table("ospf", "ospfd", "instance-2")
        .unwrap();
    assert!(harness.rib.protocol("ospf").unwrap().genid > genid);
    add_route(&mut harness.rib, "ospf", "10.1.0.0/16", "10.0.0.2", 5);
    assert_eq!(harness.rib.lookup_route(addr("10.1.1.1")), addr("10.0.0.2"));
}

// Reloading the policy configuration re-tags held routes and notifies
// redistribution targets of the difference.
#[test]
fn test_push_routes_retags() {
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct TogglingFilter {
        tag_everything: AtomicBool,
    }

    impl PolicyFilter<Ipv4> for TogglingFilter {
        fn classify(&self, route: &RouteEntry<Ipv4>) -> PolicyTags {
            if self.tag_everything.load(Ordering::Relaxed) {
                [42].into_iter().collect()
            } else {
                route.policy_tags.clone()
            }
        }
    }

    let filter = Arc::new(TogglingFilter::default());
    let mut harness = harness_with_filter(filter.clone());
    harness.rib.insert_policy_redist_tags("bgp-export", [42]);
    ethernet_vif(&mut harness.rib);
    assert!(drain_policy_redist(&mut harness).is_empty());

    // Simulate a policy reload that now tags connected routes.
    filter.tag_everything.store(true, Ordering::Relaxed);
    harness.rib.push_routes();

    let requests = drain_policy_redist(&mut harness);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target, "bgp-export");
    assert!(matches!(requests[0].event, RedistEvent::Add(_)));
}
