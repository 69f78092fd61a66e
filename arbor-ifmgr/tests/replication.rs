//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use arbor_ifmgr::cmds::{IfCmd, tree_to_commands};
use arbor_ifmgr::mirror::{IfHint, IfMirror, MirrorState};
use arbor_ifmgr::replicate::ReplicationManager;
use arbor_ifmgr::tree::IfTree;
use arbor_utils::queue::DispatchError;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

fn ifadd(ifname: &str) -> IfCmd {
    IfCmd::IfAdd {
        ifname: ifname.to_owned(),
    }
}

fn vifadd(ifname: &str, vifname: &str) -> IfCmd {
    IfCmd::VifAdd {
        ifname: ifname.to_owned(),
        vifname: vifname.to_owned(),
    }
}

fn v4add(ifname: &str, vifname: &str, addr: &str) -> IfCmd {
    IfCmd::V4Add {
        ifname: ifname.to_owned(),
        vifname: vifname.to_owned(),
        addr: addr.parse().unwrap(),
    }
}

// Producer tree used by several tests: one interface with two vifs
// carrying three addresses total.
fn sample_tree() -> IfTree {
    let mut tree = IfTree::default();
    for cmd in [
        ifadd("eth0"),
        IfCmd::IfSetEnabled {
            ifname: "eth0".to_owned(),
            enabled: true,
        },
        IfCmd::IfSetMtu {
            ifname: "eth0".to_owned(),
            mtu: 1500,
        },
        vifadd("eth0", "vif0"),
        IfCmd::VifSetEnabled {
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
            enabled: true,
        },
        vifadd("eth0", "vif1"),
        v4add("eth0", "vif0", "192.0.2.1"),
        IfCmd::V4SetPrefix {
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
            addr: "192.0.2.1".parse().unwrap(),
            prefix_len: 24,
        },
        v4add("eth0", "vif1", "198.51.100.1"),
        IfCmd::V6Add {
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
            addr: "2001:db8::1".parse().unwrap(),
        },
    ] {
        assert!(cmd.apply(&mut tree));
    }
    tree
}

// Drains the mirror's command channel, applying every command and
// acknowledging it to the producer. Returns the commands seen.
fn pump(
    manager: &mut ReplicationManager,
    rx: &mut UnboundedReceiver<IfCmd>,
    mirror: &mut IfMirror,
) -> Vec<IfCmd> {
    let mut seen = Vec::new();
    while let Ok(cmd) = rx.try_recv() {
        mirror.push(cmd.clone());
        seen.push(cmd);
        manager.completion(mirror.name(), Ok(()));
    }
    seen
}

// Serializing a tree into commands and replaying them into an empty tree
// yields a structurally equal tree.
#[test]
fn test_tree_commands_roundtrip() {
    let tree = sample_tree();

    let mut replayed = IfTree::default();
    for cmd in tree_to_commands(&tree) {
        assert!(cmd.apply(&mut replayed), "replay failed for {cmd:?}");
    }
    assert_eq!(tree, replayed);
}

#[test]
fn test_commands_json_roundtrip() {
    for cmd in tree_to_commands(&sample_tree()) {
        let encoded = serde_json::to_string(&cmd).unwrap();
        let decoded: IfCmd = serde_json::from_str(&encoded).unwrap();
        assert_eq!(cmd, decoded);
    }
}

// A mirror attached to a producer with existing state receives a full
// snapshot terminated by exactly one TreeComplete.
#[test]
fn test_mirror_backfill() {
    let mut manager = ReplicationManager::default();
    for cmd in tree_to_commands(&sample_tree()) {
        if !cmd.is_hint() {
            manager.push(cmd);
        }
    }

    let (tx, mut rx) = unbounded_channel();
    let mut mirror = IfMirror::new("fib-client");
    assert!(mirror.transport_ready());
    assert!(manager.add_mirror("fib-client", tx));

    let seen = pump(&mut manager, &mut rx, &mut mirror);
    let complete_count = seen
        .iter()
        .filter(|cmd| matches!(cmd, IfCmd::TreeComplete))
        .count();
    assert_eq!(complete_count, 1);
    assert!(matches!(seen.last(), Some(IfCmd::TreeComplete)));

    assert_eq!(mirror.state(), MirrorState::Running);
    assert_eq!(mirror.iftree(), manager.iftree());
}

// Duplicate registrations are rejected by name.
#[test]
fn test_duplicate_mirror_rejected() {
    let mut manager = ReplicationManager::default();
    let (tx1, _rx1) = unbounded_channel();
    let (tx2, _rx2) = unbounded_channel();

    assert!(manager.add_mirror("m1", tx1));
    assert!(!manager.add_mirror("m1", tx2));
}

// Dispatch is serialized through the global queue: at most one command in
// flight across all mirrors, in enqueue order.
#[test]
fn test_dispatch_ordering() {
    let mut manager = ReplicationManager::default();
    let (tx1, mut rx1) = unbounded_channel();
    let (tx2, mut rx2) = unbounded_channel();

    assert!(manager.add_mirror("m1", tx1));
    // m1's backfill of the empty tree is a lone TreeComplete, dispatched
    // immediately.
    assert_eq!(rx1.try_recv().ok(), Some(IfCmd::TreeComplete));
    assert!(rx1.try_recv().is_err());

    // Queue a live command behind the outstanding dispatch, then attach a
    // second mirror.
    manager.push(ifadd("eth0"));
    assert!(manager.add_mirror("m2", tx2));

    // Nothing moves until m1 acknowledges the snapshot.
    assert!(rx1.try_recv().is_err());
    assert!(rx2.try_recv().is_err());

    manager.completion("m1", Ok(()));
    assert_eq!(rx1.try_recv().ok(), Some(ifadd("eth0")));
    assert!(rx2.try_recv().is_err());

    // Only after m1 finishes does m2 start receiving its snapshot.
    manager.completion("m1", Ok(()));
    assert_eq!(rx2.try_recv().ok(), Some(ifadd("eth0")));
}

// A mirror reporting a command failure has diverged and is detached; the
// remaining mirrors keep receiving updates.
#[test]
fn test_divergence_detaches_mirror() {
    let mut manager = ReplicationManager::default();
    let (tx1, mut rx1) = unbounded_channel();
    let (tx2, mut rx2) = unbounded_channel();
    assert!(manager.add_mirror("m1", tx1));
    assert!(manager.add_mirror("m2", tx2));

    assert_eq!(rx1.try_recv().ok(), Some(IfCmd::TreeComplete));
    manager.completion(
        "m1",
        Err(DispatchError::CommandFailed("out of sync".to_owned())),
    );
    assert!(manager.mirror_names().eq(["m2"]));

    // m2 still drains normally.
    assert_eq!(rx2.try_recv().ok(), Some(IfCmd::TreeComplete));
    manager.completion("m2", Ok(()));
    manager.push(ifadd("eth0"));
    assert_eq!(rx2.try_recv().ok(), Some(ifadd("eth0")));
    assert!(rx1.try_recv().is_err());
}

// A disconnect clears the mirror's replica and leaves it unusable until
// the next snapshot completes.
#[test]
fn test_mirror_disconnect_clears_tree() {
    let mut manager = ReplicationManager::default();
    manager.push(ifadd("eth0"));

    let (tx, mut rx) = unbounded_channel();
    let mut mirror = IfMirror::new("m1");
    assert!(mirror.transport_ready());
    assert!(manager.add_mirror("m1", tx));
    pump(&mut manager, &mut rx, &mut mirror);
    assert!(!mirror.iftree().is_empty());

    mirror.transport_disconnected();
    assert_eq!(mirror.state(), MirrorState::Failed);
    assert!(mirror.iftree().is_empty());

    // Reconnect and resynchronize.
    assert!(mirror.transport_ready());
    assert_eq!(mirror.state(), MirrorState::Starting);
    assert!(mirror.iftree().is_empty());

    // An orderly shutdown ends in the Shutdown state instead.
    mirror.shutdown();
    mirror.transport_disconnected();
    assert_eq!(mirror.state(), MirrorState::Shutdown);
}

// Hints are fanned out to attached observers.
#[test]
fn test_hint_observers() {
    let mut mirror = IfMirror::new("m1");
    mirror.transport_ready();

    let (tx, mut rx) = unbounded_channel();
    let id = mirror.attach_hint_observer(tx);

    assert_eq!(mirror.push(IfCmd::TreeComplete), Some(IfHint::TreeComplete));
    assert_eq!(mirror.push(IfCmd::UpdatesMade), Some(IfHint::UpdatesMade));
    assert_eq!(rx.try_recv().ok(), Some(IfHint::TreeComplete));
    assert_eq!(rx.try_recv().ok(), Some(IfHint::UpdatesMade));

    assert!(mirror.detach_hint_observer(id));
    assert!(!mirror.detach_hint_observer(id));
}
