//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;

use arbor_utils::queue::{DispatchError, DispatchQueue, DispatchResult};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};

use crate::cmds::{IfCmd, tree_to_commands};
use crate::tree::IfTree;

pub type MirrorSender = UnboundedSender<IfCmd>;

// Per-mirror command queue with at most one command in flight.
#[derive(Debug)]
pub struct Replicator {
    name: String,
    tx: MirrorSender,
    queue: DispatchQueue<IfCmd>,
}

// Authoritative side of the interface mirror.
//
// Holds the sole writable tree and one replicator per attached mirror.
// Mutations apply locally first and are then forwarded to every replicator.
// A single global queue of replicator names (one entry per queued command)
// serializes dispatch so that all mirrors observe attach and update events
// in the same total order.
#[derive(Debug, Default)]
pub struct ReplicationManager {
    iftree: IfTree,
    outputs: Vec<Replicator>,
    order: VecDeque<String>,
}

// ===== impl Replicator =====

impl Replicator {
    fn new(name: String, tx: MirrorSender) -> Self {
        Replicator {
            name,
            tx,
            queue: DispatchQueue::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// ===== impl ReplicationManager =====

impl ReplicationManager {
    pub fn iftree(&self) -> &IfTree {
        &self.iftree
    }

    // Applies the command to the local tree and forwards it to every
    // attached mirror. A command the local tree rejects is not forwarded.
    pub fn push(&mut self, cmd: IfCmd) {
        if !cmd.apply(&mut self.iftree) {
            error!(?cmd, "cannot apply command to interface tree");
            return;
        }

        for replicator in self.outputs.iter_mut() {
            replicator.queue.push(cmd.clone());
            self.order.push_back(replicator.name.clone());
        }
        self.crank();
    }

    // Signals the end of a mutation batch to every mirror.
    pub fn updates_made(&mut self) {
        self.push(IfCmd::UpdatesMade);
    }

    // Attaches a new mirror and backfills it with a snapshot of the current
    // tree, terminated by `TreeComplete`, ahead of any live command.
    pub fn add_mirror(&mut self, name: &str, tx: MirrorSender) -> bool {
        if self.outputs.iter().any(|r| r.name == name) {
            warn!(%name, "mirror is already attached");
            return false;
        }

        let mut replicator = Replicator::new(name.to_owned(), tx);
        for cmd in tree_to_commands(&self.iftree) {
            replicator.queue.push(cmd);
            self.order.push_back(replicator.name.clone());
        }
        self.outputs.push(replicator);
        self.crank();
        true
    }

    // Detaches a mirror, dropping its pending commands from the global
    // dispatch queue.
    pub fn remove_mirror(&mut self, name: &str) -> bool {
        let Some(pos) = self.outputs.iter().position(|r| r.name == name)
        else {
            return false;
        };
        self.order.retain(|n| n != name);
        self.outputs.remove(pos);
        true
    }

    // Completion callback for the command most recently dispatched to the
    // named mirror. A `CommandFailed` means the remote tree diverged from
    // the local one; the replicator is detached and the local tree remains
    // authoritative.
    pub fn completion(&mut self, name: &str, result: DispatchResult) {
        let Some(replicator) =
            self.outputs.iter_mut().find(|r| r.name == name)
        else {
            debug!(%name, "completion for detached mirror");
            return;
        };
        if !replicator.queue.is_pending() {
            warn!(%name, "completion with no dispatch outstanding");
            return;
        }
        let cmd = replicator.queue.complete();

        match result {
            Ok(()) => {
                debug_assert_eq!(self.order.front().map(String::as_str), Some(name));
                self.order.pop_front();
            }
            Err(DispatchError::CommandFailed(reason)) => {
                error!(%name, %reason, ?cmd,
                    "mirror diverged from local tree, detaching");
                self.remove_mirror(name);
            }
            Err(DispatchError::Transport(reason)) => {
                error!(%name, %reason, "mirror transport error, detaching");
                self.remove_mirror(name);
            }
        }
        self.crank();
    }

    pub fn mirror_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.outputs.iter().map(|r| r.name.as_str())
    }

    // Dispatches the head command of the replicator at the head of the
    // global queue, unless a dispatch is already outstanding.
    fn crank(&mut self) {
        loop {
            let Some(name) = self.order.front() else {
                return;
            };
            let Some(replicator) =
                self.outputs.iter_mut().find(|r| &r.name == name)
            else {
                // Stale entry left over from a detached mirror.
                self.order.pop_front();
                continue;
            };
            if replicator.queue.is_pending() {
                return;
            }
            if let Some(cmd) = replicator.queue.dispatch() {
                let _ = replicator.tx.send(cmd.clone());
            } else {
                self.order.pop_front();
                continue;
            }
            return;
        }
    }
}
