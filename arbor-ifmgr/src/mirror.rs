//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::cmds::IfCmd;
use crate::tree::IfTree;

// Out-of-band signal forwarded to hint observers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IfHint {
    // The initial snapshot has been fully received.
    TreeComplete,
    // A batch of updates has been applied.
    UpdatesMade,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MirrorState {
    Ready,
    Starting,
    Running,
    ShuttingDown,
    Shutdown,
    Failed,
}

// Read-only replica of the authoritative interface tree.
//
// Commands are applied in arrival order. The tree is only trustworthy in
// the `Running` state, entered once the initial snapshot terminates with
// `TreeComplete`; any transport disconnect clears it.
#[derive(Debug)]
pub struct IfMirror {
    name: String,
    state: MirrorState,
    iftree: IfTree,
    empty: IfTree,
    hint_observers: Vec<(usize, UnboundedSender<IfHint>)>,
    next_observer_id: usize,
}

// ===== impl IfMirror =====

impl IfMirror {
    pub fn new(name: &str) -> Self {
        IfMirror {
            name: name.to_owned(),
            state: MirrorState::Ready,
            iftree: Default::default(),
            empty: Default::default(),
            hint_observers: Vec::new(),
            next_observer_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> MirrorState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == MirrorState::Running
    }

    // Returns the replicated tree, which is considered empty unless the
    // mirror is running.
    pub fn iftree(&self) -> &IfTree {
        if self.is_running() { &self.iftree } else { &self.empty }
    }

    // The transport to the producer became usable; the owner should now
    // register this mirror by name with the producer.
    pub fn transport_ready(&mut self) -> bool {
        match self.state {
            MirrorState::Ready | MirrorState::Starting | MirrorState::Failed => {
                self.state = MirrorState::Starting;
                true
            }
            _ => false,
        }
    }

    // The transport to the producer went away; the replica is no longer
    // trustworthy.
    pub fn transport_disconnected(&mut self) {
        self.iftree.clear();
        self.state = match self.state {
            MirrorState::ShuttingDown | MirrorState::Shutdown => {
                MirrorState::Shutdown
            }
            _ => MirrorState::Failed,
        };
        debug!(name = %self.name, state = ?self.state, "mirror disconnected");
    }

    pub fn shutdown(&mut self) {
        self.state = MirrorState::ShuttingDown;
    }

    // Applies one received command. Returns the hint, if any, so the owner
    // can act on it synchronously in addition to the observer fan-out.
    pub fn push(&mut self, cmd: IfCmd) -> Option<IfHint> {
        let hint = match cmd {
            IfCmd::TreeComplete => {
                if self.state == MirrorState::Starting {
                    self.state = MirrorState::Running;
                }
                Some(IfHint::TreeComplete)
            }
            IfCmd::UpdatesMade => Some(IfHint::UpdatesMade),
            cmd => {
                if !cmd.apply(&mut self.iftree) {
                    warn!(name = %self.name, ?cmd,
                        "cannot apply replicated command");
                }
                None
            }
        };

        if let Some(hint) = hint {
            self.hint_observers
                .retain(|(_, tx)| tx.send(hint).is_ok());
        }
        hint
    }

    // Attaches an observer interested in receiving hints; returns the
    // identifier to detach it with.
    pub fn attach_hint_observer(
        &mut self,
        tx: UnboundedSender<IfHint>,
    ) -> usize {
        let id = self.next_observer_id;
        self.next_observer_id += 1;
        self.hint_observers.push((id, tx));
        id
    }

    pub fn detach_hint_observer(&mut self, id: usize) -> bool {
        let before = self.hint_observers.len();
        self.hint_observers.retain(|(oid, _)| *oid != id);
        self.hint_observers.len() != before
    }
}
