//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use arbor_utils::ip::Ip;

use crate::table::{RouteEvent, TableCore, TableGraph, TableId, TableNode};

// Binary combiner keeping, per prefix, the best of its two parents'
// offerings. The table itself is stateless: winners are recomputed from
// the parents on every event and only the difference is emitted.
#[derive(Debug)]
pub struct MergedTable {
    pub(crate) core: TableCore,
    pub(crate) parent_a: TableId,
    pub(crate) parent_b: TableId,
}

// ===== impl MergedTable =====

impl MergedTable {
    pub(crate) fn new(
        name: String,
        parent_a: TableId,
        parent_b: TableId,
    ) -> Self {
        MergedTable {
            core: TableCore::new(name),
            parent_a,
            parent_b,
        }
    }
}

// ===== impl TableGraph =====

impl<A: Ip> TableGraph<A> {
    pub(crate) fn merged_process(
        &mut self,
        id: TableId,
        from: TableId,
        event: RouteEvent<A>,
    ) {
        let other_parent = {
            let TableNode::Merged(table) = self.node(id) else {
                unreachable!("not a merged table")
            };
            if table.parent_a == from {
                table.parent_b
            } else {
                table.parent_a
            }
        };
        let other = self
            .lookup_route_exact(other_parent, &event.net())
            .cloned();

        let out = match event {
            RouteEvent::Add(route) => match other {
                None => vec![RouteEvent::Add(route)],
                // The incoming route must be strictly preferred to displace
                // the incumbent.
                Some(other) => {
                    if route.is_preferred_over(&other) {
                        vec![RouteEvent::Replace {
                            old: other,
                            new: route,
                        }]
                    } else {
                        vec![]
                    }
                }
            },
            RouteEvent::Delete(route) => match other {
                None => vec![RouteEvent::Delete(route)],
                Some(other) => {
                    if other.is_preferred_over(&route) {
                        // The deleted route had been masked all along.
                        vec![]
                    } else {
                        vec![RouteEvent::Replace {
                            old: route,
                            new: other,
                        }]
                    }
                }
            },
            RouteEvent::Replace { old, new } => match other {
                None => vec![RouteEvent::Replace { old, new }],
                Some(other) => {
                    let old_was_winner = !other.is_preferred_over(&old);
                    let new_wins = new.is_preferred_over(&other);
                    match (old_was_winner, new_wins) {
                        (true, true) => {
                            vec![RouteEvent::Replace { old, new }]
                        }
                        (true, false) => vec![RouteEvent::Replace {
                            old,
                            new: other,
                        }],
                        (false, true) => vec![RouteEvent::Replace {
                            old: other,
                            new,
                        }],
                        (false, false) => vec![],
                    }
                }
            },
        };
        self.emit(id, out);
    }
}
