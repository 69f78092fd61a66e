//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

// Unordered set of opaque u32 labels attached to routes by the policy
// filter, used to steer redistribution.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PolicyTags(BTreeSet<u32>);

// Map of policy tag to the protocols subscribed to routes carrying it.
#[derive(Clone, Debug, Default)]
pub struct PolicyRedistMap {
    map: BTreeMap<u32, BTreeSet<String>>,
}

// ===== impl PolicyTags =====

impl PolicyTags {
    pub fn insert(&mut self, tag: u32) {
        self.0.insert(tag);
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.0.contains(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u32> for PolicyTags {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        PolicyTags(iter.into_iter().collect())
    }
}

// ===== impl PolicyRedistMap =====

impl PolicyRedistMap {
    // Subscribes the target to all routes carrying any of the given tags.
    pub fn insert_tags(
        &mut self,
        target: &str,
        tags: impl IntoIterator<Item = u32>,
    ) {
        for tag in tags {
            self.map.entry(tag).or_default().insert(target.to_owned());
        }
    }

    // Removes the target from every tag it is subscribed to.
    pub fn reset_target(&mut self, target: &str) {
        for targets in self.map.values_mut() {
            targets.remove(target);
        }
        self.map.retain(|_, targets| !targets.is_empty());
    }

    // Returns the union of targets subscribed to any of the given tags.
    pub fn targets_for(&self, tags: &PolicyTags) -> BTreeSet<String> {
        tags.iter()
            .filter_map(|tag| self.map.get(&tag))
            .flatten()
            .cloned()
            .collect()
    }
}
