//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

pub mod cmds;
pub mod mirror;
pub mod replicate;
pub mod tree;
