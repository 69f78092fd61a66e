//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use tracing::{error, warn};

// RIB errors.
#[derive(Debug)]
pub enum Error {
    // Structural errors
    TableAlreadyExists(String),
    ExtIntTableAlreadyExists,
    FinalTableNotPlumbed(String),
    // Routing-semantic errors
    UnknownProtocol(String),
    NoSuchTable(String),
    DuplicateRoute(String, IpNetwork),
    NoSuchRoute(String, IpNetwork),
    NexthopNotConnected(String, IpNetwork, IpAddr),
    SelfAddressNexthop(String, IpNetwork, IpAddr),
    AdminDistanceInUse(String),
    // Vif errors
    VifAlreadyExists(String),
    NoSuchVif(String),
    NoSuchVifAddress(String, IpAddr),
    // Registration errors
    NoSuchRegistration(IpNetwork, String),
    // Redistribution errors
    NoSuchRedistTable(String),
    NoSuchRedistSubscription(String, String),
}

// Uniform error codes exposed on the control surface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    CommandFailed,
    ResolveFailed,
    NoSuchEntity,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::TableAlreadyExists(name) => {
                error!(%name, "{}", self);
            }
            Error::ExtIntTableAlreadyExists => {
                error!("{}", self);
            }
            Error::FinalTableNotPlumbed(name) => {
                error!(%name, "{}", self);
            }
            Error::UnknownProtocol(name) => {
                error!(%name, "{}", self);
            }
            Error::NoSuchTable(name) => {
                error!(%name, "{}", self);
            }
            Error::DuplicateRoute(table, net) => {
                warn!(%table, %net, "{}", self);
            }
            Error::NoSuchRoute(table, net) => {
                warn!(%table, %net, "{}", self);
            }
            Error::NexthopNotConnected(table, net, nexthop) => {
                error!(%table, %net, %nexthop, "{}", self);
            }
            Error::SelfAddressNexthop(table, net, nexthop) => {
                warn!(%table, %net, %nexthop, "{}", self);
            }
            Error::AdminDistanceInUse(protocol) => {
                error!(%protocol, "{}", self);
            }
            Error::VifAlreadyExists(name) => {
                warn!(%name, "{}", self);
            }
            Error::NoSuchVif(name) => {
                error!(%name, "{}", self);
            }
            Error::NoSuchVifAddress(name, addr) => {
                error!(%name, %addr, "{}", self);
            }
            Error::NoSuchRegistration(net, module) => {
                warn!(%net, %module, "{}", self);
            }
            Error::NoSuchRedistTable(name) => {
                warn!(%name, "{}", self);
            }
            Error::NoSuchRedistSubscription(target, cookie) => {
                warn!(%target, %cookie, "{}", self);
            }
        }
    }

    // True for errors that indicate broken plumbing rather than a bad
    // request.
    pub(crate) fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::TableAlreadyExists(_)
                | Error::ExtIntTableAlreadyExists
                | Error::FinalTableNotPlumbed(_)
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NoSuchTable(_)
            | Error::NoSuchRoute(..)
            | Error::NoSuchVif(_)
            | Error::NoSuchVifAddress(..)
            | Error::NoSuchRegistration(..)
            | Error::NoSuchRedistTable(_)
            | Error::NoSuchRedistSubscription(..) => ErrorCode::NoSuchEntity,
            _ => ErrorCode::CommandFailed,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::TableAlreadyExists(..) => {
                write!(f, "table already exists")
            }
            Error::ExtIntTableAlreadyExists => {
                write!(f, "RIB already has an ext/int table")
            }
            Error::FinalTableNotPlumbed(..) => {
                write!(f, "final table chain is not plumbed")
            }
            Error::UnknownProtocol(..) => {
                write!(f, "unknown routing protocol")
            }
            Error::NoSuchTable(..) => {
                write!(f, "origin table does not exist")
            }
            Error::DuplicateRoute(..) => {
                write!(f, "duplicate route announcement from origin")
            }
            Error::NoSuchRoute(..) => {
                write!(f, "no route for prefix in origin table")
            }
            Error::NexthopNotConnected(..) => {
                write!(
                    f,
                    "no directly connected interface toward the next-hop \
                     router"
                )
            }
            Error::SelfAddressNexthop(..) => {
                write!(f, "next-hop is a local interface address")
            }
            Error::AdminDistanceInUse(..) => {
                write!(
                    f,
                    "protocol has already instantiated an origin table"
                )
            }
            Error::VifAlreadyExists(..) => {
                write!(f, "vif already exists")
            }
            Error::NoSuchVif(..) => {
                write!(f, "vif does not exist")
            }
            Error::NoSuchVifAddress(..) => {
                write!(f, "vif address does not exist")
            }
            Error::NoSuchRegistration(..) => {
                write!(f, "no matching route registration")
            }
            Error::NoSuchRedistTable(..) => {
                write!(f, "no redistribution table for protocol")
            }
            Error::NoSuchRedistSubscription(..) => {
                write!(f, "no matching redistribution subscription")
            }
        }
    }
}

impl std::error::Error for Error {}
