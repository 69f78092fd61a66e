//
// Copyright (c) The Arbor Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, IpNetworkError, Ipv4Network, Ipv6Network};
use num_derive::{FromPrimitive, ToPrimitive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// Address Family identifier.
//
// IANA registry:
// http://www.iana.org/assignments/address-family-numbers
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Converts this IPv4 address into a host prefix network.
    fn to_host_prefix(&self) -> Ipv4Network;
}

// Extension methods for Ipv6Addr.
pub trait Ipv6AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Converts this IPv6 address into a host prefix network.
    fn to_host_prefix(&self) -> Ipv6Network;
}

pub trait IpAddrKind:
    std::fmt::Debug
    + std::fmt::Display
    + Clone
    + Copy
    + Eq
    + std::hash::Hash
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + DeserializeOwned
    + Serialize
    + Into<IpAddr>
{
    fn address_family(&self) -> AddressFamily;

    fn get(addr: IpAddr) -> Option<Self>;

    fn unspecified() -> Self;

    fn is_usable(&self) -> bool;
}

pub trait IpNetworkKind<I: IpAddrKind>:
    std::fmt::Debug
    + std::fmt::Display
    + Clone
    + Copy
    + Eq
    + std::hash::Hash
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + DeserializeOwned
    + Serialize
    + Into<IpNetwork>
{
    fn new(addr: I, prefix: u8) -> Result<Self, IpNetworkError>;

    // Builds the host prefix (maximum length) for the given address.
    fn host_prefix(addr: I) -> Self;

    fn default(af: AddressFamily) -> Self;

    fn address_family(&self) -> AddressFamily;

    fn get(prefix: IpNetwork) -> Option<Self>;

    fn contains(&self, ip: I) -> bool;

    fn is_supernet_of(self, other: Self) -> bool;

    fn ip(&self) -> I;

    fn prefix(&self) -> u8;

    #[must_use]
    fn apply_mask(&self) -> Self;

    fn is_host_prefix(&self) -> bool;
}

// Address-family marker used to parameterize the RIB and its tables.
pub trait Ip:
    std::fmt::Debug
    + Clone
    + Copy
    + Default
    + Eq
    + std::hash::Hash
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + 'static
{
    const AF: AddressFamily;

    type Addr: IpAddrKind;
    type Network: IpNetworkKind<Self::Addr> + prefix_trie::Prefix;
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Ipv4;

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Ipv6;

// ===== impl AddressFamily =====

impl AddressFamily {
    pub fn addr_len(&self) -> usize {
        match self {
            AddressFamily::Ipv4 => Ipv4Addr::LENGTH,
            AddressFamily::Ipv6 => Ipv6Addr::LENGTH,
        }
    }

    pub fn max_prefixlen(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    const LENGTH: usize = 4;

    fn is_usable(&self) -> bool {
        !(self.is_loopback()
            || self.is_broadcast()
            || self.is_multicast()
            || self.is_unspecified())
    }

    fn to_host_prefix(&self) -> Ipv4Network {
        Ipv4Network::new(*self, 32).unwrap()
    }
}

impl IpAddrKind for Ipv4Addr {
    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv4
    }

    fn get(addr: IpAddr) -> Option<Self> {
        match addr {
            IpAddr::V4(addr) => Some(addr),
            _ => None,
        }
    }

    fn unspecified() -> Self {
        Ipv4Addr::UNSPECIFIED
    }

    fn is_usable(&self) -> bool {
        Ipv4AddrExt::is_usable(self)
    }
}

// ===== impl Ipv6Addr =====

impl Ipv6AddrExt for Ipv6Addr {
    const LENGTH: usize = 16;

    fn is_usable(&self) -> bool {
        !(self.is_loopback() || self.is_multicast() || self.is_unspecified())
    }

    fn to_host_prefix(&self) -> Ipv6Network {
        Ipv6Network::new(*self, 128).unwrap()
    }
}

impl IpAddrKind for Ipv6Addr {
    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv6
    }

    fn get(addr: IpAddr) -> Option<Self> {
        match addr {
            IpAddr::V6(addr) => Some(addr),
            _ => None,
        }
    }

    fn unspecified() -> Self {
        Ipv6Addr::UNSPECIFIED
    }

    fn is_usable(&self) -> bool {
        Ipv6AddrExt::is_usable(self)
    }
}

// ===== impl Ipv4Network =====

impl IpNetworkKind<Ipv4Addr> for Ipv4Network {
    fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, IpNetworkError> {
        Ipv4Network::new(addr, prefix)
    }

    fn host_prefix(addr: Ipv4Addr) -> Self {
        addr.to_host_prefix()
    }

    fn default(_af: AddressFamily) -> Self {
        Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap()
    }

    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv4
    }

    fn get(prefix: IpNetwork) -> Option<Self> {
        match prefix {
            IpNetwork::V4(prefix) => Some(prefix),
            _ => None,
        }
    }

    fn contains(&self, ip: Ipv4Addr) -> bool {
        Ipv4Network::contains(*self, ip)
    }

    fn is_supernet_of(self, other: Self) -> bool {
        Ipv4Network::is_supernet_of(self, other)
    }

    fn ip(&self) -> Ipv4Addr {
        Ipv4Network::ip(*self)
    }

    fn prefix(&self) -> u8 {
        (*self).prefix()
    }

    fn apply_mask(&self) -> Self {
        Ipv4Network::new(self.network(), (*self).prefix()).unwrap()
    }

    fn is_host_prefix(&self) -> bool {
        (*self).prefix() == 32
    }
}

// ===== impl Ipv6Network =====

impl IpNetworkKind<Ipv6Addr> for Ipv6Network {
    fn new(addr: Ipv6Addr, prefix: u8) -> Result<Self, IpNetworkError> {
        Ipv6Network::new(addr, prefix)
    }

    fn host_prefix(addr: Ipv6Addr) -> Self {
        addr.to_host_prefix()
    }

    fn default(_af: AddressFamily) -> Self {
        Ipv6Network::new(Ipv6Addr::UNSPECIFIED, 0).unwrap()
    }

    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv6
    }

    fn get(prefix: IpNetwork) -> Option<Self> {
        match prefix {
            IpNetwork::V6(prefix) => Some(prefix),
            _ => None,
        }
    }

    fn contains(&self, ip: Ipv6Addr) -> bool {
        Ipv6Network::contains(self, ip)
    }

    fn is_supernet_of(self, other: Self) -> bool {
        Ipv6Network::is_supernet_of(self, other)
    }

    fn ip(&self) -> Ipv6Addr {
        Ipv6Network::ip(self)
    }

    fn prefix(&self) -> u8 {
        (*self).prefix()
    }

    fn apply_mask(&self) -> Self {
        Ipv6Network::new(self.network(), (*self).prefix()).unwrap()
    }

    fn is_host_prefix(&self) -> bool {
        (*self).prefix() == 128
    }
}

// ===== impl Ipv4 =====

impl Ip for Ipv4 {
    const AF: AddressFamily = AddressFamily::Ipv4;

    type Addr = Ipv4Addr;
    type Network = Ipv4Network;
}

// ===== impl Ipv6 =====

impl Ip for Ipv6 {
    const AF: AddressFamily = AddressFamily::Ipv6;

    type Addr = Ipv6Addr;
    type Network = Ipv6Network;
}
