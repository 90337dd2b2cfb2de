//! Validated rewrite targets: the server/client subnets new addresses are
//! drawn from and the router MACs packets are forwarded to.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::OnceLock;

use ipnetwork::IpNetwork;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{RemapError, Result, Side};

// ─── Subnet ───────────────────────────────────────────────────────────────────

/// A CIDR block plus the host-allocation policy used for rewrite targets.
/// Host bits are masked off on parse, so `10.1.2.7/24` and `10.1.2.0/24` are
/// the same subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    net: IpNetwork,
}

impl Subnet {
    pub fn new(addr: IpAddr, prefix: u8) -> Option<Self> {
        let net = IpNetwork::new(addr, prefix).ok()?;
        Self::normalised(net)
    }

    fn normalised(net: IpNetwork) -> Option<Self> {
        IpNetwork::new(net.network(), net.prefix()).ok().map(|net| Self { net })
    }

    pub fn network(&self) -> IpAddr { self.net.network() }

    pub fn prefix(&self) -> u8 { self.net.prefix() }

    pub fn is_ipv6(&self) -> bool { self.net.is_ipv6() }

    fn host_bits(&self) -> u8 {
        (if self.is_ipv6() { 128 } else { 32 }) - self.prefix()
    }

    /// Offset of the first assignable host from the network address.
    fn first_host(&self) -> usize {
        if self.host_bits() >= 2 { 1 } else { 0 }
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.net.contains(*addr)
    }

    pub fn overlaps(&self, other: &Subnet) -> bool {
        self.contains(&other.network()) || other.contains(&self.network())
    }

    /// Number of assignable host addresses. IPv4 loses network and broadcast
    /// above /31; IPv6 loses only the subnet-router anycast address above /127.
    pub fn capacity(&self) -> u128 {
        let reserved = if self.is_ipv6() { 1 } else { 2 };
        // ipnetwork's `size()` overflows at /0, so derive the block size here.
        let size = 1u128.checked_shl(u32::from(self.host_bits())).unwrap_or(u128::MAX);
        match self.host_bits() {
            0 => 1,
            1 => 2,
            _ => size - reserved,
        }
    }

    /// Assignable hosts in allocation order.
    pub fn hosts(&self) -> impl Iterator<Item = IpAddr> {
        let take = usize::try_from(self.capacity()).unwrap_or(usize::MAX);
        self.net.iter().skip(self.first_host()).take(take)
    }

    /// The `k`-th assignable host, zero-based.
    pub fn host(&self, k: u128) -> Option<IpAddr> {
        if k >= self.capacity() { return None; }
        match self.net {
            IpNetwork::V4(n) => n.nth(self.first_host() as u32 + k as u32).map(IpAddr::V4),
            IpNetwork::V6(_) => self.hosts().nth(usize::try_from(k).ok()?),
        }
    }
}

impl FromStr for Subnet {
    type Err = RemapError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| RemapError::InvalidSubnet { value: s.to_string(), reason };
        let net = IpNetwork::from_str(s.trim()).map_err(|e| invalid(e.to_string()))?;
        Subnet::normalised(net).ok_or_else(|| invalid("cannot mask host bits".to_string()))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix())
    }
}

// ─── MAC address ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

fn mac_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$").expect("MAC pattern compiles"))
}

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] { self.0 }
}

impl From<[u8; 6]> for MacAddr {
    fn from(b: [u8; 6]) -> Self { MacAddr(b) }
}

impl FromStr for MacAddr {
    type Err = RemapError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || RemapError::InvalidMac { value: s.to_string() };
        if !mac_pattern().is_match(s) { return Err(invalid()); }
        let mut b = [0u8; 6];
        for (slot, part) in b.iter_mut().zip(s.split([':', '-'])) {
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(MacAddr(b))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── Target spec ──────────────────────────────────────────────────────────────

/// Fully resolved rewrite targets. Prompting for missing values happens in the
/// CLI before one of these is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub server_subnet: Subnet,
    pub client_subnet: Subnet,
    /// Destination MAC for server->client packets.
    pub server_mac: MacAddr,
    /// Destination MAC for client->server packets.
    pub client_mac: MacAddr,
}

impl TargetSpec {
    pub fn new(server_subnet: Subnet, server_mac: MacAddr, client_subnet: Subnet, client_mac: MacAddr) -> Result<Self> {
        if server_subnet.overlaps(&client_subnet) {
            return Err(RemapError::TargetSubnetsOverlap {
                server: server_subnet.to_string(),
                client: client_subnet.to_string(),
            });
        }
        Ok(Self { server_subnet, client_subnet, server_mac, client_mac })
    }

    pub fn parse(server_subnet: &str, server_mac: &str, client_subnet: &str, client_mac: &str) -> Result<Self> {
        Self::new(server_subnet.parse()?, server_mac.parse()?, client_subnet.parse()?, client_mac.parse()?)
    }

    pub fn subnet(&self, side: Side) -> &Subnet {
        match side {
            Side::Server => &self.server_subnet,
            Side::Client => &self.client_subnet,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
