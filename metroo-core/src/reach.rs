//! Reachability keys: CIDR blocks and domain patterns. These are what the
//! router advertises, withdraws, and matches destinations against.

use crate::error::{Error, Result};
use crate::types::AgentId;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

/// An IPv4 or IPv6 prefix in canonical form (host bits zeroed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(Error::config(format!("prefix /{prefix} too long for {addr}")));
        }
        Ok(Self {
            addr: mask_addr(addr, prefix),
            prefix,
        })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// The `0.0.0.0/0` (or `::/0`) fallback route.
    pub fn is_default(&self) -> bool {
        self.prefix == 0
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let m = v4_mask(self.prefix);
                u32::from(ip) & m == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let m = v6_mask(self.prefix);
                u128::from(ip) & m == u128::from(net)
            }
            _ => false,
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix as u32)
    }
}

fn mask_addr(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(a) => IpAddr::V4(Ipv4Addr::from(u32::from(a) & v4_mask(prefix))),
        IpAddr::V6(a) => IpAddr::V6(Ipv6Addr::from(u128::from(a) & v6_mask(prefix))),
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((a, p)) => {
                let addr: IpAddr = a
                    .parse()
                    .map_err(|_| Error::config(format!("bad CIDR address in {s:?}")))?;
                let prefix: u8 = p
                    .parse()
                    .map_err(|_| Error::config(format!("bad CIDR prefix in {s:?}")))?;
                (addr, prefix)
            }
            None => {
                // Bare address: a host route.
                let addr: IpAddr = s
                    .parse()
                    .map_err(|_| Error::config(format!("bad CIDR {s:?}")))?;
                let prefix = if addr.is_ipv4() { 32 } else { 128 };
                (addr, prefix)
            }
        };
        Cidr::new(addr, prefix)
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

/// A domain reachability pattern: an exact FQDN or a `*.suffix` wildcard.
/// Stored lowercase without a trailing dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DomainPattern {
    Exact(String),
    /// Matches any name ending in `.suffix` (and not the bare suffix).
    Wildcard(String),
}

impl DomainPattern {
    pub fn matches(&self, name: &str) -> bool {
        let name = normalize(name);
        match self {
            DomainPattern::Exact(d) => name == *d,
            DomainPattern::Wildcard(suffix) => {
                name.len() > suffix.len() + 1
                    && name.ends_with(suffix.as_str())
                    && name.as_bytes()[name.len() - suffix.len() - 1] == b'.'
            }
        }
    }

    /// Suffix length, used to prefer the longest wildcard match.
    pub fn specificity(&self) -> usize {
        match self {
            DomainPattern::Exact(d) => d.len(),
            DomainPattern::Wildcard(s) => s.len(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, DomainPattern::Wildcard(_))
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl fmt::Display for DomainPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainPattern::Exact(d) => f.write_str(d),
            DomainPattern::Wildcard(s) => write!(f, "*.{s}"),
        }
    }
}

impl FromStr for DomainPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = normalize(s);
        if s.is_empty() {
            return Err(Error::config("empty domain pattern"));
        }
        if let Some(suffix) = s.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains('*') {
                return Err(Error::config(format!("bad wildcard pattern {s:?}")));
            }
            Ok(DomainPattern::Wildcard(suffix.to_string()))
        } else if s.contains('*') {
            Err(Error::config(format!(
                "wildcard only allowed as leading *. in {s:?}"
            )))
        } else {
            Ok(DomainPattern::Exact(s))
        }
    }
}

impl Serialize for DomainPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DomainPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

/// A key in the routing information base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKey {
    Agent(AgentId),
    Cidr(Cidr),
    Domain(DomainPattern),
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKey::Agent(id) => write!(f, "agent:{}", id.short()),
            RouteKey::Cidr(c) => write!(f, "{c}"),
            RouteKey::Domain(d) => write!(f, "{d}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_parse_and_contains() {
        let c: Cidr = "10.9.0.0/16".parse().unwrap();
        assert!(c.contains("10.9.4.2".parse().unwrap()));
        assert!(!c.contains("10.10.0.1".parse().unwrap()));
        assert!(!c.contains("::1".parse().unwrap()));
        assert_eq!(c.to_string(), "10.9.0.0/16");
    }

    #[test]
    fn cidr_canonicalizes_host_bits() {
        let c: Cidr = "192.168.7.33/24".parse().unwrap();
        assert_eq!(c.to_string(), "192.168.7.0/24");
    }

    #[test]
    fn cidr_default_route() {
        let v4: Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(v4.is_default());
        assert!(v4.contains("8.8.8.8".parse().unwrap()));
        let v6: Cidr = "::/0".parse().unwrap();
        assert!(v6.contains("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn cidr_bare_address_is_host_route() {
        let c: Cidr = "127.0.0.1".parse().unwrap();
        assert_eq!(c.prefix(), 32);
        assert!(c.contains("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn cidr_rejects_long_prefix() {
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("::/129".parse::<Cidr>().is_err());
    }

    #[test]
    fn domain_exact_match() {
        let p: DomainPattern = "dns.internal.example".parse().unwrap();
        assert!(p.matches("dns.internal.example"));
        assert!(p.matches("DNS.Internal.Example."));
        assert!(!p.matches("x.dns.internal.example"));
    }

    #[test]
    fn domain_wildcard_match() {
        let p: DomainPattern = "*.internal.example".parse().unwrap();
        assert!(p.matches("dns.internal.example"));
        assert!(p.matches("a.b.internal.example"));
        // The bare suffix is not covered by the wildcard.
        assert!(!p.matches("internal.example"));
        assert!(!p.matches("otherinternal.example"));
    }

    #[test]
    fn domain_rejects_inner_wildcards() {
        assert!("a.*.example".parse::<DomainPattern>().is_err());
        assert!("*".parse::<DomainPattern>().is_err());
        assert!("".parse::<DomainPattern>().is_err());
    }
}
