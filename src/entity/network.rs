//! Pod Network Ranges
//!
//! IPv4 CIDR blocks and inclusive address ranges used to validate pod
//! registration and detect overlapping sibling pools.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;

// =============================================================================
// CIDR
// =============================================================================

/// An IPv4 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// Build a CIDR, rejecting host bits set outside the prefix
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(Error::InvalidArgument(format!(
                "prefix length {} exceeds 32",
                prefix_len
            )));
        }
        let cidr = Self { network, prefix_len };
        if u32::from(network) & !cidr.mask() != 0 {
            return Err(Error::InvalidArgument(format!(
                "{}/{} has host bits set",
                network, prefix_len
            )));
        }
        Ok(cidr)
    }

    #[inline]
    fn mask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix_len as u32)
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Last address of the block
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !self.mask())
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == u32::from(self.network)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| Error::InvalidArgument(format!("cidr missing prefix: {}", s)))?;
        let network = parse_addr(addr)?;
        let prefix_len = prefix
            .parse::<u8>()
            .map_err(|_| Error::InvalidArgument(format!("invalid prefix length: {}", prefix)))?;
        Self::new(network, prefix_len)
    }
}

impl std::fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

// =============================================================================
// IP Range
// =============================================================================

/// Inclusive, non-empty IPv4 address range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpRange {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

impl IpRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidArgument(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    pub fn end(&self) -> Ipv4Addr {
        self.end
    }

    /// Number of addresses in the range
    pub fn size(&self) -> u64 {
        u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.start <= addr && addr <= self.end
    }

    pub fn overlaps(&self, other: &IpRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl std::fmt::Display for IpRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// =============================================================================
// Pod Network
// =============================================================================

/// Validated network layout of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodNetwork {
    pub gateway: Ipv4Addr,
    pub cidr: Ipv4Cidr,
    pub range: IpRange,
}

impl PodNetwork {
    /// Parse and validate the textual pod network parameters
    pub fn parse(gateway: &str, cidr: &str, start_ip: &str, end_ip: &str) -> Result<Self> {
        let gateway = parse_addr(gateway)?;
        let cidr: Ipv4Cidr = cidr.parse()?;
        let range = IpRange::new(parse_addr(start_ip)?, parse_addr(end_ip)?)?;

        if !cidr.contains(range.start()) || !cidr.contains(range.end()) {
            return Err(Error::InvalidArgument(format!(
                "range {} is not within {}",
                range, cidr
            )));
        }
        if !cidr.contains(gateway) {
            return Err(Error::InvalidArgument(format!(
                "gateway {} is not within {}",
                gateway, cidr
            )));
        }
        if range.contains(gateway) {
            return Err(Error::InvalidArgument(format!(
                "gateway {} lies inside range {}",
                gateway, range
            )));
        }

        Ok(Self { gateway, cidr, range })
    }
}

fn parse_addr(s: &str) -> Result<Ipv4Addr> {
    s.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| Error::InvalidArgument(format!("invalid IPv4 address: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_cidr_parse_and_contains() {
        let cidr: Ipv4Cidr = "10.1.0.0/24".parse().unwrap();
        assert!(cidr.contains("10.1.0.17".parse().unwrap()));
        assert!(!cidr.contains("10.1.1.1".parse().unwrap()));
        assert_eq!(cidr.broadcast(), Ipv4Addr::new(10, 1, 0, 255));
        assert_eq!(cidr.to_string(), "10.1.0.0/24");
    }

    #[test]
    fn test_cidr_rejects_host_bits_and_bad_prefix() {
        assert!("10.1.0.5/24".parse::<Ipv4Cidr>().is_err());
        assert!("10.1.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.1.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("0.0.0.0/0".parse::<Ipv4Cidr>().is_ok());
    }

    #[test]
    fn test_range_overlap() {
        let a = IpRange::new(Ipv4Addr::new(10, 0, 0, 10), Ipv4Addr::new(10, 0, 0, 20)).unwrap();
        let b = IpRange::new(Ipv4Addr::new(10, 0, 0, 20), Ipv4Addr::new(10, 0, 0, 30)).unwrap();
        let c = IpRange::new(Ipv4Addr::new(10, 0, 0, 21), Ipv4Addr::new(10, 0, 0, 30)).unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert_eq!(a.size(), 11);
    }

    #[test]
    fn test_range_single_address_is_valid() {
        let addr = Ipv4Addr::new(192, 168, 1, 1);
        assert_eq!(IpRange::new(addr, addr).unwrap().size(), 1);
    }

    #[test]
    fn test_pod_network_validation() {
        let net = PodNetwork::parse("10.0.0.1", "10.0.0.0/24", "10.0.0.10", "10.0.0.100").unwrap();
        assert_eq!(net.range.size(), 91);

        assert_matches!(
            PodNetwork::parse("10.0.0.1", "10.0.0.0/24", "10.0.0.100", "10.0.0.10"),
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            PodNetwork::parse("10.0.0.1", "10.0.0.0/24", "10.0.0.10", "10.0.1.10"),
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            PodNetwork::parse("10.0.0.50", "10.0.0.0/24", "10.0.0.10", "10.0.0.100"),
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            PodNetwork::parse("10.9.0.1", "10.0.0.0/24", "10.0.0.10", "10.0.0.100"),
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            PodNetwork::parse("gateway", "10.0.0.0/24", "10.0.0.10", "10.0.0.100"),
            Err(Error::InvalidArgument(_))
        );
    }
}
