//! Source allow-list for the OutSim socket.
//!
//! Entries are single IP addresses or CIDR ranges; blank entries are
//! ignored. A list that trims down to nothing is a configuration error
//! rather than an accept-all.

use crate::OutSimError;
use std::net::IpAddr;

/// One allowed address or network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    /// Parse `"a.b.c.d"`, `"a.b.c.d/n"` or their IPv6 equivalents.
    pub fn parse(entry: &str) -> Result<Self, OutSimError> {
        let entry = entry.trim();
        let (addr_part, prefix_part) = match entry.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (entry, None),
        };
        let network: IpAddr = addr_part
            .parse()
            .map_err(|_| OutSimError::Config(format!("invalid source address `{entry}`")))?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix_part {
            Some(raw) => {
                let value: u8 = raw.parse().map_err(|_| {
                    OutSimError::Config(format!("invalid prefix length in `{entry}`"))
                })?;
                if value > max_prefix {
                    return Err(OutSimError::Config(format!(
                        "prefix length {value} too large in `{entry}`"
                    )));
                }
                value
            }
            None => max_prefix,
        };
        Ok(Self { network, prefix })
    }

    /// Whether `ip` lies inside this range. Mixed address families never
    /// match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(network), IpAddr::V4(candidate)) => {
                if self.prefix == 0 {
                    return true;
                }
                let shift = 32 - u32::from(self.prefix);
                (u32::from(network) >> shift) == (u32::from(candidate) >> shift)
            }
            (IpAddr::V6(network), IpAddr::V6(candidate)) => {
                if self.prefix == 0 {
                    return true;
                }
                let shift = 128 - u32::from(self.prefix);
                (u128::from(network) >> shift) == (u128::from(candidate) >> shift)
            }
            _ => false,
        }
    }
}

/// Ordered allow-list built from the configuration entries.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    ranges: Vec<IpRange>,
}

impl SourceFilter {
    /// Build a filter from config entries, skipping blanks. An effectively
    /// empty list is rejected: it would silently drop all telemetry.
    pub fn parse(entries: &[String]) -> Result<Self, OutSimError> {
        let mut ranges = Vec::new();
        for entry in entries {
            if entry.trim().is_empty() {
                continue;
            }
            ranges.push(IpRange::parse(entry)?);
        }
        if ranges.is_empty() {
            return Err(OutSimError::Config(
                "allowed_sources contains no usable entries".to_string(),
            ));
        }
        Ok(Self { ranges })
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn ip(text: &str) -> Result<IpAddr, std::net::AddrParseError> {
        text.parse()
    }

    #[test]
    fn single_address_matches_exactly() -> TestResult {
        let range = IpRange::parse("192.168.1.5")?;
        assert!(range.contains(ip("192.168.1.5")?));
        assert!(!range.contains(ip("192.168.1.6")?));
        Ok(())
    }

    #[test]
    fn cidr_matches_the_network() -> TestResult {
        let range = IpRange::parse("10.0.0.0/8")?;
        assert!(range.contains(ip("10.200.3.4")?));
        assert!(!range.contains(ip("11.0.0.1")?));
        Ok(())
    }

    #[test]
    fn zero_prefix_matches_everything() -> TestResult {
        let range = IpRange::parse("0.0.0.0/0")?;
        assert!(range.contains(ip("255.255.255.255")?));
        assert!(range.contains(ip("1.2.3.4")?));
        Ok(())
    }

    #[test]
    fn families_never_cross_match() -> TestResult {
        let range = IpRange::parse("127.0.0.1")?;
        assert!(!range.contains(ip("::1")?));
        Ok(())
    }

    #[test]
    fn ipv6_ranges_work() -> TestResult {
        let range = IpRange::parse("fd00::/8")?;
        assert!(range.contains(ip("fd12:3456::1")?));
        assert!(!range.contains(ip("fe80::1")?));
        Ok(())
    }

    #[test]
    fn bad_entries_are_config_errors() {
        assert!(IpRange::parse("not-an-ip").is_err());
        assert!(IpRange::parse("10.0.0.0/33").is_err());
        assert!(IpRange::parse("10.0.0.0/x").is_err());
    }

    #[test]
    fn filter_skips_blank_entries() -> TestResult {
        let filter = SourceFilter::parse(&[
            String::new(),
            "  ".to_string(),
            "127.0.0.1".to_string(),
        ])?;
        assert!(filter.allows(ip("127.0.0.1")?));
        assert!(!filter.allows(ip("127.0.0.2")?));
        Ok(())
    }

    #[test]
    fn all_blank_list_is_rejected() {
        let result = SourceFilter::parse(&[String::new(), " ".to_string()]);
        assert!(matches!(result, Err(OutSimError::Config(_))));
    }

    #[test]
    fn any_matching_range_allows() -> TestResult {
        let filter = SourceFilter::parse(&[
            "192.168.0.0/16".to_string(),
            "10.1.2.3".to_string(),
        ])?;
        assert!(filter.allows(ip("192.168.55.1")?));
        assert!(filter.allows(ip("10.1.2.3")?));
        assert!(!filter.allows(ip("10.1.2.4")?));
        Ok(())
    }
}
