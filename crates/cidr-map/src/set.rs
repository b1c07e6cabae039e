use cidr::{IpCidr, IpInet};
use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PrefixParseError {
    #[error("'{candidate}' is not a valid IP address: {reason}")]
    InvalidAddress { candidate: String, reason: String },
    #[error("'{candidate}' has an invalid prefix length '{len}'")]
    InvalidLength { candidate: String, len: String },
}

/// Parse `address[/len]` into a network prefix.
///
/// Unlike `IpCidr::from_str`, host bits beyond the prefix length are
/// silently cleared, so `10.1.2.3/8` yields `10.0.0.0/8`.
/// When no length is given the full host length of the address family
/// is used.
pub fn parse_prefix(s: &str) -> Result<IpCidr, PrefixParseError> {
    let (addr, len) = match s.split_once('/') {
        Some((addr, len)) => (addr, Some(len)),
        None => (s, None),
    };

    let addr: IpAddr = addr
        .parse()
        .map_err(|err: std::net::AddrParseError| PrefixParseError::InvalidAddress {
            candidate: s.to_string(),
            reason: err.to_string(),
        })?;

    let len = match len {
        Some(len) => len.parse::<u8>().map_err(|_| PrefixParseError::InvalidLength {
            candidate: s.to_string(),
            len: len.to_string(),
        })?,
        None => host_length(&addr),
    };

    IpInet::new(addr, len)
        .map(|inet| inet.network())
        .map_err(|_| PrefixParseError::InvalidLength {
            candidate: s.to_string(),
            len: len.to_string(),
        })
}

fn host_length(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// A set of network prefixes that is probed by masking the candidate
/// address once per distinct prefix length present in the set.
///
/// The cost of a lookup is bounded by the number of distinct lengths,
/// not by the number of entries.
#[derive(Debug, Clone, Default)]
pub struct CidrSet {
    entries: HashSet<IpCidr>,
    v4_lengths: BTreeSet<u8>,
    v6_lengths: BTreeSet<u8>,
}

impl CidrSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a prefix. Returns false if an identical prefix was
    /// already present.
    pub fn insert(&mut self, cidr: IpCidr) -> bool {
        let len = cidr.network_length();
        if cidr.is_ipv4() {
            self.v4_lengths.insert(len);
        } else {
            self.v6_lengths.insert(len);
        }
        self.entries.insert(cidr)
    }

    /// Returns the first prefix that contains `ip`, probing the
    /// configured lengths from shortest to longest.
    pub fn get_prefix_match(&self, ip: IpAddr) -> Option<IpCidr> {
        let lengths = match ip {
            IpAddr::V4(_) => &self.v4_lengths,
            IpAddr::V6(_) => &self.v6_lengths,
        };

        for &len in lengths {
            let Ok(inet) = IpInet::new(ip, len) else {
                continue;
            };
            let probe = inet.network();
            if self.entries.contains(&probe) {
                return Some(probe);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl FromIterator<IpCidr> for CidrSet {
    fn from_iter<I: IntoIterator<Item = IpCidr>>(iter: I) -> Self {
        let mut set = Self::new();
        for cidr in iter {
            set.insert(cidr);
        }
        set
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn set_of(entries: &[&str]) -> CidrSet {
        entries.iter().map(|e| parse_prefix(e).unwrap()).collect()
    }

    #[test]
    fn parse_clears_host_bits() {
        assert_eq!(
            parse_prefix("10.1.2.3/8").unwrap().to_string(),
            "10.0.0.0/8"
        );
        assert_eq!(parse_prefix("192.0.2.1").unwrap().network_length(), 32);
        assert_eq!(parse_prefix("2001:db8::1").unwrap().network_length(), 128);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            parse_prefix("nope/24").unwrap_err().to_string(),
            "'nope/24' is not a valid IP address: invalid IP address syntax"
        );
        assert_eq!(
            parse_prefix("10.0.0.0/33").unwrap_err().to_string(),
            "'10.0.0.0/33' has an invalid prefix length '33'"
        );
        assert_eq!(
            parse_prefix("10.0.0.0/x").unwrap_err(),
            PrefixParseError::InvalidLength {
                candidate: "10.0.0.0/x".to_string(),
                len: "x".to_string(),
            }
        );
    }

    #[test]
    fn dedup_by_exact_prefix() {
        let mut set = CidrSet::new();
        assert!(set.insert(parse_prefix("192.168.1.0/24").unwrap()));
        // Same network once host bits are cleared
        assert!(!set.insert(parse_prefix("192.168.1.77/24").unwrap()));
        assert!(set.insert(parse_prefix("192.168.1.77").unwrap()));
        assert_eq!(set.len(), 2);
        assert_eq!(set.v4_lengths.iter().copied().collect::<Vec<_>>(), vec![24, 32]);
        assert!(set.v6_lengths.is_empty());
    }

    #[test]
    fn lookup() {
        let set = set_of(&[
            "127.0.0.1",
            "::1",
            "192.168.1.0/24",
            "10.0.0.0/8",
            "2001:db8::/32",
        ]);

        let get = |ip: &str| set.get_prefix_match(ip.parse().unwrap()).map(|c| c.to_string());

        assert_eq!(get("127.0.0.1"), Some("127.0.0.1".to_string()));
        assert_eq!(get("127.0.0.2"), None);
        assert_eq!(get("192.168.1.200"), Some("192.168.1.0/24".to_string()));
        assert_eq!(get("192.168.2.1"), None);
        assert_eq!(get("10.200.3.4"), Some("10.0.0.0/8".to_string()));
        assert_eq!(get("::1"), Some("::1".to_string()));
        assert_eq!(get("2001:db8:ffff::5"), Some("2001:db8::/32".to_string()));
        assert_eq!(get("2001:db9::5"), None);
    }

    #[test]
    fn empty_set_never_matches() {
        let set = CidrSet::new();
        assert_eq!(set.len(), 0);
        assert_eq!(set.get_prefix_match("1.2.3.4".parse().unwrap()), None);
    }
}
