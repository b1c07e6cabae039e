use anyhow::Context;
use cidr_map::{parse_prefix, CidrSet, IpCidr};
use std::net::IpAddr;
use std::path::Path;

/// Addresses that bypass scoring entirely
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    set: CidrSet,
}

impl Allowlist {
    /// Parse allowlist text: one `address[/len]` per line, `#` starts
    /// a comment, blank lines are ignored.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut set = CidrSet::new();

        for (idx, line) in text.lines().enumerate() {
            let entry = match line.split_once('#') {
                Some((entry, _comment)) => entry,
                None => line,
            }
            .trim();
            if entry.is_empty() {
                continue;
            }

            let cidr = parse_prefix(entry)
                .with_context(|| format!("invalid subnet on line {}", idx + 1))?;
            if set.insert(cidr) {
                tracing::info!("Subnet {cidr} added to allowlist");
            }
        }

        Ok(Self { set })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading allowlist {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("loading allowlist {}", path.display()))
    }

    /// Returns the allowlisted prefix that contains `addr`, if any
    pub fn matches(&self, addr: IpAddr) -> Option<IpCidr> {
        self.set.get_prefix_match(addr)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_with_comments() {
        let allow = Allowlist::parse(
            "# trusted relays\n\
             \n\
             192.0.2.7   # backup mx\n\
             \t10.1.2.3/8\n\
             10.0.0.0/8\n\
             2001:db8::/48\n",
        )
        .unwrap();

        assert_eq!(allow.len(), 3);
        let check = |ip: &str| allow.matches(ip.parse().unwrap()).map(|c| c.to_string());
        assert_eq!(check("192.0.2.7"), Some("192.0.2.7".to_string()));
        assert_eq!(check("192.0.2.8"), None);
        assert_eq!(check("10.9.9.9"), Some("10.0.0.0/8".to_string()));
        assert_eq!(check("2001:db8::25"), Some("2001:db8::/48".to_string()));
    }

    #[test]
    fn invalid_entry_is_fatal() {
        let err = Allowlist::parse("192.0.2.1\n192.0.2.300\n").unwrap_err();
        assert_eq!(
            format!("{err:#}"),
            "invalid subnet on line 2: '192.0.2.300' is not a valid IP address: invalid IP address syntax"
        );
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "198.51.100.0/24 # partner").unwrap();
        let allow = Allowlist::load(file.path()).unwrap();
        assert!(allow.matches("198.51.100.20".parse().unwrap()).is_some());

        let missing = file.path().with_extension("missing");
        assert!(Allowlist::load(&missing).is_err());
    }
}
