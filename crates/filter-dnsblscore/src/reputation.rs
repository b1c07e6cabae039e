use crate::allowlist::Allowlist;
use crate::config::MAX_SCORE;
use dns_resolver::Resolver;
use futures::future::join_all;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// Where scores come from
pub enum ReputationSource {
    /// Query each list domain and count the ones that list the address
    Dns {
        resolver: Arc<dyn Resolver>,
        domains: Vec<String>,
    },
    /// Use the last octet of the address as its score; `.255`
    /// simulates an address with no data
    Synthetic,
}

/// The name to query for `addr` on the list served at `zone`
pub fn dnsbl_query_name(addr: Ipv4Addr, zone: &str) -> String {
    let [a, b, c, d] = addr.octets();
    format!("{d}.{c}.{b}.{a}.{zone}")
}

impl ReputationSource {
    pub async fn score(&self, addr: Ipv4Addr) -> Option<u8> {
        match self {
            Self::Synthetic => match addr.octets()[3] {
                255 => None,
                last => Some(last.min(MAX_SCORE)),
            },
            Self::Dns { resolver, domains } => {
                let lookups = domains.iter().map(|zone| {
                    let name = dnsbl_query_name(addr, zone);
                    async move {
                        match resolver.resolve_ip(&name).await {
                            Ok(addrs) => !addrs.is_empty(),
                            Err(err) => {
                                tracing::debug!("{name}: {err:#}");
                                false
                            }
                        }
                    }
                });
                let hits = join_all(lookups).await.into_iter().filter(|hit| *hit).count();
                Some(hits.min(MAX_SCORE as usize) as u8)
            }
        }
    }
}

/// Extract the IPv4 address from the `address:port` peer text of a
/// link-connect event. Anything else, including IPv6 and unix
/// sockets, yields None.
pub fn peer_ipv4(peer: &str) -> Option<Ipv4Addr> {
    let host = peer.split(':').next()?;
    host.parse().ok()
}

pub struct Scorer {
    allowlist: Allowlist,
    source: ReputationSource,
}

impl Scorer {
    pub fn new(allowlist: Allowlist, source: ReputationSource) -> Self {
        Self { allowlist, source }
    }

    /// Score the connecting peer. Unknown when the peer isn't IPv4.
    pub async fn score_peer(&self, peer: &str) -> Option<u8> {
        let addr = peer_ipv4(peer)?;

        let score = match self.allowlist.matches(IpAddr::V4(addr)) {
            Some(subnet) => {
                tracing::info!("IP address {addr} matches allowlisted subnet {subnet}");
                Some(0)
            }
            None => self.source.score(addr).await,
        };

        match score {
            Some(score) => tracing::info!("link-connect addr={addr} score={score}"),
            None => tracing::info!("link-connect addr={addr} score=-1"),
        }
        score
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use dns_resolver::TestResolver;

    fn dns_source(resolver: TestResolver, domains: &[&str]) -> ReputationSource {
        ReputationSource::Dns {
            resolver: Arc::new(resolver),
            domains: domains.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn query_name() {
        assert_eq!(
            dnsbl_query_name(Ipv4Addr::new(192, 0, 2, 99), "zen.example"),
            "99.2.0.192.zen.example"
        );
    }

    #[test]
    fn peer_addresses() {
        assert_eq!(peer_ipv4("1.2.3.4:33174"), Some(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(peer_ipv4("1.2.3.4"), Some(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(peer_ipv4("[2001:db8::1]:25"), None);
        assert_eq!(peer_ipv4("2001:db8::1"), None);
        assert_eq!(peer_ipv4("unix:/var/run/smtpd.sock"), None);
        assert_eq!(peer_ipv4(""), None);
    }

    #[tokio::test]
    async fn synthetic_scores() {
        let source = ReputationSource::Synthetic;
        assert_eq!(source.score(Ipv4Addr::new(1, 2, 3, 0)).await, Some(0));
        assert_eq!(source.score(Ipv4Addr::new(1, 2, 3, 4)).await, Some(4));
        assert_eq!(source.score(Ipv4Addr::new(1, 2, 3, 127)).await, Some(127));
        assert_eq!(source.score(Ipv4Addr::new(1, 2, 3, 200)).await, Some(127));
        assert_eq!(source.score(Ipv4Addr::new(1, 2, 3, 255)).await, None);
    }

    #[tokio::test]
    async fn dns_counts_listing_domains() {
        let listed: IpAddr = "127.0.0.2".parse().unwrap();
        let resolver = TestResolver::default()
            .with_ip("4.3.2.1.one.example", listed)
            .with_ip("4.3.2.1.three.example", listed);
        let source = dns_source(resolver, &["one.example", "two.example", "three.example"]);

        assert_eq!(source.score(Ipv4Addr::new(1, 2, 3, 4)).await, Some(2));
        assert_eq!(source.score(Ipv4Addr::new(5, 6, 7, 8)).await, Some(0));
    }

    #[tokio::test]
    async fn allowlist_wins_and_skips_lookups() {
        let resolver = Arc::new(
            TestResolver::default().with_ip("4.3.2.1.one.example", "127.0.0.2".parse().unwrap()),
        );
        let source = ReputationSource::Dns {
            resolver: resolver.clone(),
            domains: vec!["one.example".to_string()],
        };
        let scorer = Scorer::new(Allowlist::parse("1.2.3.0/24").unwrap(), source);

        assert_eq!(scorer.score_peer("1.2.3.4:25").await, Some(0));
        assert!(resolver.queries().is_empty());

        assert_eq!(scorer.score_peer("9.9.9.9:25").await, Some(0));
        assert_eq!(resolver.queries(), vec!["9.9.9.9.one.example.".to_string()]);
    }

    #[tokio::test]
    async fn ipv6_is_never_scored() {
        let resolver = Arc::new(TestResolver::default());
        let source = ReputationSource::Dns {
            resolver: resolver.clone(),
            domains: vec!["one.example".to_string()],
        };
        let scorer = Scorer::new(Allowlist::parse("::/0").unwrap(), source);
        assert_eq!(scorer.score_peer("[2001:db8::1]:25").await, None);
        assert!(resolver.queries().is_empty());
    }
}
