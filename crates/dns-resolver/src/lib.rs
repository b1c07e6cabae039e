use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex as StdMutex;
use thiserror::Error;

mod resolver;

pub use resolver::HickoryResolver;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no records found for {0}")]
    NoRecords(String),
}

/// Normalize a name so that it is treated as fully qualified:
/// lowercased and terminated by a `.`
pub fn fully_qualify(name: &str) -> String {
    let mut name = name.to_ascii_lowercase();
    if !name.ends_with('.') {
        name.push('.');
    }
    name
}

#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Resolve the A and AAAA records for `name`.
    /// A name that doesn't exist, or that has no address records,
    /// is reported as an error.
    async fn resolve_ip(&self, name: &str) -> anyhow::Result<Vec<IpAddr>>;
}

/// An in-memory resolver for tests
#[derive(Debug, Default)]
pub struct TestResolver {
    records: HashMap<String, Vec<IpAddr>>,
    queries: StdMutex<Vec<String>>,
}

impl TestResolver {
    pub fn with_ip(mut self, name: &str, addr: IpAddr) -> Self {
        self.records
            .entry(fully_qualify(name))
            .or_default()
            .push(addr);
        self
    }

    /// The fully qualified names that have been queried, in order
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Resolver for TestResolver {
    async fn resolve_ip(&self, name: &str) -> anyhow::Result<Vec<IpAddr>> {
        let name = fully_qualify(name);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(name.clone());
        }
        match self.records.get(&name) {
            Some(addrs) if !addrs.is_empty() => Ok(addrs.clone()),
            _ => Err(LookupError::NoRecords(name).into()),
        }
    }
}
