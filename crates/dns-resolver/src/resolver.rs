use crate::{fully_qualify, Resolver};
use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use std::net::IpAddr;
use std::time::Duration;

/// Resolves names using the system resolver configuration
pub struct HickoryResolver {
    inner: TokioResolver,
}

impl HickoryResolver {
    pub fn from_system_conf() -> anyhow::Result<Self> {
        let inner = TokioResolver::builder_tokio()?.build();
        Ok(Self { inner })
    }

    /// Like `from_system_conf`, but overriding the per-query timeout
    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        let mut builder = TokioResolver::builder_tokio()?;
        builder.options_mut().timeout = timeout;
        Ok(Self {
            inner: builder.build(),
        })
    }
}

#[async_trait]
impl Resolver for HickoryResolver {
    async fn resolve_ip(&self, name: &str) -> anyhow::Result<Vec<IpAddr>> {
        let name = fully_qualify(name);
        let lookup = self.inner.lookup_ip(name.as_str()).await?;
        let addrs: Vec<IpAddr> = lookup.iter().collect();
        tracing::trace!("{name} resolved to {addrs:?}");
        Ok(addrs)
    }
}
