//! URL safety gate: scheme, host policy and resolved-address checks.
//!
//! Every URL the fetcher contacts, including each redirect hop, goes through
//! [`SafetyGate::check_url`] first. The returned [`Target`] carries the exact
//! addresses that passed classification so the connection can be pinned to
//! them.

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::{Host, Url};

use super::address::is_blocked;
use crate::config::{HostList, UnfurlConfig};
use crate::error::UnfurlError;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no such host")]
    NoRecords,
    #[error(transparent)]
    Failed(#[from] std::io::Error),
}

/// DNS lookup for A and AAAA records.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(addrs) => Ok(addrs.map(|a| a.ip()).collect()),
            Err(e) if is_no_such_host(&e) => Err(ResolveError::NoRecords),
            Err(e) => Err(ResolveError::Failed(e)),
        }
    }
}

/// std surfaces `EAI_NONAME`/`EAI_NODATA` only through the message text.
fn is_no_such_host(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::NotFound {
        return true;
    }
    let msg = err.to_string().to_ascii_lowercase();
    [
        "name or service not known",
        "no address associated",
        "nodename nor servname",
        "no such host",
    ]
    .iter()
    .any(|needle| msg.contains(needle))
}

/// A URL that passed every gate check.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: Url,
    pub host: String,
    pub addrs: Vec<IpAddr>,
}

pub struct SafetyGate {
    allow_hosts: HostList,
    deny_hosts: HostList,
    allow_private_addresses: bool,
    timeout: Duration,
    resolver: Arc<dyn Resolver>,
}

impl SafetyGate {
    pub fn new(config: &UnfurlConfig, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            allow_hosts: config.allow_hosts.clone(),
            deny_hosts: config.deny_hosts.clone(),
            allow_private_addresses: config.allow_private_addresses,
            timeout: config.timeout,
            resolver,
        }
    }

    /// Validate a raw, caller-supplied URL string.
    pub async fn check(&self, raw: &str) -> Result<Target, UnfurlError> {
        let url = Url::parse(raw.trim()).map_err(|e| UnfurlError::InvalidUrl(e.to_string()))?;
        self.check_url(url).await
    }

    pub async fn check_url(&self, url: Url) -> Result<Target, UnfurlError> {
        // The parser lower-cases schemes.
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(UnfurlError::UnsupportedScheme(other.to_string())),
        }

        let host = url
            .host()
            .ok_or_else(|| UnfurlError::InvalidUrl("URL has no host".to_string()))?;
        let host_name = match &host {
            Host::Domain(domain) => domain.to_string(),
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => ip.to_string(),
        };

        if self.deny_hosts.matches(&host_name) {
            return Err(UnfurlError::HostDenied(host_name));
        }
        if !self.allow_hosts.is_empty() && !self.allow_hosts.matches(&host_name) {
            return Err(UnfurlError::HostNotAllowed(host_name));
        }

        let mut addrs = match host {
            Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
            Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
            Host::Domain(domain) => self.resolve(domain).await?,
        };
        addrs.sort();
        addrs.dedup();

        if addrs.is_empty() {
            return Err(UnfurlError::Unresolvable(host_name));
        }

        if !self.allow_private_addresses && addrs.iter().any(|ip| is_blocked(*ip)) {
            return Err(UnfurlError::BlockedAddress {
                host: host_name,
                addrs,
            });
        }

        debug!("Target {} resolved to {:?}", host_name, addrs);

        Ok(Target {
            url,
            host: host_name,
            addrs,
        })
    }

    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, UnfurlError> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.resolve(domain))
            .await
            .map_err(|_| UnfurlError::Timeout)?;

        match lookup {
            Ok(addrs) => Ok(addrs),
            Err(ResolveError::NoRecords) => Ok(Vec::new()),
            Err(ResolveError::Failed(e)) => Err(anyhow::Error::new(e)
                .context(format!("DNS lookup failed for {domain}"))
                .into()),
        }
    }
}

/// In-memory resolver for tests.
#[cfg(test)]
pub(crate) struct StaticResolver {
    records: std::collections::HashMap<String, Vec<IpAddr>>,
}

#[cfg(test)]
impl StaticResolver {
    pub(crate) fn new(records: &[(&str, &[&str])]) -> Arc<Self> {
        let records = records
            .iter()
            .map(|(host, ips)| {
                let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
                (host.to_string(), ips)
            })
            .collect();
        Arc::new(Self { records })
    }
}

#[cfg(test)]
#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        self.records
            .get(host)
            .cloned()
            .ok_or(ResolveError::NoRecords)
    }
}
