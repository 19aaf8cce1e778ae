//! DNS resolution for outbound requests.
//!
//! Target validation sees only the host name. [`GuardedResolver`] checks every
//! address a name resolves to at connect time, so names pointing at internal
//! addresses (`127.0.0.1.nip.io`, rebinding records) never get a connection.
//! A refused name surfaces as [`RestrictedAddress`] in the transport error
//! chain, which the proxy maps back to a policy denial.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;
use tracing::warn;

use crate::security::is_restricted_ip;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type LookupFuture = Pin<Box<dyn Future<Output = io::Result<Vec<SocketAddr>>> + Send>>;
type Lookup = dyn Fn(String) -> LookupFuture + Send + Sync;

/// A host name resolved to an address the gateway must not reach.
#[derive(Debug, Error)]
#[error("{host} resolves to restricted address {ip}")]
pub struct RestrictedAddress {
    pub host: String,
    pub ip: IpAddr,
}

/// Resolver that refuses names with any restricted address.
#[derive(Clone)]
pub struct GuardedResolver {
    lookup: Arc<Lookup>,
}

impl GuardedResolver {
    /// Resolves through the system resolver.
    pub fn new() -> Self {
        Self::with_lookup(system_lookup)
    }

    /// Resolves through `lookup` instead of the system resolver.
    pub fn with_lookup<F, Fut>(lookup: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<Vec<SocketAddr>>> + Send + 'static,
    {
        Self {
            lookup: Arc::new(move |host| Box::pin(lookup(host)) as LookupFuture),
        }
    }

    /// Resolves `host`, failing if any address is restricted.
    pub async fn resolve_host(&self, host: &str) -> Result<Vec<SocketAddr>, BoxError> {
        let addrs = (self.lookup)(host.to_string()).await?;
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {host}"),
            )
            .into());
        }
        screen(host, &addrs)?;
        Ok(addrs)
    }
}

impl Default for GuardedResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GuardedResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedResolver").finish_non_exhaustive()
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs = resolver.resolve_host(&host).await?;
            Ok::<Addrs, BoxError>(Box::new(addrs.into_iter()))
        })
    }
}

/// Fails on the first restricted address among `addrs`.
pub fn screen(host: &str, addrs: &[SocketAddr]) -> Result<(), RestrictedAddress> {
    match addrs.iter().map(SocketAddr::ip).find(is_restricted_ip) {
        Some(ip) => {
            warn!(host, %ip, "Refusing to connect: name resolves to a restricted address");
            Err(RestrictedAddress {
                host: host.to_string(),
                ip,
            })
        }
        None => Ok(()),
    }
}

async fn system_lookup(host: String) -> io::Result<Vec<SocketAddr>> {
    Ok(tokio::net::lookup_host((host.as_str(), 0)).await?.collect())
}

/// Finds a [`RestrictedAddress`] anywhere in an error's source chain.
pub fn find_restricted<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a RestrictedAddress> {
    let mut current = Some(err);
    while let Some(cause) = current {
        if let Some(found) = cause.downcast_ref::<RestrictedAddress>() {
            return Some(found);
        }
        if let Some(found) = cause
            .downcast_ref::<io::Error>()
            .and_then(io::Error::get_ref)
            .and_then(|inner| inner.downcast_ref::<RestrictedAddress>())
        {
            return Some(found);
        }
        current = cause.source();
    }
    None
}
