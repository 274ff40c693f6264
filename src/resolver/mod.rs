//! DNS lookups and resolution of RPC targets.
//!
//! [`resolve_target`] does what an RPC client's DNS resolver does for a
//! target name: it looks up the backends' addresses, the grpclb balancers
//! published as SRV records, and the service config published as a TXT
//! record.

use crate::{
    record::{SrvRecord, SrvTarget},
    records::txt::join_service_config,
    service_config::{self, ClientIdentity},
};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use rand::Rng;
use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

pub mod hickory;

/// Port used when a target doesn't name one.
pub const DEFAULT_PORT: u16 = 443;

/// Prefix of the SRV name publishing a host's grpclb balancers.
pub const GRPCLB_SRV_PREFIX: &str = "_grpclb._tcp.";

/// Prefix of the TXT name publishing a host's service config.
pub const SERVICE_CONFIG_TXT_PREFIX: &str = "_grpc_config.";

/// Represents the ability to look up the record types a resolver needs.
///
/// Names that don't exist and names without records of the requested type
/// both produce an empty list rather than an error.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// Errors encountered during lookups.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Gets the IPv4 and IPv6 addresses of a host.
    async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>, Self::Error>;

    /// Gets the SRV records at a name, unordered.
    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, Self::Error>;

    /// Gets the TXT records at a name, each as its list of strings.
    async fn lookup_txt(&self, name: &str) -> Result<Vec<Vec<Vec<u8>>>, Self::Error>;

    /// Sorts SRV records by priority and weight per RFC 2782.
    fn order_srv_records(records: &mut [SrvTarget], mut rng: impl Rng)
    where
        Self: Sized,
    {
        records.sort_by_cached_key(|record| record.sort_key(&mut rng));
    }
}

/// Errors encountered while resolving a target.
#[derive(Debug, thiserror::Error)]
pub enum ResolveTargetError<Lookup: fmt::Debug> {
    /// Lookup errors.
    #[error("lookup of {name} failed: {source}")]
    Lookup {
        /// Name being looked up.
        name: String,
        /// Underlying error.
        source: Lookup,
    },
    /// The target is not `host[:port]`.
    #[error("invalid target {0:?}")]
    InvalidTarget(String),
    /// Neither backends nor balancers were found.
    #[error("no addresses found for {0}")]
    NoAddresses(String),
}

/// What to look up besides the host's own addresses.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Look up grpclb balancers.
    pub enable_srv: bool,
    /// Look up the service config.
    pub enable_txt: bool,
    /// Client the service config is chosen for.
    pub client: ClientIdentity,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            enable_srv: true,
            enable_txt: true,
            client: ClientIdentity::default(),
        }
    }
}

/// One resolved address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedAddress {
    /// Address and port.
    pub addr: SocketAddr,
    /// Whether the address is a grpclb balancer rather than a backend.
    pub is_balancer: bool,
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.addr, self.is_balancer)
    }
}

/// Result of resolving a target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Backends followed by balancers.
    pub addresses: Vec<ResolvedAddress>,
    /// Chosen service config as compact JSON, if any.
    pub service_config: Option<String>,
    /// Load balancing policy named by the chosen service config.
    pub lb_policy: Option<String>,
}

/// Splits a target into host and port, defaulting the port to
/// [`DEFAULT_PORT`]. IPv6 literals must be bracketed when a port is given.
///
/// ```
/// use resolver_testbed::resolver::split_host_port;
/// assert_eq!(split_host_port("foo.test:1234"), Some(("foo.test", 1234)));
/// assert_eq!(split_host_port("foo.test"), Some(("foo.test", 443)));
/// assert_eq!(split_host_port("[::1]:80"), Some(("::1", 80)));
/// assert_eq!(split_host_port("::1"), Some(("::1", 443)));
/// ```
pub fn split_host_port(target: &str) -> Option<(&str, u16)> {
    if let Some(rest) = target.strip_prefix('[') {
        let (host, rest) = rest.split_once(']')?;
        return match rest {
            "" => Some((host, DEFAULT_PORT)),
            _ => Some((host, rest.strip_prefix(':')?.parse().ok()?)),
        };
    }
    match target.rsplit_once(':') {
        // More than one colon is a bare IPv6 literal
        Some((host, _)) if host.contains(':') => Some((target, DEFAULT_PORT)),
        Some((host, port)) if !host.is_empty() => Some((host, port.parse().ok()?)),
        Some(_) => None,
        None if target.is_empty() => None,
        None => Some((target, DEFAULT_PORT)),
    }
}

fn lookup_failed<E: fmt::Debug>(name: &str) -> impl FnOnce(E) -> ResolveTargetError<E> {
    let name = name.to_string();
    move |source| ResolveTargetError::Lookup { name, source }
}

/// Resolves `target` the way an RPC client's DNS resolver would.
pub async fn resolve_target<L: DnsLookup>(
    lookup: &L,
    target: &str,
    options: &ResolveOptions,
) -> Result<Resolution, ResolveTargetError<L::Error>> {
    let (host, port) = split_host_port(target)
        .ok_or_else(|| ResolveTargetError::InvalidTarget(target.to_string()))?;

    let mut addresses: Vec<ResolvedAddress> = match host.parse::<IpAddr>() {
        Ok(ip) => vec![ResolvedAddress {
            addr: SocketAddr::new(ip, port),
            is_balancer: false,
        }],
        Err(_) => lookup
            .lookup_ips(host)
            .await
            .map_err(lookup_failed(host))?
            .into_iter()
            .map(|ip| ResolvedAddress {
                addr: SocketAddr::new(ip, port),
                is_balancer: false,
            })
            .collect(),
    };
    #[cfg(feature = "log")]
    tracing::debug!(host, backends = addresses.len(), "resolved backends");

    if options.enable_srv {
        let srv_name = format!("{GRPCLB_SRV_PREFIX}{host}");
        let mut balancers = lookup
            .lookup_srv(&srv_name)
            .await
            .map_err(lookup_failed(&srv_name))?;
        L::order_srv_records(&mut balancers, rand::rng());
        let balancer_ips = try_join_all(balancers.iter().map(|balancer| async move {
            lookup
                .lookup_ips(&balancer.target)
                .await
                .map_err(lookup_failed(&balancer.target))
        }))
        .await?;
        for (balancer, ips) in balancers.iter().zip(balancer_ips) {
            #[cfg(feature = "log")]
            tracing::debug!(
                balancer = %balancer.authority(),
                addresses = ips.len(),
                "resolved balancer"
            );
            addresses.extend(ips.into_iter().map(|ip| ResolvedAddress {
                addr: SocketAddr::new(ip, balancer.port()),
                is_balancer: true,
            }));
        }
    }

    if addresses.is_empty() {
        return Err(ResolveTargetError::NoAddresses(target.to_string()));
    }

    let mut resolution = Resolution {
        addresses,
        ..Resolution::default()
    };
    if options.enable_txt {
        let txt_name = format!("{SERVICE_CONFIG_TXT_PREFIX}{host}");
        let records = lookup
            .lookup_txt(&txt_name)
            .await
            .map_err(lookup_failed(&txt_name))?;
        if let Some(choices) = join_service_config(&records) {
            match service_config::choose(&choices, &options.client, &mut rand::rng()) {
                Ok(Some(chosen)) => {
                    resolution.lb_policy = chosen.lb_policy();
                    resolution.service_config = Some(chosen.json());
                }
                Ok(None) => {}
                Err(_e) => {
                    #[cfg(feature = "log")]
                    tracing::warn!(name = %txt_name, error = %_e, "ignoring service config");
                }
            }
        }
    }
    Ok(resolution)
}
