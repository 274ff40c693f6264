//! Expected resolution results and comparison against actual ones.

use crate::resolver::{Resolution, ResolvedAddress};
use std::{collections::BTreeMap, fmt, net::SocketAddr};

/// Errors encountered while parsing expected addresses.
#[derive(Debug, thiserror::Error)]
pub enum ParseExpectationError {
    /// An entry lacks the `,is_balancer` suffix.
    #[error("expected address entry {0:?} is not of the form ADDR:PORT,IS_BALANCER")]
    MissingFlag(String),
    /// An entry's address isn't `ip:port`.
    #[error("bad address {addr:?} in expected addresses: {source}")]
    Address {
        /// The offending address.
        addr: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },
    /// An entry's balancer flag isn't `true` or `false`.
    #[error("bad balancer flag {0:?} in expected addresses")]
    Flag(String),
}

/// Parses `"ip:port,is_balancer;..."` into addresses. The flag is
/// case-insensitive and IPv6 addresses are bracketed.
///
/// ```
/// use resolver_testbed::expect::parse_expected_addrs;
/// let addrs = parse_expected_addrs("1.2.3.4:1234,True;[2607:f8b0:400a:801::1002]:443,false")?;
/// assert_eq!(addrs.len(), 2);
/// assert!(addrs[0].is_balancer);
/// assert!(!addrs[1].is_balancer);
/// # Ok::<(), resolver_testbed::expect::ParseExpectationError>(())
/// ```
pub fn parse_expected_addrs(s: &str) -> Result<Vec<ResolvedAddress>, ParseExpectationError> {
    s.split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (addr, flag) = entry
                .rsplit_once(',')
                .ok_or_else(|| ParseExpectationError::MissingFlag(entry.to_string()))?;
            let addr = addr
                .parse::<SocketAddr>()
                .map_err(|source| ParseExpectationError::Address {
                    addr: addr.to_string(),
                    source,
                })?;
            let is_balancer = match flag.to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => return Err(ParseExpectationError::Flag(flag.to_string())),
            };
            Ok(ResolvedAddress { addr, is_balancer })
        })
        .collect()
}

/// What a resolution is expected to produce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectations {
    /// Addresses in any order.
    pub addrs: Vec<ResolvedAddress>,
    /// Exact service config JSON, or none at all.
    pub service_config: Option<String>,
    /// Exact load balancing policy, or none at all.
    pub lb_policy: Option<String>,
}

impl Expectations {
    /// Builds expectations from the client's command-line form, where empty
    /// strings mean "none".
    pub fn from_flags(
        expected_addrs: &str,
        expected_chosen_service_config: &str,
        expected_lb_policy: &str,
    ) -> Result<Self, ParseExpectationError> {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Ok(Self {
            addrs: parse_expected_addrs(expected_addrs)?,
            service_config: non_empty(expected_chosen_service_config),
            lb_policy: non_empty(expected_lb_policy),
        })
    }

    /// Compares a resolution against these expectations, reporting every
    /// difference.
    pub fn check(&self, resolution: &Resolution) -> Result<(), Mismatches> {
        let mut mismatches = Vec::new();

        let mut counts: BTreeMap<ResolvedAddress, isize> = BTreeMap::new();
        for addr in &self.addrs {
            *counts.entry(*addr).or_default() += 1;
        }
        for addr in &resolution.addresses {
            *counts.entry(*addr).or_default() -= 1;
        }
        for (addr, count) in counts {
            match count {
                0 => {}
                n if n > 0 => mismatches.push(Mismatch::MissingAddress(addr)),
                _ => mismatches.push(Mismatch::UnexpectedAddress(addr)),
            }
        }

        if self.service_config != resolution.service_config {
            mismatches.push(Mismatch::ServiceConfig {
                expected: self.service_config.clone(),
                actual: resolution.service_config.clone(),
            });
        }
        if self.lb_policy != resolution.lb_policy {
            mismatches.push(Mismatch::LbPolicy {
                expected: self.lb_policy.clone(),
                actual: resolution.lb_policy.clone(),
            });
        }

        match mismatches.is_empty() {
            true => Ok(()),
            false => Err(Mismatches(mismatches)),
        }
    }
}

/// One way a resolution differs from its expectations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// Expected but not resolved.
    MissingAddress(ResolvedAddress),
    /// Resolved but not expected.
    UnexpectedAddress(ResolvedAddress),
    /// The chosen service config differs.
    ServiceConfig {
        /// Expected config.
        expected: Option<String>,
        /// Chosen config.
        actual: Option<String>,
    },
    /// The load balancing policy differs.
    LbPolicy {
        /// Expected policy.
        expected: Option<String>,
        /// Resolved policy.
        actual: Option<String>,
    },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAddress(addr) => write!(f, "missing address {addr}"),
            Self::UnexpectedAddress(addr) => write!(f, "unexpected address {addr}"),
            Self::ServiceConfig { expected, actual } => write!(
                f,
                "service config: expected {expected:?}, got {actual:?}"
            ),
            Self::LbPolicy { expected, actual } => {
                write!(f, "lb policy: expected {expected:?}, got {actual:?}")
            }
        }
    }
}

/// All the ways a resolution differs from its expectations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatches(pub Vec<Mismatch>);

impl fmt::Display for Mismatches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for Mismatches {}
