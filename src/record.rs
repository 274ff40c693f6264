//! SRV records.

use rand::Rng;
use std::{cmp::Reverse, fmt::Display};

/// Representation of types that contain the fields of a SRV record.
pub trait SrvRecord {
    /// Type representing the SRV record's target. Must implement `Display` so
    /// it can be rendered as a host name.
    type Target: Display + ?Sized;

    /// Gets a SRV record's target.
    fn target(&self) -> &Self::Target;

    /// Gets a SRV record's port.
    fn port(&self) -> u16;

    /// Gets a SRV record's priority.
    fn priority(&self) -> u16;

    /// Gets a SRV record's weight.
    fn weight(&self) -> u16;

    /// Renders a SRV record's target and port as `host:port`, without the
    /// target's trailing dot.
    ///
    /// ```
    /// use resolver_testbed::{SrvRecord, SrvTarget};
    /// let record = SrvTarget {
    ///     priority: 0,
    ///     weight: 0,
    ///     port: 1234,
    ///     target: String::from("ipv4-single-target.resolver-tests.grpctestingexp."),
    /// };
    /// assert_eq!(
    ///     record.authority(),
    ///     "ipv4-single-target.resolver-tests.grpctestingexp:1234"
    /// );
    /// ```
    fn authority(&self) -> String {
        let target = self.target().to_string();
        format!("{}:{}", target.trim_end_matches('.'), self.port())
    }

    /// Generates a key to sort a SRV record by priority and weight per RFC 2782.
    fn sort_key(&self, rng: impl Rng) -> (u16, Reverse<u32>) {
        sort_key(self.priority(), self.weight(), rng)
    }
}

/// Generates a key to sort a SRV record by priority and weight per RFC 2782.
pub(crate) fn sort_key(priority: u16, weight: u16, mut rng: impl Rng) -> (u16, Reverse<u32>) {
    // Sort ascending by priority, then descending (hence `Reverse`) by randomized weight
    let rand = u32::from(rng.random::<u16>());
    (priority, Reverse(u32::from(weight) * rand))
}

/// An owned SRV record as returned by a [`DnsLookup`](crate::resolver::DnsLookup).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SrvTarget {
    /// Priority; lower is tried first.
    pub priority: u16,
    /// Relative weight among records of equal priority.
    pub weight: u16,
    /// Port the target listens on.
    pub port: u16,
    /// Host name of the target, usually fully qualified.
    pub target: String,
}

impl SrvRecord for SrvTarget {
    type Target = str;

    fn target(&self) -> &Self::Target {
        &self.target
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn priority(&self) -> u16 {
        self.priority
    }

    fn weight(&self) -> u16 {
        self.weight
    }
}
