//! Record-group configuration.
//!
//! A records config is a YAML document naming a common zone and a list of
//! test groups. Each group declares the records it needs, keyed by a name
//! relative to the common zone, and optionally the name a resolver test
//! should look up along with what it expects to find:
//!
//! ```yaml
//! resolver_tests_common_zone_name: resolver-tests-version-4.grpctestingexp.
//! resolver_component_tests:
//! - record_to_resolve: srv-ipv4-single-target
//!   expected_addrs:
//!   - {address: '1.2.3.4:1234', is_balancer: true}
//!   expected_chosen_service_config: null
//!   expected_lb_policy: null
//!   records:
//!     _grpclb._tcp.srv-ipv4-single-target:
//!     - {TTL: '2100', data: 0 0 1234 ipv4-single-target, type: SRV}
//!     ipv4-single-target:
//!     - {TTL: '2100', data: 1.2.3.4, type: A}
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    collections::BTreeMap,
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
    path::{Path, PathBuf},
    str::FromStr,
};

pub mod txt;

/// Placeholder substituted by [`render_template`].
pub const GRPCLB_PORT_PLACEHOLDER: &str = "%(grpclb_port)s";

/// Errors produced while loading a records config.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The config file could not be read.
    #[error("error reading \"{}\": {err}", .path.display())]
    Io {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        err: std::io::Error,
    },
    /// The config file is not a valid records config.
    #[error("error parsing \"{}\": {err}", .path.display())]
    Parse {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        err: serde_yaml::Error,
    },
    /// The config parsed but describes records that cannot be served.
    #[error("invalid records config: {0}")]
    Invalid(#[from] InvalidConfig),
}

/// Why a parsed records config cannot be served.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidConfig {
    /// `resolver_tests_common_zone_name` is empty or blank.
    #[error("empty common zone name")]
    EmptyZoneName,
    /// A record is malformed.
    #[error(transparent)]
    Record(#[from] InvalidRecord),
}

/// A record whose data does not match its type.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("record {name} ({kind}): {reason}")]
pub struct InvalidRecord {
    /// Name of the record, relative to the common zone.
    pub name: String,
    /// Type of the record.
    pub kind: RecordKind,
    /// What is wrong with it.
    pub reason: String,
}

/// A whole records config.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct RecordsConfig {
    /// Zone every record name is relative to, e.g. `grpctestingexp.`.
    #[serde(
        rename = "resolver_tests_common_zone_name",
        alias = "resolver_component_tests_common_zone_name"
    )]
    pub common_zone_name: String,
    /// Groups of records, each typically backing one resolver test.
    #[serde(rename = "resolver_component_tests", default)]
    pub test_groups: Vec<TestGroup>,
}

/// Records backing one resolver test, plus that test's expectations.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct TestGroup {
    /// Name (relative to the common zone) the resolver test looks up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_to_resolve: Option<String>,
    /// Records keyed by name relative to the common zone.
    pub records: BTreeMap<String, Vec<RecordSpec>>,
    /// Addresses the resolver should produce.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_addrs: Vec<ExpectedAddrSpec>,
    /// Service config JSON the resolver should pick, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_chosen_service_config: Option<String>,
    /// Load balancing policy the resolver should report, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_lb_policy: Option<String>,
}

/// One expected resolver output address.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ExpectedAddrSpec {
    /// `ip:port`, with IPv6 addresses in brackets.
    pub address: String,
    /// Whether the address is a grpclb balancer rather than a backend.
    pub is_balancer: bool,
}

/// A single DNS record declaration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct RecordSpec {
    /// Record type.
    #[serde(rename = "type")]
    pub kind: RecordKind,
    /// Type-specific data. `None` is only meaningful for generated TXT data.
    #[serde(default)]
    pub data: Option<String>,
    /// Time to live, in seconds. Written as a string, read as either.
    #[serde(
        rename = "TTL",
        deserialize_with = "deserialize_ttl",
        serialize_with = "serialize_ttl"
    )]
    pub ttl: u32,
}

/// DNS record types the testbed knows how to serve.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RecordKind {
    /// IPv4 address.
    #[serde(rename = "A")]
    A,
    /// IPv6 address.
    #[serde(rename = "AAAA")]
    Aaaa,
    /// Service locator.
    #[serde(rename = "SRV")]
    Srv,
    /// Text.
    #[serde(rename = "TXT")]
    Txt,
}

impl RecordKind {
    /// Presentation name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Srv => "SRV",
            Self::Txt => "TXT",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed form of SRV record data (`"priority weight port target"`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrvData {
    /// Priority.
    pub priority: u16,
    /// Weight.
    pub weight: u16,
    /// Port.
    pub port: u16,
    /// Target, relative to the common zone.
    pub target: String,
}

impl FromStr for SrvData {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let &[priority, weight, port, target] = fields.as_slice() else {
            return Err(format!(
                "expected \"priority weight port target\", got {s:?}"
            ));
        };
        let number = |field: &str, what: &str| {
            field
                .parse::<u16>()
                .map_err(|e| format!("bad SRV {what} {field:?}: {e}"))
        };
        Ok(Self {
            priority: number(priority, "priority")?,
            weight: number(weight, "weight")?,
            port: number(port, "port")?,
            target: target.to_string(),
        })
    }
}

impl RecordsConfig {
    /// Loads a config from a YAML file and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|err| LoadError::Io {
            path: path.into(),
            err,
        })?;
        Self::parse(&contents, path)
    }

    /// Loads a config template, substituting the grpclb port first.
    pub fn from_template_file(path: impl AsRef<Path>, grpclb_port: u16) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let template = std::fs::read_to_string(path).map_err(|err| LoadError::Io {
            path: path.into(),
            err,
        })?;
        Self::parse(&render_template(&template, grpclb_port), path)
    }

    /// Parses and validates a config from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, LoadError> {
        Self::parse(yaml, Path::new("<inline>"))
    }

    fn parse(yaml: &str, path: &Path) -> Result<Self, LoadError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|err| LoadError::Parse {
            path: path.into(),
            err,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the config back to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Checks that the zone name is set and every record's data matches its
    /// type.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.common_zone_name.trim().is_empty() {
            return Err(InvalidConfig::EmptyZoneName);
        }
        for group in &self.test_groups {
            for (name, records) in &group.records {
                for record in records {
                    record.validate(name)?;
                }
            }
        }
        Ok(())
    }

    /// Iterates over every `(relative name, record)` pair in every group.
    pub fn records(&self) -> impl Iterator<Item = (&str, &RecordSpec)> {
        self.test_groups.iter().flat_map(|group| {
            group
                .records
                .iter()
                .flat_map(|(name, records)| records.iter().map(move |r| (name.as_str(), r)))
        })
    }
}

impl RecordSpec {
    /// Creates a record declaration.
    pub fn new(kind: RecordKind, data: impl Into<String>, ttl: u32) -> Self {
        Self {
            kind,
            data: Some(data.into()),
            ttl,
        }
    }

    fn validate(&self, name: &str) -> Result<(), InvalidRecord> {
        let invalid = |reason: String| InvalidRecord {
            name: name.to_string(),
            kind: self.kind,
            reason,
        };
        if name.is_empty() {
            return Err(invalid(String::from("empty record name")));
        }
        let data = match (&self.data, self.kind) {
            (Some(data), _) => data.as_str(),
            // TXT data may be filled in later from a service config file
            (None, RecordKind::Txt) => return Ok(()),
            (None, _) => return Err(invalid(String::from("missing data"))),
        };
        match self.kind {
            RecordKind::A => data
                .parse::<Ipv4Addr>()
                .map(drop)
                .map_err(|e| invalid(format!("{data:?}: {e}"))),
            RecordKind::Aaaa => data
                .parse::<Ipv6Addr>()
                .map(drop)
                .map_err(|e| invalid(format!("{data:?}: {e}"))),
            RecordKind::Srv => data.parse::<SrvData>().map(drop).map_err(invalid),
            RecordKind::Txt => Ok(()),
        }
    }
}

/// Substitutes every grpclb port placeholder in a records config template.
pub fn render_template(template: &str, grpclb_port: u16) -> String {
    template.replace(GRPCLB_PORT_PLACEHOLDER, &grpclb_port.to_string())
}

/// Qualifies a name relative to a zone.
pub fn full_name(name: &str, zone: &str) -> String {
    format!("{name}.{zone}")
}

fn deserialize_ttl<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Ttl {
        Number(u32),
        Text(String),
    }
    match Ttl::deserialize(deserializer)? {
        Ttl::Number(ttl) => Ok(ttl),
        Ttl::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn serialize_ttl<S: Serializer>(ttl: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ttl.to_string())
}
