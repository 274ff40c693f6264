//! In-memory record store answering exact-name, exact-type lookups.

use crate::records::{
    full_name, txt::split_txt_data, InvalidRecord, RecordKind, RecordSpec, RecordsConfig, SrvData,
};
use hickory_proto::{
    rr::{
        rdata::{A, AAAA, SRV, TXT},
        Name, RData, Record, RecordType,
    },
    ProtoError,
};
use std::{
    collections::HashMap,
    net::{Ipv4Addr, Ipv6Addr},
};

/// Name that is always present so that a runner can tell the server is up.
pub const HEALTH_CHECK_NAME: &str =
    "health-check-local-dns-server-is-alive.resolver-tests.grpctestingexp.";

/// Address served for [`HEALTH_CHECK_NAME`].
pub const HEALTH_CHECK_ADDR: Ipv4Addr = Ipv4Addr::new(123, 123, 123, 123);

/// TTL of the health check record.
const HEALTH_CHECK_TTL: u32 = 2100;

/// Errors encountered while building a zone.
#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    /// A record's data does not match its type.
    #[error(transparent)]
    InvalidRecord(#[from] InvalidRecord),
    /// A name could not be turned into a DNS name.
    #[error("bad DNS name {name:?}: {source}")]
    Name {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        source: ProtoError,
    },
}

impl From<RecordKind> for RecordType {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::A => Self::A,
            RecordKind::Aaaa => Self::AAAA,
            RecordKind::Srv => Self::SRV,
            RecordKind::Txt => Self::TXT,
        }
    }
}

/// Outcome of a zone lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Records of the requested type exist.
    Answers(Vec<Record>),
    /// The name exists but has no records of the requested type.
    NoData,
    /// The name does not exist at all.
    NxDomain,
}

/// Records of one type under one name.
#[derive(Debug, Clone)]
struct RecordSet {
    ttl: u32,
    rdata: Vec<RData>,
}

/// A flat, in-memory set of records keyed by normalized name.
#[derive(Debug, Clone, Default)]
pub struct Zone {
    names: HashMap<String, HashMap<RecordType, RecordSet>>,
}

impl Zone {
    /// Builds a zone from a records config, qualifying every name (and SRV
    /// target) with the config's common zone.
    pub fn from_config(config: &RecordsConfig) -> Result<Self, ZoneError> {
        let mut zone = Self::default();
        let common_zone = config.common_zone_name.as_str();
        for (name, record) in config.records() {
            let rdata = Self::rdata_for(name, record, common_zone)?;
            zone.push(&full_name(name, common_zone), rdata, record.ttl);
        }
        if !zone.contains(HEALTH_CHECK_NAME) {
            zone.push(
                HEALTH_CHECK_NAME,
                RData::A(A(HEALTH_CHECK_ADDR)),
                HEALTH_CHECK_TTL,
            );
        }
        #[cfg(feature = "log")]
        tracing::debug!(names = zone.names.len(), records = zone.len(), "built zone");
        Ok(zone)
    }

    fn rdata_for(name: &str, record: &RecordSpec, common_zone: &str) -> Result<RData, ZoneError> {
        let invalid = |reason: String| InvalidRecord {
            name: name.to_string(),
            kind: record.kind,
            reason,
        };
        let data = record
            .data
            .as_deref()
            .ok_or_else(|| invalid(String::from("missing data")))?;
        let rdata = match record.kind {
            RecordKind::A => {
                let addr = data.parse::<Ipv4Addr>().map_err(|e| invalid(e.to_string()))?;
                RData::A(A(addr))
            }
            RecordKind::Aaaa => {
                let addr = data.parse::<Ipv6Addr>().map_err(|e| invalid(e.to_string()))?;
                RData::AAAA(AAAA(addr))
            }
            RecordKind::Srv => {
                let srv = data.parse::<SrvData>().map_err(invalid)?;
                let target = full_name(&srv.target, common_zone);
                let target = Name::from_utf8(&target)
                    .map_err(|source| ZoneError::Name { name: target, source })?;
                RData::SRV(SRV::new(srv.priority, srv.weight, srv.port, target))
            }
            RecordKind::Txt => {
                let strings = split_txt_data(data.as_bytes());
                RData::TXT(TXT::from_bytes(strings.iter().map(Vec::as_slice).collect()))
            }
        };
        Ok(rdata)
    }

    /// Adds a record. A later TTL for the same name and type replaces the
    /// earlier one.
    pub fn push(&mut self, name: &str, rdata: RData, ttl: u32) {
        let set = self
            .names
            .entry(normalize_name(name))
            .or_default()
            .entry(rdata.record_type())
            .or_insert_with(|| RecordSet {
                ttl,
                rdata: Vec::new(),
            });
        set.ttl = ttl;
        set.rdata.push(rdata);
    }

    /// Whether any record exists under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(&normalize_name(name))
    }

    /// Looks up the records of one type at one name. The answers carry
    /// `name` as given by the caller.
    pub fn lookup(&self, name: &Name, record_type: RecordType) -> Lookup {
        let Some(types) = self.names.get(&normalize_name(&name.to_string())) else {
            return Lookup::NxDomain;
        };
        match types.get(&record_type) {
            Some(set) => Lookup::Answers(
                set.rdata
                    .iter()
                    .map(|rdata| Record::from_rdata(name.clone(), set.ttl, rdata.clone()))
                    .collect(),
            ),
            None => Lookup::NoData,
        }
    }

    /// Normalized names present in the zone, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.names
            .values()
            .flat_map(HashMap::values)
            .map(|set| set.rdata.len())
            .sum()
    }

    /// Whether the zone holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Normalize a DNS name for comparison (lowercase, no trailing dot).
pub(crate) fn normalize_name(name: &str) -> String {
    name.to_lowercase().trim_end_matches('.').to_string()
}
