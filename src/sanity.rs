//! Checks that a live DNS server serves exactly the records of a records
//! config, such as a cloud zone after an upload.
//!
//! Every distinct name and type in the config is queried once over TCP.
//! The answer section, rendered as `dig`-like lines by
//! [`format_answer`](crate::probe::format_answer), must hold the same lines
//! as the records the config declares.

use std::{collections::HashSet, fmt, net::SocketAddr, time::Duration};

use hickory_proto::rr::{rdata::TXT, Name, RData, Record, RecordType};

use crate::{
    probe::{self, format_answer, ProbeError, Transport},
    records::{
        full_name,
        txt::{gcloud_served_txt_chunks, TxtError},
        RecordsConfig,
    },
    zone::{Lookup, Zone, ZoneError},
};

/// How long each query may take.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// How the checked server splits long TXT data into character-strings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TxtChunking {
    /// Full 255 byte strings, as the embedded server serves them.
    #[default]
    Local,
    /// A cloud zone loaded by the `gcloud` commands of [`crate::gen`].
    Gcloud,
}

/// Errors encountered while checking a server.
#[derive(Debug, thiserror::Error)]
pub enum SanityError {
    /// The records config does not describe a valid zone.
    #[error(transparent)]
    Zone(#[from] ZoneError),
    /// A service config in the records config is not valid JSON.
    #[error(transparent)]
    Txt(#[from] TxtError),
    /// A query got no usable answer.
    #[error("query for {name} {record_type} failed: {source}")]
    Query {
        /// Name queried.
        name: String,
        /// Type queried.
        record_type: RecordType,
        /// Underlying error.
        #[source]
        source: ProbeError,
    },
    /// Some record sets are not served as declared.
    #[error("{}", join_mismatches(.0))]
    Mismatches(Vec<RecordSetMismatch>),
}

/// A name and type whose answers differ from the declared records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSetMismatch {
    /// Name queried.
    pub name: String,
    /// Type queried.
    pub record_type: RecordType,
    /// Declared records, one sorted `dig`-like line each.
    pub expected: Vec<String>,
    /// Answers received, one sorted `dig`-like line each.
    pub found: Vec<String>,
}

impl fmt::Display for RecordSetMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bad records for {} {}", self.name, self.record_type)?;
        for (label, lines) in [("found", &self.found), ("expected", &self.expected)] {
            writeln!(f, "  {label}:")?;
            if lines.is_empty() {
                writeln!(f, "    (nothing)")?;
            }
            for line in lines {
                writeln!(f, "    {line}")?;
            }
        }
        Ok(())
    }
}

fn join_mismatches(mismatches: &[RecordSetMismatch]) -> String {
    mismatches.iter().map(ToString::to_string).collect()
}

/// Queries `server` for every name and type in `config` and compares the
/// answers with the declared records. All record sets are checked before
/// any mismatch is reported. Returns how many record sets were checked.
pub fn sanity_check(
    config: &RecordsConfig,
    server: SocketAddr,
    chunking: TxtChunking,
) -> Result<usize, SanityError> {
    let zone = Zone::from_config(config)?;
    let mut seen = HashSet::new();
    let mut mismatches = Vec::new();

    for (name, record) in config.records() {
        let name = full_name(name, &config.common_zone_name);
        let record_type = RecordType::from(record.kind);
        if !seen.insert((name.to_lowercase(), record_type)) {
            continue;
        }
        let dns_name = Name::from_utf8(&name).map_err(|source| ZoneError::Name {
            name: name.clone(),
            source,
        })?;
        let mut declared = match zone.lookup(&dns_name, record_type) {
            Lookup::Answers(records) => records,
            Lookup::NoData | Lookup::NxDomain => Vec::new(),
        };
        if chunking == TxtChunking::Gcloud {
            declared = declared
                .into_iter()
                .map(gcloud_chunked)
                .collect::<Result<_, _>>()?;
        }

        let answer = probe::query(server, &name, record_type, Transport::Tcp, QUERY_TIMEOUT)
            .map_err(|source| SanityError::Query {
                name: name.clone(),
                record_type,
                source,
            })?;
        let expected = answer_lines(&declared);
        let found = answer_lines(answer.answers());
        if expected == found {
            #[cfg(feature = "log")]
            tracing::debug!(%name, qtype = %record_type, records = found.len(), "records match");
        } else {
            #[cfg(feature = "log")]
            tracing::warn!(%name, qtype = %record_type, ?expected, ?found, "records differ");
            mismatches.push(RecordSetMismatch {
                name,
                record_type,
                expected,
                found,
            });
        }
    }

    if mismatches.is_empty() {
        Ok(seen.len())
    } else {
        Err(SanityError::Mismatches(mismatches))
    }
}

/// Renders records as sorted lines with lower-cased owner names.
fn answer_lines(records: &[Record]) -> Vec<String> {
    let mut lines: Vec<String> = records
        .iter()
        .map(|record| {
            let mut record = record.clone();
            record.set_name(record.name().to_lowercase());
            format_answer(&record)
        })
        .collect();
    lines.sort_unstable();
    lines
}

fn gcloud_chunked(record: Record) -> Result<Record, TxtError> {
    let RData::TXT(txt) = record.data() else {
        return Ok(record);
    };
    let data = txt.txt_data().concat();
    let chunks = gcloud_served_txt_chunks(&String::from_utf8_lossy(&data))?;
    Ok(Record::from_rdata(
        record.name().clone(),
        record.ttl(),
        RData::TXT(TXT::from_bytes(chunks.iter().map(Vec::as_slice).collect())),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::DnsServer;

    fn config() -> RecordsConfig {
        let service_config = format!(
            "grpc_config=[{{\"serviceConfig\":{{\"loadBalancingPolicy\":\"round_robin\",\"id\":\"{}\"}}}}]",
            "x".repeat(300)
        );
        RecordsConfig::from_yaml_str(&format!(
            r#"
resolver_tests_common_zone_name: resolver-tests.grpctestingexp.
resolver_component_tests:
- record_to_resolve: srv-ipv4-multi-target
  expected_addrs: []
  expected_chosen_service_config: null
  expected_lb_policy: null
  records:
    _grpclb._tcp.srv-ipv4-multi-target:
    - {{TTL: '2100', data: 0 0 1234 ipv4-multi-target, type: SRV}}
    ipv4-multi-target:
    - {{TTL: '2100', data: 1.2.3.5, type: A}}
    - {{TTL: '2100', data: 1.2.3.6, type: A}}
    - {{TTL: '2100', data: '2607:f8b0:400a:801::1002', type: AAAA}}
    _grpc_config.srv-ipv4-multi-target:
    - {{TTL: '2100', data: '{service_config}', type: TXT}}
"#
        ))
        .unwrap()
    }

    fn serve(config: &RecordsConfig) -> crate::server::DnsServerHandle {
        let zone = Zone::from_config(config).unwrap();
        DnsServer::spawn(zone, "127.0.0.1:0".parse().unwrap()).unwrap()
    }

    #[test]
    fn passes_when_server_serves_the_config() {
        let config = config();
        let server = serve(&config);
        let checked = sanity_check(&config, server.local_addr(), TxtChunking::Local).unwrap();
        // A and AAAA under one name are separate record sets
        assert_eq!(checked, 4);
    }

    #[test]
    fn reports_every_differing_record_set() {
        let config = config();
        let mut served = config.clone();
        let records = &mut served.test_groups[0].records;
        records.get_mut("ipv4-multi-target").unwrap().truncate(2);
        records.get_mut("ipv4-multi-target").unwrap()[1].data = Some(String::from("1.2.3.7"));
        records.get_mut("_grpclb._tcp.srv-ipv4-multi-target").unwrap()[0].ttl = 60;
        let server = serve(&served);

        let Err(SanityError::Mismatches(mismatches)) =
            sanity_check(&config, server.local_addr(), TxtChunking::Local)
        else {
            panic!("expected mismatches");
        };
        let differing: Vec<(&str, RecordType)> = mismatches
            .iter()
            .map(|m| (m.name.as_str(), m.record_type))
            .collect();
        assert_eq!(differing.len(), 3);
        for expected in [
            ("_grpclb._tcp.srv-ipv4-multi-target.resolver-tests.grpctestingexp.", RecordType::SRV),
            ("ipv4-multi-target.resolver-tests.grpctestingexp.", RecordType::A),
            ("ipv4-multi-target.resolver-tests.grpctestingexp.", RecordType::AAAA),
        ] {
            assert!(differing.contains(&expected), "{expected:?} not in {differing:?}");
        }

        let aaaa = mismatches
            .iter()
            .find(|m| m.record_type == RecordType::AAAA)
            .unwrap();
        assert!(aaaa.found.is_empty());
        assert_eq!(
            aaaa.expected,
            vec!["ipv4-multi-target.resolver-tests.grpctestingexp.\t2100\tIN\tAAAA\t2607:f8b0:400a:801::1002"]
        );
        assert!(aaaa.to_string().contains("(nothing)"));
    }

    #[test]
    fn txt_chunking_must_match_the_server() {
        let config = config();
        let server = serve(&config);
        let Err(SanityError::Mismatches(mismatches)) =
            sanity_check(&config, server.local_addr(), TxtChunking::Gcloud)
        else {
            panic!("expected a TXT mismatch");
        };
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].record_type, RecordType::TXT);
    }

    #[test]
    fn unreachable_server_is_a_query_error() {
        // Bind and drop to find a port nothing listens on
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let err = sanity_check(&config(), addr, TxtChunking::Local).unwrap_err();
        assert!(matches!(err, SanityError::Query { .. }), "{err}");
    }
}
