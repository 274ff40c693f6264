//! Generated test data: resolver test cases and records in the form a
//! cloud DNS zone accepts.

use crate::records::{
    full_name,
    txt::{service_config_txt_data, split_txt_data, TxtError, ZoneFileFormat, SERVICE_CONFIG_PREFIX},
    RecordKind, RecordsConfig, SrvData,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Targets left out of tests against a real cloud DNS zone.
pub const GCE_SKIPPED_TARGETS: &[&str] = &["ipv4-config-causing-fallback-to-tcp"];

/// Errors encountered while generating test data.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    /// Records under one name disagree on TTL.
    #[error("records at {name} have different TTLs: {first} and {second}")]
    DifferentTtls {
        /// Record name.
        name: String,
        /// TTL of the first record.
        first: u32,
        /// A different TTL found later.
        second: u32,
    },
    /// The same name and type appear in more than one group.
    #[error("duplicate {kind} record at {name}")]
    Duplicate {
        /// Record name.
        name: String,
        /// Record type.
        kind: RecordKind,
    },
    /// SRV and TXT record sets may only hold one record for upload.
    #[error("expected exactly one {kind} record at {name}, found {count}")]
    NotSingle {
        /// Record name.
        name: String,
        /// Record type.
        kind: RecordKind,
        /// How many were found.
        count: usize,
    },
    /// A record has no data to upload.
    #[error("{kind} record at {name} has no data")]
    MissingData {
        /// Record name.
        name: String,
        /// Record type.
        kind: RecordKind,
    },
    /// SRV data is malformed.
    #[error("bad SRV record at {name}: {reason}")]
    Srv {
        /// Record name.
        name: String,
        /// Parse failure.
        reason: String,
    },
    /// A service config couldn't be encoded.
    #[error(transparent)]
    Txt(#[from] TxtError),
}

/// One resolver test, in the form handed to a resolver test client.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct TestCase {
    /// Fully qualified name to resolve.
    pub target_name: String,
    /// Expected addresses as `addr,True;addr,False`.
    pub expected_addrs: String,
    /// Expected service config JSON, empty for none.
    pub expected_chosen_service_config: String,
    /// Expected load balancing policy, empty for none.
    pub expected_lb_policy: String,
}

/// A record set in the form `gcloud dns record-sets transaction add` takes.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct UploadableRecord {
    /// Name relative to the common zone.
    pub name: String,
    /// Time to live shared by every record in the set.
    pub ttl: u32,
    /// Record type.
    #[serde(rename = "type")]
    pub kind: RecordKind,
    /// Record data, quoted for the shell.
    pub data: String,
}

/// Everything the build needs to know about resolver tests.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct BuildData {
    /// Zone every test name lives in.
    pub resolver_tests_common_zone_name: String,
    /// Cloud DNS managed zone id for the common zone.
    pub resolver_gce_integration_tests_zone_id: String,
    /// Records to upload to the cloud zone.
    pub all_integration_test_records: Vec<UploadableRecord>,
    /// Tests run against the cloud zone.
    pub resolver_gce_integration_test_cases: Vec<TestCase>,
    /// Tests run against the local DNS server.
    pub resolver_component_test_cases: Vec<TestCase>,
}

impl BuildData {
    /// Generates build data for a records config.
    pub fn new(config: &RecordsConfig) -> Result<Self, GenError> {
        Ok(Self {
            resolver_tests_common_zone_name: config.common_zone_name.clone(),
            resolver_gce_integration_tests_zone_id: gce_zone_id(&config.common_zone_name),
            all_integration_test_records: uploadable_records(config, GCE_SKIPPED_TARGETS)?,
            resolver_gce_integration_test_cases: resolver_test_cases(config, GCE_SKIPPED_TARGETS),
            resolver_component_test_cases: resolver_test_cases(config, &[]),
        })
    }

    /// Serializes the build data as YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Cloud DNS managed zone id for a DNS zone name.
///
/// ```
/// assert_eq!(
///     resolver_testbed::gen::gce_zone_id("resolver-tests.grpctestingexp."),
///     "resolver-tests-grpctestingexp-zone-id"
/// );
/// ```
pub fn gce_zone_id(zone: &str) -> String {
    format!("{}zone-id", zone.replace('.', "-"))
}

fn is_skipped(target: Option<&str>, skip: &[&str]) -> bool {
    target.is_some_and(|target| skip.contains(&target))
}

/// Test cases for every group with a name to resolve, except those in `skip`.
pub fn resolver_test_cases(config: &RecordsConfig, skip: &[&str]) -> Vec<TestCase> {
    config
        .test_groups
        .iter()
        .filter_map(|group| {
            let target = group.record_to_resolve.as_deref()?;
            if is_skipped(Some(target), skip) {
                return None;
            }
            let expected_addrs = group
                .expected_addrs
                .iter()
                .map(|addr| {
                    let flag = if addr.is_balancer { "True" } else { "False" };
                    format!("{},{flag}", addr.address)
                })
                .collect::<Vec<_>>()
                .join(";");
            Some(TestCase {
                target_name: full_name(target, &config.common_zone_name),
                expected_addrs,
                expected_chosen_service_config: group
                    .expected_chosen_service_config
                    .clone()
                    .unwrap_or_default(),
                expected_lb_policy: group.expected_lb_policy.clone().unwrap_or_default(),
            })
        })
        .collect()
}

/// Record sets of every group not in `skip`, one per name and type, with
/// data formatted for `gcloud`.
pub fn uploadable_records(
    config: &RecordsConfig,
    skip: &[&str],
) -> Result<Vec<UploadableRecord>, GenError> {
    let mut out: Vec<UploadableRecord> = Vec::new();
    for group in &config.test_groups {
        if is_skipped(group.record_to_resolve.as_deref(), skip) {
            continue;
        }
        for (name, records) in &group.records {
            let mut ttl = None;
            let mut by_kind: BTreeMap<RecordKind, Vec<Option<&str>>> = BTreeMap::new();
            for record in records {
                match ttl {
                    None => ttl = Some(record.ttl),
                    Some(first) if first != record.ttl => {
                        return Err(GenError::DifferentTtls {
                            name: name.clone(),
                            first,
                            second: record.ttl,
                        })
                    }
                    Some(_) => {}
                }
                by_kind
                    .entry(record.kind)
                    .or_default()
                    .push(record.data.as_deref());
            }
            for (kind, data) in by_kind {
                if out.iter().any(|r| r.name == *name && r.kind == kind) {
                    return Err(GenError::Duplicate {
                        name: name.clone(),
                        kind,
                    });
                }
                out.push(UploadableRecord {
                    name: name.clone(),
                    ttl: ttl.unwrap_or_default(),
                    kind,
                    data: uploadable_data(name, kind, &data, &config.common_zone_name)?,
                });
            }
        }
    }
    Ok(out)
}

fn uploadable_data(
    name: &str,
    kind: RecordKind,
    data: &[Option<&str>],
    common_zone: &str,
) -> Result<String, GenError> {
    let present = |d: &Option<&str>| {
        d.map(str::to_string).ok_or_else(|| GenError::MissingData {
            name: name.to_string(),
            kind,
        })
    };
    let single = || match data {
        [d] => present(d),
        _ => Err(GenError::NotSingle {
            name: name.to_string(),
            kind,
            count: data.len(),
        }),
    };
    match kind {
        RecordKind::A | RecordKind::Aaaa => Ok(data
            .iter()
            .map(|d| present(d).map(|d| format!("\"{d}\"")))
            .collect::<Result<Vec<_>, _>>()?
            .join(" ")),
        RecordKind::Srv => {
            let srv = single()?.parse::<SrvData>().map_err(|reason| GenError::Srv {
                name: name.to_string(),
                reason,
            })?;
            Ok(format!(
                "\"{} {} {} {}\"",
                srv.priority,
                srv.weight,
                srv.port,
                full_name(&srv.target, common_zone)
            ))
        }
        RecordKind::Txt => {
            let data = single()?;
            let chunks = match data.strip_prefix(SERVICE_CONFIG_PREFIX) {
                Some(json) => service_config_txt_data(json, ZoneFileFormat::Gcloud)?,
                None => split_txt_data(data.as_bytes())
                    .iter()
                    .map(|chunk| format!("\"{}\"", String::from_utf8_lossy(chunk)))
                    .collect(),
            };
            // One shell token, so every string lands in the same record
            Ok(format!("'{}'", chunks.join(" ")))
        }
    }
}

/// `gcloud` command lines that upload `records` to the managed zone
/// `zone_id` serving `common_zone` in one transaction.
pub fn gcloud_transaction_commands(
    zone_id: &str,
    common_zone: &str,
    records: &[UploadableRecord],
) -> Vec<String> {
    let mut cmds = vec![format!("gcloud dns record-sets transaction start -z={zone_id}")];
    cmds.extend(records.iter().map(|r| {
        format!(
            "gcloud dns record-sets transaction add -z={zone_id} --name={} --type={} --ttl={} {}",
            full_name(&r.name, common_zone),
            r.kind,
            r.ttl,
            r.data
        )
    }));
    cmds.push(format!("gcloud dns record-sets transaction describe -z={zone_id}"));
    cmds.push(format!("gcloud dns record-sets transaction execute -z={zone_id}"));
    cmds.push(format!("gcloud dns record-sets list -z={zone_id}"));
    cmds
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
resolver_tests_common_zone_name: resolver-tests.grpctestingexp.
resolver_component_tests:
- record_to_resolve: srv-ipv4-single-target
  expected_addrs:
  - {address: '1.2.3.4:1234', is_balancer: true}
  - {address: '1.2.3.4:443', is_balancer: false}
  expected_chosen_service_config: null
  expected_lb_policy: null
  records:
    _grpclb._tcp.srv-ipv4-single-target:
    - {TTL: '2100', data: 0 0 1234 ipv4-single-target, type: SRV}
    ipv4-single-target:
    - {TTL: '2100', data: 1.2.3.4, type: A}
- record_to_resolve: ipv4-config-causing-fallback-to-tcp
  expected_addrs:
  - {address: '1.2.3.4:443', is_balancer: false}
  expected_chosen_service_config: '{"loadBalancingPolicy":"round_robin"}'
  expected_lb_policy: round_robin
  records:
    ipv4-config-causing-fallback-to-tcp:
    - {TTL: '2100', data: 1.2.3.4, type: A}
    - {TTL: '2100', data: 1.2.3.5, type: A}
    _grpc_config.ipv4-config-causing-fallback-to-tcp:
    - {TTL: '2100', data: 'grpc_config=[{"serviceConfig":{"loadBalancingPolicy":"round_robin"}}]', type: TXT}
"#;

    fn config() -> RecordsConfig {
        RecordsConfig::from_yaml_str(CONFIG).unwrap()
    }

    #[test]
    fn builds_test_cases() {
        let cases = resolver_test_cases(&config(), &[]);
        assert_eq!(cases.len(), 2);
        assert_eq!(
            cases[0],
            TestCase {
                target_name: String::from("srv-ipv4-single-target.resolver-tests.grpctestingexp."),
                expected_addrs: String::from("1.2.3.4:1234,True;1.2.3.4:443,False"),
                expected_chosen_service_config: String::new(),
                expected_lb_policy: String::new(),
            }
        );
        assert_eq!(cases[1].expected_lb_policy, "round_robin");
        assert_eq!(resolver_test_cases(&config(), GCE_SKIPPED_TARGETS).len(), 1);
    }

    #[test]
    fn formats_uploadable_records() {
        let records = uploadable_records(&config(), &[]).unwrap();
        let find = |name: &str| records.iter().find(|r| r.name == name).unwrap();
        assert_eq!(
            find("_grpclb._tcp.srv-ipv4-single-target").data,
            "\"0 0 1234 ipv4-single-target.resolver-tests.grpctestingexp.\""
        );
        assert_eq!(
            find("ipv4-config-causing-fallback-to-tcp").data,
            "\"1.2.3.4\" \"1.2.3.5\""
        );
        let txt = find("_grpc_config.ipv4-config-causing-fallback-to-tcp");
        assert!(txt.data.starts_with("'\"grpc_config=[{\\\\\\\"serviceConfig"));
        assert!(txt.data.ends_with("\"'"));
    }

    #[test]
    fn rejects_mixed_ttls_and_duplicates() {
        let mut config = config();
        config.test_groups[0]
            .records
            .get_mut("ipv4-single-target")
            .unwrap()
            .push(crate::records::RecordSpec::new(RecordKind::A, "1.2.3.9", 60));
        assert!(matches!(
            uploadable_records(&config, &[]),
            Err(GenError::DifferentTtls { first: 2100, second: 60, .. })
        ));

        let mut config = self::config();
        let group = config.test_groups[0].clone();
        config.test_groups.push(group);
        assert!(matches!(
            uploadable_records(&config, GCE_SKIPPED_TARGETS),
            Err(GenError::Duplicate { .. })
        ));
    }

    #[test]
    fn build_data_and_commands() {
        let data = BuildData::new(&config()).unwrap();
        assert_eq!(
            data.resolver_gce_integration_tests_zone_id,
            "resolver-tests-grpctestingexp-zone-id"
        );
        assert_eq!(data.all_integration_test_records.len(), 2);
        assert_eq!(data.resolver_component_test_cases.len(), 2);
        let yaml = data.to_yaml().unwrap();
        assert!(yaml.contains("resolver_gce_integration_test_cases:"));

        let cmds = gcloud_transaction_commands(
            &data.resolver_gce_integration_tests_zone_id,
            &data.resolver_tests_common_zone_name,
            &data.all_integration_test_records,
        );
        assert_eq!(cmds.len(), 5);
        assert_eq!(
            cmds[1],
            "gcloud dns record-sets transaction add -z=resolver-tests-grpctestingexp-zone-id \
             --name=_grpclb._tcp.srv-ipv4-single-target.resolver-tests.grpctestingexp. \
             --type=SRV --ttl=2100 \"0 0 1234 ipv4-single-target.resolver-tests.grpctestingexp.\""
        );
    }
}
