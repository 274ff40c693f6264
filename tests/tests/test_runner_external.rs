//! Runs the test cases with the server and client as separate processes,
//! both provided by the `resolver-testbed` binary.

use std::ffi::OsString;
use std::time::Duration;

use resolver_testbed::{
    records::RecordsConfig,
    runner::{run, ClientCommand, DnsServerSource, RunnerConfig},
};

use crate::{
    harness::{Test, TestEnv},
    tests::{helpers::testbed_bin, DEFAULT_TEST_CONFIG},
};

pub static TEST_RUNNER_EXTERNAL: Test = Test {
    name: "test_runner_external",
    run: test_runner_external,
    config: &DEFAULT_TEST_CONFIG,
};

fn test_runner_external(env: &TestEnv) {
    let mut config = RunnerConfig {
        dns_server: DnsServerSource::External {
            bin: testbed_bin(),
            args: vec![OsString::from("serve")],
        },
        client: ClientCommand::External {
            bin: testbed_bin(),
            args: vec![OsString::from("check")],
        },
        parallelism: 2,
        per_test_timeout: Duration::from_secs(30),
        ..RunnerConfig::new(env.records.clone())
    };
    let report = run(&config).expect("runner failed");
    report.print_summary();
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.failures(), 0);

    // One broken expectation fails exactly one case
    let mut records: RecordsConfig = env.records.clone();
    records.test_groups[0].expected_addrs[0].address = String::from("1.2.3.4:444");
    config.records = records;
    let report = run(&config).expect("runner failed");
    report.print_summary();
    assert_eq!(report.failures(), 1);
    assert_eq!(report.exit_code(), 1);
    let failed = report.outcomes.iter().find(|o| !o.passed).unwrap();
    assert_eq!(
        failed.case.target_name,
        "ipv4-single-target.resolver-tests.grpctestingexp."
    );
}
