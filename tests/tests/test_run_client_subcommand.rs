//! Runs a client against a server for a records template through the
//! `run-client` subcommand.

use std::io::Write;

use crate::{
    harness::{Test, TestEnv},
    tests::{
        helpers::{run_testbed, testbed_bin, unused_port},
        DEFAULT_TEST_CONFIG,
    },
};

pub static TEST_RUN_CLIENT_SUBCOMMAND: Test = Test {
    name: "test_run_client_subcommand",
    run: test_run_client_subcommand,
    config: &DEFAULT_TEST_CONFIG,
};

static TEMPLATE: &str = r#"
resolver_tests_common_zone_name: test.google.fr.
resolver_component_tests:
- records:
    _grpclb._tcp.server:
    - {TTL: '2100', data: '0 0 %(grpclb_port)s balancer', type: SRV}
    balancer:
    - {TTL: '2100', data: 127.0.0.1, type: A}
"#;

fn test_run_client_subcommand(_env: &TestEnv) {
    let mut template = tempfile::NamedTempFile::new().unwrap();
    template.write_all(TEMPLATE.as_bytes()).unwrap();
    let port = unused_port().to_string();

    let client_args = |expected: &str| {
        format!(
            "{} check --target_name server.test.google.fr. --expected_addrs {expected} \
             --local_dns_server_address 127.0.0.1:{port}",
            testbed_bin().display()
        )
    };
    let run_client = |expected: &str| {
        run_testbed([
            "run-client",
            "--records_config_path",
            &template.path().to_string_lossy(),
            "--grpclb_port",
            "12345",
            "--dns_server_port",
            &port,
            "--client_args",
            &client_args(expected),
        ])
    };

    let out = run_client("127.0.0.1:12345,True");
    println!("{}", String::from_utf8_lossy(&out.stdout));
    assert!(out.status.success());

    let out = run_client("127.0.0.1:54321,True");
    assert_eq!(out.status.code(), Some(1));
}
