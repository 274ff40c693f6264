//! Compares the test server against records configs through the
//! `sanity-check` subcommand.

use std::io::Write;

use crate::{
    harness::{Test, TestEnv},
    tests::{helpers::run_testbed, DEFAULT_TEST_CONFIG},
};

pub static TEST_SANITY_CHECK_SUBCOMMAND: Test = Test {
    name: "test_sanity_check_subcommand",
    run: test_sanity_check_subcommand,
    config: &DEFAULT_TEST_CONFIG,
};

fn test_sanity_check_subcommand(env: &TestEnv) {
    let port = env.dns_server.port().to_string();
    let sanity_check = |yaml: &str| {
        let mut records = tempfile::NamedTempFile::new().unwrap();
        records.write_all(yaml.as_bytes()).unwrap();
        run_testbed([
            "sanity-check",
            "-p",
            &port,
            "--records_config_path",
            &records.path().to_string_lossy(),
        ])
    };

    let out = sanity_check(&env.records.to_yaml().unwrap());
    let stdout = String::from_utf8_lossy(&out.stdout);
    println!("{stdout}");
    assert!(out.status.success());
    assert!(stdout.starts_with("6 record sets served as declared"), "{stdout}");

    // The server still serves 1.2.3.4
    let mut records = env.records.clone();
    let a = records.test_groups[0].records.get_mut("ipv4-single-target").unwrap();
    a[0].data = Some(String::from("1.2.3.9"));
    let out = sanity_check(&records.to_yaml().unwrap());
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("bad records for ipv4-single-target.resolver-tests.grpctestingexp. A"),
        "{stderr}"
    );
    assert!(stderr.contains("1 record sets differ"), "{stderr}");
}
