//! Queries the test server through the `query` subcommand over both transports.

use crate::{
    harness::{Test, TestEnv},
    tests::{helpers::run_testbed, DEFAULT_TEST_CONFIG},
};

pub static TEST_QUERY_SUBCOMMAND: Test = Test {
    name: "test_query_subcommand",
    run: test_query_subcommand,
    config: &DEFAULT_TEST_CONFIG,
};

fn test_query_subcommand(env: &TestEnv) {
    let port = env.dns_server.port().to_string();

    let out = run_testbed([
        "query",
        "--server_port",
        &port,
        "--qtype",
        "SRV",
        "--qname",
        "_grpclb._tcp.srv-ipv4-single-target.resolver-tests.grpctestingexp.",
    ]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    println!("{stdout}");
    assert!(stdout.contains("NoError"), "unexpected status: {stdout}");
    assert!(stdout.contains("0 0 1234 balancer-for-srv-ipv4-single-target.resolver-tests.grpctestingexp."));

    let out = run_testbed([
        "query",
        "--server_port",
        &port,
        "--qtype",
        "TXT",
        "--qname",
        "_grpc_config.ipv4-config-with-round-robin.resolver-tests.grpctestingexp.",
        "--tcp",
    ]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    println!("{stdout}");
    assert!(stdout.contains(r#""grpc_config=[{"serviceConfig":{"loadBalancingPolicy":"round_robin"}}]""#));

    let out = run_testbed([
        "query",
        "--server_port",
        &port,
        "--qname",
        "no-such-name.resolver-tests.grpctestingexp.",
    ]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("NXDomain"));
}
