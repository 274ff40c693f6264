//! Runs the `check` subcommand the way a resolver test runner would.

use resolver_testbed::gen::resolver_test_cases;

use crate::{
    harness::{Test, TestEnv},
    tests::{helpers::run_testbed, DEFAULT_TEST_CONFIG},
};

pub static TEST_CHECK_SUBCOMMAND: Test = Test {
    name: "test_check_subcommand",
    run: test_check_subcommand,
    config: &DEFAULT_TEST_CONFIG,
};

fn test_check_subcommand(env: &TestEnv) {
    let server = env.dns_server.to_string();
    for case in resolver_test_cases(&env.records, &[]) {
        let out = run_testbed([
            "check",
            "--target_name",
            &case.target_name,
            "--expected_addrs",
            &case.expected_addrs,
            "--expected_chosen_service_config",
            &case.expected_chosen_service_config,
            "--expected_lb_policy",
            &case.expected_lb_policy,
            "--local_dns_server_address",
            &server,
        ]);
        println!("{}", String::from_utf8_lossy(&out.stdout));
        assert!(out.status.success(), "{} failed", case.target_name);
    }

    // A wrong expectation fails with status 1 and says what differed
    let out = run_testbed([
        "check",
        "--target_name",
        "ipv4-single-target.resolver-tests.grpctestingexp.",
        "--expected_addrs",
        "1.2.3.4:443,True",
        "--local_dns_server_address",
        &server,
    ]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("missing address 1.2.3.4:443,true"), "{stderr}");

    // With TXT lookups off, the service config is never seen
    let out = run_testbed([
        "check",
        "--target_name",
        "ipv4-config-with-round-robin.resolver-tests.grpctestingexp.",
        "--expected_addrs",
        "1.2.3.5:443,False",
        "--local_dns_server_address",
        &server,
        "--disable_txt_queries",
    ]);
    assert!(out.status.success());
}
