//! Runs every test case with the built-in server and client.

use std::time::Duration;

use resolver_testbed::runner::{run, RunnerConfig};

use crate::{
    harness::{Test, TestEnv},
    tests::DEFAULT_TEST_CONFIG,
};

pub static TEST_RUNNER_IN_PROCESS: Test = Test {
    name: "test_runner_in_process",
    run: test_runner_in_process,
    config: &DEFAULT_TEST_CONFIG,
};

fn test_runner_in_process(env: &TestEnv) {
    let config = RunnerConfig {
        parallelism: 4,
        per_test_timeout: Duration::from_secs(30),
        ..RunnerConfig::new(env.records.clone())
    };
    let report = run(&config).expect("runner failed");
    report.print_summary();
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.failures(), 0);
    assert_eq!(report.exit_code(), 0);
}
