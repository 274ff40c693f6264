use std::net::{Ipv4Addr, SocketAddr};
use std::process::{Command, ExitCode};
use std::time::Duration;

use owo_colors::OwoColorize;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use resolver_testbed::{
    records::RecordsConfig,
    runner::process::{run_with_timeout, Finished},
    server::DnsServer,
    zone::Zone,
};

/// Test harness implementation.
pub struct TestHarness;

impl TestHarness {
    /// Pass the test name as an argument to the test binary to run only that test.
    /// This is used internally by the test harness itself, not humans.
    const TEST_ARG: &str = "--test-name=";

    /// How long a single test process may run.
    const TEST_TIMEOUT: Duration = Duration::from_secs(120);

    /// Setup the test harness.
    /// Run all the tests or run a single test if a test name is provided.
    pub fn setup(tests: &[&Test]) -> ExitCode {
        let args: Vec<String> = std::env::args().collect();
        match args.get(1).and_then(|s| s.strip_prefix(Self::TEST_ARG)) {
            Some(test_name) => {
                Self::run_one(tests, test_name);
                ExitCode::SUCCESS
            }
            None => Self::run_all(tests),
        }
    }

    /// Runs one test in this process, next to a DNS server for its records.
    fn run_one(tests: &[&Test], test_name: &str) {
        let test = tests
            .iter()
            .find(|t| t.name == test_name)
            .unwrap_or_else(|| panic!("unknown test: {test_name}"));
        let records = test.config.records();
        let zone = Zone::from_config(&records).expect("invalid test records");
        let dns = DnsServer::spawn(zone, SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .expect("failed to start DNS server");
        (test.run)(&TestEnv {
            dns_server: dns.local_addr(),
            records,
        });
    }

    /// Re-runs this binary once per test, in parallel, and prints a summary.
    fn run_all(tests: &[&Test]) -> ExitCode {
        let self_exe = std::env::current_exe().unwrap();
        let results: Vec<(&str, std::io::Result<Finished>)> = tests
            .par_iter()
            .map(|test| {
                let mut cmd = Command::new(&self_exe);
                cmd.arg(format!("{}{}", Self::TEST_ARG, test.name));
                (test.name, run_with_timeout(&mut cmd, Self::TEST_TIMEOUT))
            })
            .collect();

        let passed = results
            .into_iter()
            .filter(|(name, result)| Self::report(name, result))
            .count();
        println!("{}{passed}", "passed: ".green());
        let failed = tests.len() - passed;
        if failed > 0 {
            println!("{}{failed}", "failed: ".red());
            ExitCode::FAILURE
        } else {
            println!("{}", "all tests passed".green());
            ExitCode::SUCCESS
        }
    }

    /// Prints a test's output and outcome, returning whether it passed.
    fn report(test_name: &str, result: &std::io::Result<Finished>) -> bool {
        let finished = match result {
            Ok(finished) => finished,
            Err(e) => {
                eprintln!("{}", format!("{test_name}: error: {e}").red());
                println!("{}{test_name}\n", "failed: ".red());
                return false;
            }
        };
        for line in finished.stdout.lines() {
            println!("{test_name}: stdout: {line}");
        }
        for line in finished.stderr.lines() {
            eprintln!("{}", format!("{test_name}: stderr: {line}").yellow());
        }
        if finished.timed_out() {
            eprintln!("{}", format!("{test_name}: killed after {:?}", Self::TEST_TIMEOUT).red());
        }
        let elapsed = finished.elapsed;
        if finished.success() {
            println!("{}{test_name} ({elapsed:?})\n", "passed: ".green());
        } else {
            println!("{}{test_name} ({elapsed:?})\n", "failed: ".red());
        }
        finished.success()
    }
}

/// Integration test definition struct.
/// Create one of these to each new integration test.
pub struct Test {
    /// Unique name of the test
    pub name: &'static str,
    /// Function to run the test
    pub run: fn(&TestEnv),
    /// Test configuration
    pub config: &'static TestConfig,
}

/// Test configuration struct.
/// Use this to define the state of the world for a test.
#[non_exhaustive]
pub struct TestConfig {
    /// Records config served by the test's DNS server
    pub records_yaml: &'static str,
}

impl TestConfig {
    /// Create a new test configuration.
    pub const fn new(records_yaml: &'static str) -> Self {
        Self { records_yaml }
    }

    /// Parse the records config.
    pub fn records(&self) -> RecordsConfig {
        RecordsConfig::from_yaml_str(self.records_yaml).expect("invalid test records config")
    }
}

/// What a running test gets to work with.
pub struct TestEnv {
    /// Address of a DNS server serving the test's records
    pub dns_server: SocketAddr,
    /// The test's records config
    pub records: RecordsConfig,
}
