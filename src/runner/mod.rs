//! Resolver component test runner.
//!
//! The runner starts a DNS server for a records config, waits until it
//! answers, runs one resolver client per test case against it, and
//! summarizes the results.

use crate::{
    gen::{resolver_test_cases, TestCase},
    probe::{self, ProbeError, HEALTH_CHECK_ATTEMPTS, HEALTH_CHECK_INTERVAL},
    records::{LoadError, RecordsConfig},
    resolver::ResolveOptions,
    server::{DnsServer, DnsServerHandle},
    zone::{Zone, ZoneError},
};
use owo_colors::OwoColorize;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::{
    ffi::OsString,
    io::{self, Write},
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    path::PathBuf,
    process::Command,
    time::{Duration, Instant},
};
use tempfile::NamedTempFile;

pub mod client;
pub mod process;

use process::{run_with_timeout, spawn_in_background, BackgroundProcess};

/// Environment every client launched by [`run_client_with_dns_server`] gets.
pub const CLIENT_ENV: &[(&str, &str)] = &[
    ("GRPC_GO_LOG_VERBOSITY_LEVEL", "3"),
    ("GRPC_GO_LOG_SEVERITY_LEVEL", "INFO"),
];

/// Errors that stop a run before or outside the test cases.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The records config couldn't be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// The records config couldn't be turned into a zone.
    #[error(transparent)]
    Zone(#[from] ZoneError),
    /// Starting a process or server failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The records config couldn't be written for an external server.
    #[error("serializing records config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// The DNS server never became healthy.
    #[error("DNS server is not serving: {source}")]
    NotServing {
        /// Health check failure.
        source: ProbeError,
        /// Output of an external server, if there was one.
        server_log: Option<String>,
    },
    /// The worker pool couldn't be built.
    #[error("building worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    /// A client command line was empty.
    #[error("empty client command")]
    EmptyCommand,
}

/// Where the DNS server comes from.
#[derive(Clone, Debug, Default)]
pub enum DnsServerSource {
    /// An in-process [`DnsServer`].
    #[default]
    InProcess,
    /// A server binary, run as
    /// `bin ARGS... --port PORT --records_config_path PATH`.
    External {
        /// Server executable.
        bin: PathBuf,
        /// Arguments placed before the port and records flags.
        args: Vec<OsString>,
    },
}

/// Which client resolves the test targets.
#[derive(Clone, Debug, Default)]
pub enum ClientCommand {
    /// Resolve in this process with the built-in resolver.
    #[default]
    InProcess,
    /// Run a client binary per case as
    /// `bin ARGS... --target_name NAME --expected_addrs ADDRS ...`.
    External {
        /// Client executable.
        bin: PathBuf,
        /// Arguments placed before the test case flags.
        args: Vec<OsString>,
    },
}

/// Everything a run needs.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Records to serve and test cases to run.
    pub records: RecordsConfig,
    /// DNS server to run.
    pub dns_server: DnsServerSource,
    /// Loopback port for the DNS server; 0 picks a free one.
    pub dns_server_port: u16,
    /// Client to run per case.
    pub client: ClientCommand,
    /// Options for the in-process client.
    pub resolve_options: ResolveOptions,
    /// Test cases run at once.
    pub parallelism: usize,
    /// How long one case may take.
    pub per_test_timeout: Duration,
}

impl RunnerConfig {
    /// A config running every case of `records` with in-process server and
    /// client.
    pub fn new(records: RecordsConfig) -> Self {
        Self {
            records,
            dns_server: DnsServerSource::default(),
            dns_server_port: 0,
            client: ClientCommand::default(),
            resolve_options: ResolveOptions::default(),
            parallelism: 1,
            per_test_timeout: Duration::from_secs(60),
        }
    }
}

/// A DNS server started for a run, stopped when dropped.
pub enum RunningDnsServer {
    /// Served from this process.
    InProcess(DnsServerHandle),
    /// Served by a child process.
    External {
        /// The server process.
        process: BackgroundProcess,
        /// Address it was told to listen on.
        addr: SocketAddr,
        /// Records config handed to it; removed on drop.
        _records: NamedTempFile,
    },
}

impl RunningDnsServer {
    /// Starts a server for `records` on `127.0.0.1:port`.
    pub fn start(
        source: &DnsServerSource,
        records: &RecordsConfig,
        port: u16,
    ) -> Result<Self, RunnerError> {
        match source {
            DnsServerSource::InProcess => {
                let zone = Zone::from_config(records)?;
                let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
                Ok(Self::InProcess(DnsServer::spawn(zone, addr)?))
            }
            DnsServerSource::External { bin, args } => {
                let port = match port {
                    0 => unused_port()?,
                    port => port,
                };
                let mut file = NamedTempFile::new()?;
                file.write_all(records.to_yaml()?.as_bytes())?;
                file.flush()?;
                let process = spawn_in_background(
                    Command::new(bin)
                        .args(args)
                        .arg("--port")
                        .arg(port.to_string())
                        .arg("--records_config_path")
                        .arg(file.path()),
                )?;
                Ok(Self::External {
                    process,
                    addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
                    _records: file,
                })
            }
        }
    }

    /// Address the server answers on.
    pub fn addr(&self) -> SocketAddr {
        match self {
            Self::InProcess(handle) => handle.local_addr(),
            Self::External { addr, .. } => *addr,
        }
    }

    /// Waits for the server to pass a health check. An external server's
    /// output is attached to the error when it doesn't.
    pub fn wait_until_serving(&self) -> Result<(), RunnerError> {
        probe::wait_until_serving(self.addr(), HEALTH_CHECK_ATTEMPTS, HEALTH_CHECK_INTERVAL)
            .map_err(|source| RunnerError::NotServing {
                source,
                server_log: match self {
                    Self::InProcess(_) => None,
                    Self::External { process, .. } => process.read_log().ok(),
                },
            })
    }
}

/// Finds a loopback port that is currently free for both UDP and TCP.
fn unused_port() -> io::Result<u16> {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = socket.local_addr()?.port();
    std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
    Ok(port)
}

/// Outcome of one test case.
#[derive(Debug, Clone)]
pub struct CaseOutcome {
    /// The case that ran.
    pub case: TestCase,
    /// Whether the client reported success.
    pub passed: bool,
    /// Client output or failure description.
    pub output: String,
    /// How long the case took.
    pub elapsed: Duration,
}

/// Outcomes of a whole run.
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// One outcome per case, in case order.
    pub outcomes: Vec<CaseOutcome>,
}

impl Report {
    /// Number of failed cases.
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed).count()
    }

    /// Process exit status for the run: the failure count, capped at 255.
    pub fn exit_code(&self) -> u8 {
        u8::try_from(self.failures()).unwrap_or(u8::MAX)
    }

    /// Prints every outcome and a colored summary.
    pub fn print_summary(&self) {
        for outcome in &self.outcomes {
            let name = &outcome.case.target_name;
            for line in outcome.output.lines() {
                eprintln!("{name}: {line}");
            }
            if outcome.passed {
                println!("{}{name} ({:?})", "passed: ".green(), outcome.elapsed);
            } else {
                println!("{}{name} ({:?})", "failed: ".red(), outcome.elapsed);
            }
        }
        let failed = self.failures();
        println!("{}{}", "passed: ".green(), self.outcomes.len() - failed);
        if failed > 0 {
            println!("{}{failed}", "failed: ".red());
        } else {
            println!("{}", "all tests passed".green());
        }
    }
}

fn run_case(config: &RunnerConfig, server: SocketAddr, case: &TestCase) -> CaseOutcome {
    let start = Instant::now();
    #[cfg(feature = "log")]
    tracing::info!(name = %case.target_name, "running test");
    let (passed, output) = match &config.client {
        ClientCommand::InProcess => match client::check_case_blocking(
            server,
            case,
            &config.resolve_options,
            config.per_test_timeout,
        ) {
            Ok(resolution) => {
                let addrs: Vec<String> =
                    resolution.addresses.iter().map(ToString::to_string).collect();
                (true, format!("resolved {}", addrs.join(";")))
            }
            Err(e) => (false, e.to_string()),
        },
        ClientCommand::External { bin, args } => {
            let mut cmd = Command::new(bin);
            cmd.args(args)
                .arg("--target_name")
                .arg(&case.target_name)
                .arg("--expected_addrs")
                .arg(&case.expected_addrs)
                .arg("--expected_chosen_service_config")
                .arg(&case.expected_chosen_service_config)
                .arg("--expected_lb_policy")
                .arg(&case.expected_lb_policy)
                .arg("--local_dns_server_address")
                .arg(server.to_string());
            match run_with_timeout(&mut cmd, config.per_test_timeout) {
                Ok(finished) => {
                    let mut output = finished.stdout.clone();
                    output.push_str(&finished.stderr);
                    if finished.timed_out() {
                        output.push_str(&format!("killed after {:?}\n", config.per_test_timeout));
                    }
                    (finished.success(), output)
                }
                Err(e) => (false, format!("failed to run {}: {e}", bin.display())),
            }
        }
    };
    CaseOutcome {
        case: case.clone(),
        passed,
        output,
        elapsed: start.elapsed(),
    }
}

/// Runs every test case in `config.records` against a freshly started DNS
/// server.
pub fn run(config: &RunnerConfig) -> Result<Report, RunnerError> {
    let server =
        RunningDnsServer::start(&config.dns_server, &config.records, config.dns_server_port)?;
    server.wait_until_serving()?;
    let addr = server.addr();

    let cases = resolver_test_cases(&config.records, &[]);
    #[cfg(feature = "log")]
    tracing::info!(cases = cases.len(), %addr, "running resolver tests");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.parallelism.max(1))
        .build()?;
    let outcomes = pool.install(|| {
        cases
            .par_iter()
            .map(|case| run_case(config, addr, case))
            .collect()
    });
    drop(server);
    Ok(Report { outcomes })
}

/// Starts a DNS server for a records template with the grpclb port filled
/// in, then runs `client_cmdline` (split on spaces) against it with
/// [`CLIENT_ENV`] added, returning the client's exit code.
pub fn run_client_with_dns_server(
    records_template: &std::path::Path,
    grpclb_port: u16,
    dns_server: &DnsServerSource,
    dns_server_port: u16,
    client_cmdline: &str,
) -> Result<i32, RunnerError> {
    let records = RecordsConfig::from_template_file(records_template, grpclb_port)?;
    #[cfg(feature = "log")]
    tracing::info!(records = %records.to_yaml()?, "DNS server records config");

    let server = RunningDnsServer::start(dns_server, &records, dns_server_port)?;
    server.wait_until_serving()?;

    let mut args = client_cmdline.split(' ').filter(|a| !a.is_empty());
    let program = args.next().ok_or(RunnerError::EmptyCommand)?;
    #[cfg(feature = "log")]
    tracing::info!(client = client_cmdline, dns_server = %server.addr(), "running client");
    let status = Command::new(program)
        .args(args)
        .envs(CLIENT_ENV.iter().copied())
        .status()?;
    drop(server);
    Ok(status.code().unwrap_or(1))
}
