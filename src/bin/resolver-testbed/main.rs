//! Command-line front end: serve a records config, query it, run resolver
//! tests against it, and generate test data.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hickory_proto::rr::RecordType;
use resolver_testbed::{
    gen::{gcloud_transaction_commands, BuildData, TestCase},
    interop::{self, Language, TransportSecurity},
    latency::LatencyReport,
    probe::{self, Transport},
    records::{
        txt::{render_zone_file_txt, service_config_txt_data, ZoneFileFormat},
        RecordsConfig,
    },
    resolver::ResolveOptions,
    runner::{self, client::check_case_blocking, ClientCommand, DnsServerSource, RunnerConfig},
    sanity::{sanity_check, SanityError, TxtChunking},
    server::DnsServer,
    service_config::ClientIdentity,
    zone::Zone,
};
use std::{
    ffi::OsString,
    io::Read,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Parser)]
#[clap(
    name = "resolver-testbed",
    about = "Synthetic DNS zones and resolver component tests"
)]
struct Opt {
    /// Log more; repeat for even more.
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Debug, Subcommand)]
enum SubCommand {
    /// Serve a records config over UDP and TCP until killed.
    Serve(ServeCommand),
    /// Send a single query and print the answers.
    Query(QueryCommand),
    /// Resolve one target and compare it with expectations.
    Check(CheckCommand),
    /// Check that a DNS server serves every record of a records config.
    SanityCheck(SanityCheckCommand),
    /// Run every test case of a records config against a fresh server.
    RunTests(RunTestsCommand),
    /// Run an arbitrary client against a server for a records template.
    RunClient(RunClientCommand),
    /// Print build data for a records config.
    Gen(GenCommand),
    /// Encode a service config as zone file TXT data.
    Txt(TxtCommand),
    /// grpclb fallback interop test data.
    #[clap(subcommand)]
    Grpclb(GrpclbCommand),
    /// Summarize a latency log.
    Latency(LatencyCommand),
}

#[derive(Debug, Args)]
struct ServeCommand {
    #[clap(long = "host", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    host: IpAddr,
    #[clap(short, long = "port", default_value_t = 53)]
    port: u16,
    #[clap(short, long = "records_config_path")]
    records_config_path: PathBuf,
}

#[derive(Debug, Args)]
struct QueryCommand {
    #[clap(long = "server_host", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    server_host: IpAddr,
    #[clap(long = "server_port", default_value_t = 53)]
    server_port: u16,
    #[clap(long = "qtype", default_value = "A")]
    qtype: RecordType,
    #[clap(long = "qname")]
    qname: String,
    /// Query over TCP instead of UDP.
    #[clap(long)]
    tcp: bool,
    /// Seconds to wait for the answer.
    #[clap(long, default_value_t = 5)]
    timeout: u64,
}

#[derive(Debug, Args)]
struct CheckCommand {
    #[clap(long = "target_name")]
    target_name: String,
    #[clap(long = "expected_addrs", default_value = "")]
    expected_addrs: String,
    #[clap(long = "expected_chosen_service_config", default_value = "")]
    expected_chosen_service_config: String,
    #[clap(long = "expected_lb_policy", default_value = "")]
    expected_lb_policy: String,
    #[clap(long = "local_dns_server_address")]
    local_dns_server_address: SocketAddr,
    /// Skip the grpclb SRV lookup.
    #[clap(long = "disable_srv_queries")]
    disable_srv_queries: bool,
    /// Skip the service config TXT lookup.
    #[clap(long = "disable_txt_queries")]
    disable_txt_queries: bool,
    /// Language reported to service config choices.
    #[clap(long = "client_language", default_value = resolver_testbed::service_config::DEFAULT_CLIENT_LANGUAGE)]
    client_language: String,
    /// Hostname reported to service config choices.
    #[clap(long = "client_hostname")]
    client_hostname: Option<String>,
    /// Seconds resolution may take.
    #[clap(long, default_value_t = 60)]
    timeout: u64,
}

#[derive(Debug, Args)]
struct SanityCheckCommand {
    #[clap(short = 's', long = "server_host", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    server_host: IpAddr,
    #[clap(short = 'p', long = "server_port", default_value_t = 53)]
    server_port: u16,
    #[clap(long = "records_config_path")]
    records_config_path: PathBuf,
    /// How the server splits long TXT data into strings.
    #[clap(long = "txt_chunking", value_enum, default_value_t)]
    txt_chunking: TxtChunking,
}

#[derive(Debug, Args)]
struct DnsServerArgs {
    /// Server binary to run instead of the built-in server. It is passed
    /// `--port PORT --records_config_path PATH`.
    #[clap(long = "dns_server_bin")]
    dns_server_bin: Option<PathBuf>,
    /// Arguments passed to the server binary before the port and records
    /// flags.
    #[clap(long = "dns_server_arg", allow_hyphen_values = true)]
    dns_server_args: Vec<OsString>,
    /// Loopback port to serve on; 0 picks a free one.
    #[clap(long = "dns_server_port", default_value_t = 0)]
    dns_server_port: u16,
}

impl DnsServerArgs {
    fn source(&self) -> DnsServerSource {
        match &self.dns_server_bin {
            Some(bin) => DnsServerSource::External {
                bin: bin.clone(),
                args: self.dns_server_args.clone(),
            },
            None => DnsServerSource::InProcess,
        }
    }
}

#[derive(Debug, Args)]
struct RunTestsCommand {
    #[clap(long = "records_config_path")]
    records_config_path: PathBuf,
    #[clap(flatten)]
    dns_server: DnsServerArgs,
    /// Client binary run once per test case; resolves in process if unset.
    #[clap(long = "test_bin_path")]
    test_bin_path: Option<PathBuf>,
    /// Arguments passed to the client binary before the test case flags.
    #[clap(long = "test_bin_arg", allow_hyphen_values = true)]
    test_bin_args: Vec<OsString>,
    #[clap(long, default_value_t = 1)]
    parallelism: usize,
    /// Seconds one test case may take.
    #[clap(long = "per_test_timeout", default_value_t = 60)]
    per_test_timeout: u64,
}

#[derive(Debug, Args)]
struct RunClientCommand {
    /// Records config with `%(grpclb_port)s` placeholders.
    #[clap(long = "records_config_path")]
    records_config_path: PathBuf,
    #[clap(long = "grpclb_port")]
    grpclb_port: u16,
    #[clap(flatten)]
    dns_server: DnsServerArgs,
    /// Client command line, split on spaces.
    #[clap(long = "client_args", allow_hyphen_values = true)]
    client_args: String,
}

#[derive(Debug, Args)]
struct GenCommand {
    #[clap(long = "records_config_path")]
    records_config_path: PathBuf,
    /// Print the gcloud commands uploading the records instead.
    #[clap(long = "gcloud_commands")]
    gcloud_commands: bool,
    /// Write to a file instead of stdout.
    #[clap(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct TxtCommand {
    /// Service config JSON file; stdin if unset.
    input: Option<PathBuf>,
    #[clap(short = 'z', long = "zone_file_parser", value_enum, default_value_t)]
    zone_file_parser: ZoneFileFormat,
}

#[derive(Debug, Subcommand)]
enum GrpclbCommand {
    /// Print the scenario matrix as JSON.
    Scenarios,
    /// Print the records config of one interop run.
    Records(GrpclbRecordsCommand),
    /// Print the container jobs of one interop run as JSON.
    Plan(GrpclbPlanCommand),
}

#[derive(Debug, Args)]
struct GrpclbRecordsCommand {
    #[clap(long = "grpclb_ips", value_delimiter = ',')]
    grpclb_ips: Vec<IpAddr>,
    #[clap(long = "fallback_ips", value_delimiter = ',')]
    fallback_ips: Vec<IpAddr>,
}

#[derive(Debug, Args)]
struct GrpclbPlanCommand {
    /// Client languages; all of them if unset.
    #[clap(short, long = "language", value_enum)]
    languages: Vec<Language>,
    #[clap(long = "transport_security", value_enum, default_value_t = TransportSecurity::Insecure)]
    transport_security: TransportSecurity,
    #[clap(long = "server_image")]
    server_image: String,
    /// Client images are named `<prefix>_<language>`.
    #[clap(long = "client_image_prefix")]
    client_image_prefix: String,
}

#[derive(Debug, Args)]
struct LatencyCommand {
    /// JSON object of `id: [start, end]` pairs.
    log: PathBuf,
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
}

fn load_records(path: &Path) -> Result<RecordsConfig> {
    RecordsConfig::from_file(path).context("failed to load records config")
}

fn main() -> Result<ExitCode> {
    let opt = Opt::parse();
    init_logger(opt.verbose);

    match opt.subcommand {
        SubCommand::Serve(cmd) => {
            let records = load_records(&cmd.records_config_path)?;
            let zone = Zone::from_config(&records).context("failed to build zone")?;
            let handle = DnsServer::spawn(zone, SocketAddr::new(cmd.host, cmd.port))
                .with_context(|| format!("failed to listen on {}:{}", cmd.host, cmd.port))?;
            #[cfg(feature = "log")]
            tracing::info!(addr = %handle.local_addr(), "serving");
            handle.wait().context("DNS server failed")?;
        }
        SubCommand::Query(cmd) => {
            let server = SocketAddr::new(cmd.server_host, cmd.server_port);
            let transport = match cmd.tcp {
                true => Transport::Tcp,
                false => Transport::Udp,
            };
            let response = probe::query(
                server,
                &cmd.qname,
                cmd.qtype,
                transport,
                Duration::from_secs(cmd.timeout),
            )
            .with_context(|| format!("query for {} {} failed", cmd.qname, cmd.qtype))?;
            println!(";; status: {:?}", response.response_code());
            for record in response.answers() {
                println!("{}", probe::format_answer(record));
            }
        }
        SubCommand::Check(cmd) => {
            let case = TestCase {
                target_name: cmd.target_name,
                expected_addrs: cmd.expected_addrs,
                expected_chosen_service_config: cmd.expected_chosen_service_config,
                expected_lb_policy: cmd.expected_lb_policy,
            };
            let options = ResolveOptions {
                enable_srv: !cmd.disable_srv_queries,
                enable_txt: !cmd.disable_txt_queries,
                client: ClientIdentity {
                    language: cmd.client_language,
                    hostname: cmd.client_hostname,
                },
            };
            match check_case_blocking(
                cmd.local_dns_server_address,
                &case,
                &options,
                Duration::from_secs(cmd.timeout),
            ) {
                Ok(resolution) => {
                    for addr in &resolution.addresses {
                        println!("{addr}");
                    }
                    println!("{}: passed", case.target_name);
                }
                Err(e) => {
                    eprintln!("{}: {e}", case.target_name);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        SubCommand::SanityCheck(cmd) => {
            let records = load_records(&cmd.records_config_path)?;
            let server = SocketAddr::new(cmd.server_host, cmd.server_port);
            match sanity_check(&records, server, cmd.txt_chunking) {
                Ok(checked) => println!("{checked} record sets served as declared by {server}"),
                Err(SanityError::Mismatches(mismatches)) => {
                    for mismatch in &mismatches {
                        eprint!("{mismatch}");
                    }
                    eprintln!("{} record sets differ at {server}", mismatches.len());
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e).context("sanity check failed"),
            }
        }
        SubCommand::RunTests(cmd) => {
            let records = load_records(&cmd.records_config_path)?;
            let config = RunnerConfig {
                dns_server: cmd.dns_server.source(),
                dns_server_port: cmd.dns_server.dns_server_port,
                client: match cmd.test_bin_path {
                    Some(bin) => ClientCommand::External {
                        bin,
                        args: cmd.test_bin_args,
                    },
                    None => ClientCommand::InProcess,
                },
                parallelism: cmd.parallelism,
                per_test_timeout: Duration::from_secs(cmd.per_test_timeout),
                ..RunnerConfig::new(records)
            };
            let report = match runner::run(&config) {
                Err(runner::RunnerError::NotServing {
                    source,
                    server_log: Some(log),
                }) => {
                    eprintln!("DNS server output:\n{log}");
                    bail!("DNS server is not serving: {source}");
                }
                other => other.context("failed to run resolver tests")?,
            };
            report.print_summary();
            return Ok(ExitCode::from(report.exit_code()));
        }
        SubCommand::RunClient(cmd) => {
            let code = runner::run_client_with_dns_server(
                &cmd.records_config_path,
                cmd.grpclb_port,
                &cmd.dns_server.source(),
                cmd.dns_server.dns_server_port,
                &cmd.client_args,
            )
            .context("failed to run client")?;
            #[cfg(feature = "log")]
            tracing::info!(code, "client exited");
            return Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)));
        }
        SubCommand::Gen(cmd) => {
            let records = load_records(&cmd.records_config_path)?;
            let data = BuildData::new(&records).context("failed to generate build data")?;
            let out = match cmd.gcloud_commands {
                true => {
                    let mut lines = gcloud_transaction_commands(
                        &data.resolver_gce_integration_tests_zone_id,
                        &data.resolver_tests_common_zone_name,
                        &data.all_integration_test_records,
                    )
                    .join("\n");
                    lines.push('\n');
                    lines
                }
                false => data.to_yaml()?,
            };
            match cmd.output {
                Some(path) => std::fs::write(&path, out)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => print!("{out}"),
            }
        }
        SubCommand::Txt(cmd) => {
            let json = match cmd.input {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut json = String::new();
                    std::io::stdin().read_to_string(&mut json)?;
                    json
                }
            };
            let chunks = service_config_txt_data(&json, cmd.zone_file_parser)?;
            println!("{}", render_zone_file_txt(&chunks));
        }
        SubCommand::Grpclb(GrpclbCommand::Scenarios) => {
            println!("{}", interop::scenarios_json(&interop::scenarios())?);
        }
        SubCommand::Grpclb(GrpclbCommand::Records(cmd)) => {
            let records = interop::lb_records_config(&cmd.grpclb_ips, &cmd.fallback_ips);
            print!("{}", records.to_yaml()?);
        }
        SubCommand::Grpclb(GrpclbCommand::Plan(cmd)) => {
            let languages = match cmd.languages.is_empty() {
                true => Language::ALL.to_vec(),
                false => cmd.languages,
            };
            let jobs = interop::launch_plan(
                &languages,
                cmd.transport_security,
                &cmd.server_image,
                |language| format!("{}_{}", cmd.client_image_prefix, language.safename()),
            );
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        SubCommand::Latency(cmd) => {
            let json = std::fs::read_to_string(&cmd.log)
                .with_context(|| format!("failed to read {}", cmd.log.display()))?;
            let report = LatencyReport::from_json(&json)?;
            println!(
                "count={} min={} median={} max={}",
                report.count, report.min, report.median, report.max
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}
