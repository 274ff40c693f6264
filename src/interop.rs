//! grpclb interop scenarios and the container launch plans that run them.
//!
//! Nothing here starts a container. The functions build the `docker run`
//! command lines a CI job would execute.

use crate::records::{RecordKind, RecordSpec, RecordsConfig, TestGroup};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, net::IpAddr, time::Duration};

/// Zone the interop client resolves its server name in.
pub const LB_INTEROP_ZONE: &str = "test.google.fr.";

/// Port every interop server listens on inside its container.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// TTL of the interop DNS records.
const LB_RECORD_TTL: u32 = 2100;

/// Working directory root inside interop images.
pub const DOCKER_WORKDIR_ROOT: &str = "/var/local/git/grpc";

/// Root of the Go checkout inside interop images.
const GO_REPO_ROOT: &str = "/go/src/google.golang.org/grpc";

/// Test case every interop client runs.
pub const INTEROP_TEST_CASE: &str = "empty_unary";

/// How long a client container may run.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// How long a server container may run.
pub const SERVER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How a client or server secures its connections.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TransportSecurity {
    /// Plaintext.
    Insecure,
    /// Application Layer Transport Security.
    Alts,
    /// TLS with the test CA.
    Tls,
}

impl TransportSecurity {
    /// All options, in the order scenarios are generated.
    pub const ALL: [Self; 3] = [Self::Insecure, Self::Alts, Self::Tls];

    /// Command-line flags selecting this security on interop binaries.
    pub fn flags(self) -> &'static [&'static str] {
        match self {
            Self::Tls => &["--use_tls=true"],
            Self::Alts => &["--use_tls=false", "--use_alts=true"],
            Self::Insecure => &["--use_tls=false"],
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Insecure => "insecure",
            Self::Alts => "alts",
            Self::Tls => "tls",
        }
    }
}

impl fmt::Display for TransportSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of one server in a scenario.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Security the server uses.
    pub transport_sec: TransportSecurity,
}

/// One grpclb interop scenario.
///
/// Fields are declared alphabetically so the JSON form has sorted keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Backends the balancer hands out.
    pub backend_configs: Vec<ServerConfig>,
    /// Balancers published in DNS.
    pub balancer_configs: Vec<ServerConfig>,
    /// Fallback servers published in DNS.
    pub fallback_configs: Vec<ServerConfig>,
    /// Unique scenario name.
    pub name: String,
    /// Security the client uses.
    pub transport_sec: TransportSecurity,
}

fn servers(securities: impl IntoIterator<Item = TransportSecurity>) -> Vec<ServerConfig> {
    securities
        .into_iter()
        .map(|transport_sec| ServerConfig { transport_sec })
        .collect()
}

fn scenario(
    name: &str,
    sec: TransportSecurity,
    balancers: Vec<ServerConfig>,
    backends: Vec<ServerConfig>,
) -> Scenario {
    Scenario {
        name: format!("{name}_{sec}"),
        transport_sec: sec,
        balancer_configs: balancers,
        backend_configs: backends,
        fallback_configs: servers([sec]),
    }
}

/// The full scenario matrix.
pub fn scenarios() -> Vec<Scenario> {
    use TransportSecurity::{Alts, Insecure, Tls};
    let secure = [Alts, Tls];
    let mut all = Vec::new();
    for sec in TransportSecurity::ALL {
        all.push(scenario(
            "client_referred_to_backend",
            sec,
            servers([sec]),
            servers([sec]),
        ));
    }
    for sec in TransportSecurity::ALL {
        all.push(scenario(
            "client_referred_to_backend_multiple_backends",
            sec,
            servers([sec]),
            servers([sec; 5]),
        ));
    }
    for sec in TransportSecurity::ALL {
        all.push(scenario(
            "client_falls_back_because_no_backends",
            sec,
            servers([sec]),
            Vec::new(),
        ));
    }
    for sec in secure {
        all.push(scenario(
            "client_falls_back_because_balancer_connection_broken",
            sec,
            servers([Insecure]),
            Vec::new(),
        ));
    }
    for sec in TransportSecurity::ALL {
        all.push(scenario(
            "client_referred_to_backend_multiple_balancers",
            sec,
            servers([sec; 5]),
            Vec::new(),
        ));
    }
    for sec in secure {
        all.push(scenario(
            "client_referred_to_backend_multiple_balancers_one_works",
            sec,
            servers([sec, Insecure, Insecure, Insecure, Insecure]),
            Vec::new(),
        ));
    }
    all
}

/// Renders scenarios as JSON indented by four spaces.
pub fn scenarios_json(scenarios: &[Scenario]) -> Result<String, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    scenarios.serialize(&mut serializer)?;
    // The serializer only ever writes UTF-8
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Records for the interop client's DNS server: the balancer behind an SRV
/// record and the fallback servers behind the server name itself.
pub fn lb_records_config(grpclb_ips: &[IpAddr], fallback_ips: &[IpAddr]) -> RecordsConfig {
    let a_records = |ips: &[IpAddr]| {
        ips.iter()
            .map(|ip| {
                let kind = match ip {
                    IpAddr::V4(_) => RecordKind::A,
                    IpAddr::V6(_) => RecordKind::Aaaa,
                };
                RecordSpec::new(kind, ip.to_string(), LB_RECORD_TTL)
            })
            .collect::<Vec<_>>()
    };
    let mut group = TestGroup::default();
    group.records.insert(
        String::from("_grpclb._tcp.server"),
        vec![RecordSpec::new(
            RecordKind::Srv,
            format!("0 0 {DEFAULT_SERVER_PORT} balancer"),
            LB_RECORD_TTL,
        )],
    );
    group
        .records
        .insert(String::from("balancer"), a_records(grpclb_ips));
    group
        .records
        .insert(String::from("server"), a_records(fallback_ips));
    RecordsConfig {
        common_zone_name: LB_INTEROP_ZONE.to_string(),
        test_groups: vec![group],
    }
}

/// Wraps a command line in `docker run`.
///
/// `cwd` is resolved against [`DOCKER_WORKDIR_ROOT`] unless absolute.
pub fn docker_run_cmdline(
    cmdline: &[String],
    image: &str,
    docker_args: &[String],
    cwd: Option<&str>,
    environ: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut out: Vec<String> = ["docker", "run", "-i", "--rm=true"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for (key, value) in environ {
        out.push(String::from("-e"));
        out.push(format!("{key}={value}"));
    }
    let workdir = match cwd {
        Some(cwd) if cwd.starts_with('/') => cwd.to_string(),
        Some(cwd) => format!("{DOCKER_WORKDIR_ROOT}/{cwd}"),
        None => DOCKER_WORKDIR_ROOT.to_string(),
    };
    out.push(String::from("-w"));
    out.push(workdir);
    out.extend(docker_args.iter().cloned());
    out.push(image.to_string());
    out.extend(cmdline.iter().cloned());
    out
}

/// Runs a command line through `bash -c`.
pub fn bash_cmdline(cmdline: &[String]) -> Vec<String> {
    vec![String::from("bash"), String::from("-c"), cmdline.join(" ")]
}

/// Languages with interop clients and servers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum Language {
    /// C++.
    #[value(name = "c++")]
    Cxx,
    /// Go.
    Go,
    /// Java.
    Java,
}

impl Language {
    /// All languages.
    pub const ALL: [Self; 3] = [Self::Cxx, Self::Go, Self::Java];

    /// Name safe to use in container and image names.
    pub fn safename(self) -> &'static str {
        match self {
            Self::Cxx => "cxx",
            Self::Go => "go",
            Self::Java => "java",
        }
    }

    /// Working directory of the client, relative to [`DOCKER_WORKDIR_ROOT`].
    pub fn client_cwd(self) -> Option<&'static str> {
        match self {
            Self::Cxx => None,
            Self::Go => Some("/go/src/google.golang.org/grpc/interop/client"),
            Self::Java => Some("../grpc-java"),
        }
    }

    /// Working directory of the server, relative to [`DOCKER_WORKDIR_ROOT`].
    pub fn server_cwd(self) -> Option<&'static str> {
        match self {
            Self::Cxx => None,
            Self::Go => Some("/go/src/google.golang.org/grpc/interop/server"),
            Self::Java => Some("../grpc-java"),
        }
    }

    fn with_prefix(prefix: &[&str], args: Vec<String>) -> Vec<String> {
        prefix.iter().map(|s| s.to_string()).chain(args).collect()
    }

    /// Interop client command line.
    pub fn client_cmd(self, args: Vec<String>) -> Vec<String> {
        match self {
            Self::Cxx => Self::with_prefix(&["bins/opt/interop_client"], args),
            Self::Go => Self::with_prefix(&["go", "run", "client.go"], args),
            Self::Java => Self::with_prefix(&["./run-test-client.sh"], args),
        }
    }

    /// Interop server command line.
    pub fn server_cmd(self, args: Vec<String>) -> Vec<String> {
        match self {
            Self::Cxx => Self::with_prefix(&["bins/opt/interop_server"], args),
            Self::Go => Self::with_prefix(&["go", "run", "server.go"], args),
            Self::Java => Self::with_prefix(&["./run-test-server.sh"], args),
        }
    }

    /// Environment every job of this language runs with.
    pub fn global_env(self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cxx => "c++",
            Self::Go => "go",
            Self::Java => "java",
        })
    }
}

/// One container to launch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    /// Short human-readable job name.
    pub shortname: String,
    /// Full `docker run` command line.
    pub cmdline: Vec<String>,
    /// Name given to the container, used to kill it.
    pub container_name: String,
    /// How long the job may run.
    #[serde(with = "seconds")]
    pub timeout: Duration,
}

mod seconds {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// A container name with a random suffix.
pub fn random_name(prefix: &str, rng: &mut impl Rng) -> String {
    format!("{prefix}_{:016x}", rng.random::<u64>())
}

/// Job running `language`'s interop client against `server_host:server_port`.
pub fn client_jobspec(
    language: Language,
    server_host: &str,
    server_port: u16,
    docker_image: &str,
    security: TransportSecurity,
    rng: &mut impl Rng,
) -> JobSpec {
    let mut args = vec![
        String::from("--server_host_override=foo.test.google.fr"),
        String::from("--use_test_ca=true"),
    ];
    args.extend(security.flags().iter().map(|s| s.to_string()));
    args.push(format!("--test_case={INTEROP_TEST_CASE}"));
    args.push(format!("--server_host={server_host}"));
    args.push(format!("--server_port={server_port}"));

    let container_name = random_name(&format!("lb_interop_client_{}", language.safename()), rng);
    let cmdline = docker_run_cmdline(
        &bash_cmdline(&language.client_cmd(args)),
        docker_image,
        &[String::from("--net=host"), format!("--name={container_name}")],
        language.client_cwd(),
        &language.global_env(),
    );
    JobSpec {
        shortname: format!("lb_interop:{language}:{security}:{INTEROP_TEST_CASE}"),
        cmdline,
        container_name,
        timeout: CLIENT_TIMEOUT,
    }
}

/// Job running an interop server (backend, fallback or balancer) binary.
pub fn server_jobspec(
    name: &str,
    server_cmd: Vec<String>,
    docker_image: &str,
    cwd: Option<&str>,
    security: TransportSecurity,
    rng: &mut impl Rng,
) -> JobSpec {
    let mut cmd = server_cmd;
    cmd.push(format!("--port={DEFAULT_SERVER_PORT}"));
    cmd.extend(security.flags().iter().map(|s| s.to_string()));

    let container_name = random_name(&format!("lb_interop_server_{name}"), rng);
    let cmdline = docker_run_cmdline(
        &bash_cmdline(&cmd),
        docker_image,
        &[
            format!("--name={container_name}"),
            String::from("-p"),
            DEFAULT_SERVER_PORT.to_string(),
        ],
        cwd,
        &BTreeMap::new(),
    );
    JobSpec {
        shortname: format!("lb_interop_server_{name}"),
        cmdline,
        container_name,
        timeout: SERVER_TIMEOUT,
    }
}

/// Jobs for one interop run: fake backend, fallback and balancer servers,
/// then one client per language reaching the server name through DNS.
pub fn launch_plan(
    languages: &[Language],
    security: TransportSecurity,
    server_image: &str,
    client_image: impl Fn(Language) -> String,
) -> Vec<JobSpec> {
    let mut rng = rand::rng();
    let go_server = vec![format!("{GO_REPO_ROOT}/interop/server/server")];
    let mut jobs = vec![
        server_jobspec("backend", go_server.clone(), server_image, None, security, &mut rng),
        server_jobspec("fallback", go_server, server_image, None, security, &mut rng),
        server_jobspec(
            "grpclb",
            vec![format!("{GO_REPO_ROOT}/interop/fake_grpclb/fake_grpclb")],
            server_image,
            None,
            security,
            &mut rng,
        ),
    ];
    let server_host = format!("server.{}", LB_INTEROP_ZONE.trim_end_matches('.'));
    jobs.extend(languages.iter().map(|&language| {
        client_jobspec(
            language,
            &server_host,
            DEFAULT_SERVER_PORT,
            &client_image(language),
            security,
            &mut rng,
        )
    }));
    jobs
}
