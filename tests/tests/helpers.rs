use std::net::{Ipv4Addr, UdpSocket};
use std::path::PathBuf;
use std::process::{Command, Output};

/// Path of the `resolver-testbed` binary under test.
pub fn testbed_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_resolver-testbed"))
}

/// Runs the `resolver-testbed` binary with `args`.
pub fn run_testbed<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = Command::new(testbed_bin())
        .args(args)
        .output()
        .expect("failed to run resolver-testbed");
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        eprintln!("resolver-testbed: {line}");
    }
    output
}

/// A loopback port nothing is bound to right now.
pub fn unused_port() -> u16 {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    socket.local_addr().unwrap().port()
}
