//! One-shot DNS queries and the server health check.

use crate::zone::{HEALTH_CHECK_ADDR, HEALTH_CHECK_NAME};
use hickory_proto::{
    op::{Message, MessageType, OpCode, Query},
    rr::{Name, RData, Record, RecordType},
    serialize::binary::{BinDecodable, BinEncodable},
    ProtoError,
};
use std::{
    io::{self, Read, Write},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket},
    str::FromStr,
    time::Duration,
};

/// Number of health check attempts made by [`wait_until_serving`] by default.
pub const HEALTH_CHECK_ATTEMPTS: usize = 30;

/// Pause between health check attempts.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Errors encountered while probing a DNS server.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Socket errors.
    #[error("io error talking to {server}: {source}")]
    Io {
        /// Server being probed.
        server: SocketAddr,
        /// Underlying error.
        source: io::Error,
    },
    /// The query or answer could not be encoded or decoded.
    #[error(transparent)]
    Proto(#[from] ProtoError),
    /// The answer didn't match the query.
    #[error("answer id {got} does not match query id {want}")]
    IdMismatch {
        /// Id of the query.
        want: u16,
        /// Id found in the answer.
        got: u16,
    },
    /// The server never passed the health check.
    #[error("DNS server at {server} failed {attempts} health checks")]
    NotServing {
        /// Server being probed.
        server: SocketAddr,
        /// How many checks were made.
        attempts: usize,
    },
}

/// Transport used for a query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Transport {
    /// A single datagram.
    #[default]
    Udp,
    /// A length-prefixed message on a fresh connection.
    Tcp,
}

/// Sends one query for `name`/`record_type` to `server` and returns the
/// decoded answer.
pub fn query(
    server: SocketAddr,
    name: &str,
    record_type: RecordType,
    transport: Transport,
    timeout: Duration,
) -> Result<Message, ProbeError> {
    let io_err = |source| ProbeError::Io { server, source };

    let id = rand::random::<u16>();
    let mut message = Message::new();
    message.set_id(id);
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(Query::query(Name::from_str(name)?, record_type));
    let request = message.to_bytes()?;

    let response = match transport {
        Transport::Udp => {
            let local = if server.is_ipv4() {
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
            } else {
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
            };
            let socket = UdpSocket::bind(local).map_err(io_err)?;
            socket.set_read_timeout(Some(timeout)).map_err(io_err)?;
            socket.send_to(&request, server).map_err(io_err)?;
            let mut buf = vec![0u8; 65535];
            let (len, _) = socket.recv_from(&mut buf).map_err(io_err)?;
            buf.truncate(len);
            buf
        }
        Transport::Tcp => {
            let mut stream = TcpStream::connect_timeout(&server, timeout).map_err(io_err)?;
            stream.set_read_timeout(Some(timeout)).map_err(io_err)?;
            let len = u16::try_from(request.len())
                .map_err(|e| io_err(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
            stream.write_all(&len.to_be_bytes()).map_err(io_err)?;
            stream.write_all(&request).map_err(io_err)?;
            let mut len_buf = [0u8; 2];
            stream.read_exact(&mut len_buf).map_err(io_err)?;
            let mut buf = vec![0u8; usize::from(u16::from_be_bytes(len_buf))];
            stream.read_exact(&mut buf).map_err(io_err)?;
            buf
        }
    };

    let answer = Message::from_bytes(&response)?;
    if answer.id() != id {
        return Err(ProbeError::IdMismatch {
            want: id,
            got: answer.id(),
        });
    }
    Ok(answer)
}

/// Checks once that the server accepts TCP connections and serves the
/// health check record over UDP.
pub fn is_serving(server: SocketAddr, timeout: Duration) -> bool {
    if let Err(_e) = TcpStream::connect_timeout(&server, timeout) {
        #[cfg(feature = "log")]
        tracing::debug!(%server, error = %_e, "health check: TCP connect failed");
        return false;
    }
    match query(server, HEALTH_CHECK_NAME, RecordType::A, Transport::Udp, timeout) {
        Ok(answer) => answer
            .answers()
            .iter()
            .any(|record| matches!(record.data(), RData::A(a) if a.0 == HEALTH_CHECK_ADDR)),
        Err(_e) => {
            #[cfg(feature = "log")]
            tracing::debug!(%server, error = %_e, "health check: query failed");
            false
        }
    }
}

/// Blocks until the server passes a health check, trying `attempts` times
/// with `interval` between tries.
pub fn wait_until_serving(
    server: SocketAddr,
    attempts: usize,
    interval: Duration,
) -> Result<(), ProbeError> {
    for attempt in 1..=attempts {
        if is_serving(server, interval.max(Duration::from_millis(500))) {
            #[cfg(feature = "log")]
            tracing::info!(%server, attempt, "DNS server is serving");
            return Ok(());
        }
        std::thread::sleep(interval);
    }
    Err(ProbeError::NotServing { server, attempts })
}

/// Formats an answer record as a single `dig`-like line.
pub fn format_answer(record: &Record) -> String {
    let data = match record.data() {
        RData::TXT(txt) => txt
            .txt_data()
            .iter()
            .map(|s| format!("\"{}\"", String::from_utf8_lossy(s)))
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    };
    format!(
        "{}\t{}\tIN\t{}\t{}",
        record.name(),
        record.ttl(),
        record.record_type(),
        data
    )
}
