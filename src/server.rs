//! Minimal authoritative DNS server for resolver tests.
//!
//! The server answers from a fixed [`Zone`] over both UDP and TCP on the
//! same address. UDP answers that do not fit in the client's advertised
//! payload size are truncated so that clients retry over TCP.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use hickory_proto::{
    op::{Message, MessageType, OpCode, ResponseCode},
    serialize::binary::{BinDecodable, BinEncodable},
    ProtoError,
};

use crate::zone::{Lookup, Zone};

/// Largest UDP answer sent to clients that don't advertise a larger size.
pub const MAX_UDP_PAYLOAD: usize = 512;

/// How long blocking socket calls wait before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long the rest of a TCP query may take once its first byte arrived.
const TCP_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// A DNS server answering A, AAAA, SRV and TXT queries from a [`Zone`].
#[derive(Clone)]
pub struct DnsServer {
    zone: Arc<Zone>,
    shutdown_handle: ShutdownHandle,
}

impl DnsServer {
    /// Creates a server for `zone`. Use [`DnsServer::spawn`] to start serving.
    pub fn new(zone: Zone) -> Self {
        Self {
            zone: Arc::new(zone),
            shutdown_handle: ShutdownHandle::default(),
        }
    }

    /// Start serving `zone` on `addr` over UDP and TCP in background threads.
    ///
    /// Port 0 picks an ephemeral port; TCP then listens on whatever port UDP
    /// was given.
    pub fn spawn(zone: Zone, addr: SocketAddr) -> io::Result<DnsServerHandle> {
        Self::new(zone).start(addr)
    }

    fn start(self, addr: SocketAddr) -> io::Result<DnsServerHandle> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;
        let listener = TcpListener::bind(local_addr)?;
        listener.set_nonblocking(true)?;

        let udp = {
            let this = self.clone();
            std::thread::spawn(move || this.run_udp(&socket))
        };
        let tcp = {
            let this = self.clone();
            std::thread::spawn(move || this.run_tcp(&listener))
        };
        #[cfg(feature = "log")]
        tracing::info!(%local_addr, records = self.zone.len(), "DNS server started");

        Ok(DnsServerHandle {
            local_addr,
            shutdown_handle: self.shutdown_handle,
            join_handles: vec![udp, tcp],
        })
    }

    /// Serve UDP queries, blocking the current thread.
    /// Returns when shutdown is triggered or an unrecoverable error occurs.
    fn run_udp(&self, socket: &UdpSocket) -> io::Result<()> {
        let mut buf = [0u8; 4096];
        while !self.shutdown_handle.is_shutdown() {
            let (len, src) = match socket.recv_from(&mut buf) {
                Ok(result) => result,
                Err(e) if is_retryable(&e) => continue,
                Err(e) => return Err(e),
            };

            match self.handle_query(&buf[..len], Some(MAX_UDP_PAYLOAD)) {
                Ok(response) => {
                    let _ = socket.send_to(&response, src);
                }
                Err(_e) => {
                    #[cfg(feature = "log")]
                    tracing::warn!(%src, error = %_e, "dropping undecodable UDP query");
                }
            }
        }
        Ok(())
    }

    /// Accept TCP connections, blocking the current thread.
    fn run_tcp(&self, listener: &TcpListener) -> io::Result<()> {
        let mut connections = Vec::new();
        while !self.shutdown_handle.is_shutdown() {
            match listener.accept() {
                Ok((stream, _peer)) => {
                    let this = self.clone();
                    connections.push(std::thread::spawn(move || {
                        if let Err(_e) = this.serve_tcp_connection(stream) {
                            #[cfg(feature = "log")]
                            tracing::debug!(peer = %_peer, error = %_e, "TCP connection closed");
                        }
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) if is_retryable(&e) => continue,
                Err(e) => return Err(e),
            }
            connections.retain(|c: &JoinHandle<()>| !c.is_finished());
        }
        for connection in connections {
            let _ = connection.join();
        }
        Ok(())
    }

    /// Answer length-prefixed queries on one TCP connection until the peer
    /// closes it or the server shuts down.
    fn serve_tcp_connection(&self, mut stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        let mut len_buf = [0u8; 2];
        while !self.shutdown_handle.is_shutdown() {
            // Only the first prefix byte is read under the poll timeout, so a
            // timeout never leaves half a length prefix consumed.
            match stream.read(&mut len_buf[..1]) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if is_retryable(&e) => continue,
                Err(e) => return Err(e),
            }
            stream.set_read_timeout(Some(TCP_QUERY_TIMEOUT))?;
            stream.read_exact(&mut len_buf[1..])?;
            let mut query = vec![0u8; usize::from(u16::from_be_bytes(len_buf))];
            stream.read_exact(&mut query)?;
            stream.set_read_timeout(Some(POLL_INTERVAL))?;

            let response = self
                .handle_query(&query, None)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let len = u16::try_from(response.len())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            stream.write_all(&len.to_be_bytes())?;
            stream.write_all(&response)?;
        }
        Ok(())
    }

    /// Build the wire-format answer to a wire-format query.
    ///
    /// With `max_size` set (UDP), an answer that would exceed both it and the
    /// client's EDNS payload size is sent without records and with the TC
    /// bit set.
    pub fn handle_query(
        &self,
        query_bytes: &[u8],
        max_size: Option<usize>,
    ) -> Result<Vec<u8>, ProtoError> {
        let query = match Message::from_bytes(query_bytes) {
            Ok(query) => query,
            Err(_e) if query_bytes.len() >= 2 => {
                #[cfg(feature = "log")]
                tracing::debug!(error = %_e, "malformed query");
                let id = u16::from_be_bytes([query_bytes[0], query_bytes[1]]);
                return Message::error_msg(id, OpCode::Query, ResponseCode::FormErr).to_bytes();
            }
            Err(e) => return Err(e),
        };

        let mut response = Message::new();
        response.set_id(query.id());
        response.set_message_type(MessageType::Response);
        response.set_op_code(query.op_code());
        response.set_authoritative(true);
        response.set_recursion_desired(query.recursion_desired());
        response.set_recursion_available(true);

        if query.op_code() != OpCode::Query {
            response.set_response_code(ResponseCode::NotImp);
            return response.to_bytes();
        }

        let mut unknown_names = 0;
        for question in query.queries() {
            response.add_query(question.clone());
            match self.zone.lookup(question.name(), question.query_type()) {
                Lookup::Answers(records) => {
                    #[cfg(feature = "log")]
                    tracing::debug!(
                        name = %question.name(),
                        qtype = %question.query_type(),
                        answers = records.len(),
                        "answering query"
                    );
                    response.add_answers(records);
                }
                Lookup::NoData => {
                    #[cfg(feature = "log")]
                    tracing::debug!(
                        name = %question.name(),
                        qtype = %question.query_type(),
                        "no records of requested type"
                    );
                }
                Lookup::NxDomain => {
                    #[cfg(feature = "log")]
                    tracing::debug!(name = %question.name(), "unknown name");
                    unknown_names += 1;
                }
            }
        }
        if unknown_names > 0 && unknown_names == query.queries().len() {
            response.set_response_code(ResponseCode::NXDomain);
        }

        let bytes = response.to_bytes()?;
        let limit = max_size.map(|max| {
            let advertised = query
                .extensions()
                .as_ref()
                .map_or(0, |edns| usize::from(edns.max_payload()));
            max.max(advertised)
        });
        match limit {
            Some(limit) if bytes.len() > limit => {
                #[cfg(feature = "log")]
                tracing::debug!(size = bytes.len(), limit, "truncating UDP answer");
                let _ = response.take_answers();
                response.set_truncated(true);
                response.to_bytes()
            }
            _ => Ok(bytes),
        }
    }

    /// Zone served by this server.
    pub fn zone(&self) -> &Zone {
        &self.zone
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Handle for a running DNS server that shuts it down when dropped.
pub struct DnsServerHandle {
    local_addr: SocketAddr,
    shutdown_handle: ShutdownHandle,
    join_handles: Vec<JoinHandle<io::Result<()>>>,
}

impl DnsServerHandle {
    /// Address the server is listening on (UDP and TCP).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a handle that can stop the server from elsewhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown_handle.clone()
    }

    /// Blocks until the server stops, returning the first serving error.
    pub fn wait(mut self) -> io::Result<()> {
        let mut result = Ok(());
        for handle in self.join_handles.drain(..) {
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("DNS server thread panicked")));
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    }
}

impl Drop for DnsServerHandle {
    fn drop(&mut self) {
        self.shutdown_handle.shutdown();
        for handle in self.join_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Handle for shutting down a running DNS server.
#[derive(Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Signal the server to shut down.
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns `true` if a shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
