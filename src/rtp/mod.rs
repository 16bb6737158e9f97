pub mod ring_buffer;
pub mod stream;

use crate::{
    config::RtpConfig,
    error::{RtpError, RtpResult},
};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{collections::HashMap, net::SocketAddr};
use stream::RtpStream;
use tokio::{
    net::UdpSocket,
    select,
    sync::{mpsc, oneshot},
};
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{debug, instrument, warn};

enum RtpMessage {
    CreateStream(u16, oneshot::Sender<()>),
    EndStream(u16, oneshot::Sender<()>),
    Read(u16, usize, oneshot::Sender<Vec<u8>>),
    RemotePort(u16, oneshot::Sender<Option<u16>>),
}

/// Thin, `Clone`-able handle to the RTP server actor. The registry of
/// streams itself is owned solely by `RtpServer::run` — this handle only
/// ever posts messages to it.
#[derive(Clone)]
pub struct RtpServerApi {
    tx: mpsc::Sender<RtpMessage>,
}

impl RtpServerApi {
    /// Idempotent for the same port: a second call is a no-op that still
    /// resolves once the stream exists.
    pub async fn create_stream(&self, port: u16) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RtpMessage::CreateStream(port, tx)).await.is_ok() {
            rx.await.ok();
        }
    }

    pub async fn end_stream(&self, port: u16) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RtpMessage::EndStream(port, tx)).await.is_ok() {
            rx.await.ok();
        }
    }

    /// Non-blocking read of up to `n` bytes from the named stream's ring
    /// buffer; returns an empty vec for an unknown or empty stream.
    pub async fn read(&self, port: u16, n: usize) -> Vec<u8> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RtpMessage::Read(port, n, tx)).await.is_ok() {
            rx.await.unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    /// Port component of the stream's bound `remote_addr`, once a datagram
    /// has arrived for it; `None` if unbound or unknown.
    pub async fn remote_port(&self, port: u16) -> Option<u16> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RtpMessage::RemotePort(port, tx)).await.is_ok() {
            rx.await.ok().flatten()
        } else {
            None
        }
    }
}

struct RtpServer {
    config: RtpConfig,
    streams: HashMap<u16, RtpStream>,
    declaration_order: Vec<u16>,
}

impl RtpServer {
    fn new(config: RtpConfig) -> Self {
        Self {
            config,
            streams: HashMap::new(),
            declaration_order: Vec::new(),
        }
    }

    fn create_stream(&mut self, port: u16) {
        if self.streams.contains_key(&port) {
            return;
        }
        self.streams
            .insert(port, RtpStream::new(port, self.config.ring_buffer_cap));
        self.declaration_order.push(port);
    }

    fn end_stream(&mut self, port: u16) {
        if self.streams.remove(&port).is_none() {
            warn!(port, "end_stream called for unknown port");
        }
        self.declaration_order.retain(|p| *p != port);
    }

    /// Demultiplexing algorithm: exact `remote_addr` match first, else
    /// first-unbound-wins in declaration order, else drop.
    fn target_for(&mut self, addr: SocketAddr) -> Option<&mut RtpStream> {
        if let Some(port) = self
            .declaration_order
            .iter()
            .find(|p| self.streams.get(*p).is_some_and(|s| s.remote_addr == Some(addr)))
            .copied()
        {
            return self.streams.get_mut(&port);
        }
        let port = self.declaration_order.iter().find(|p| {
            self.streams
                .get(*p)
                .is_some_and(|s| s.remote_addr.is_none())
        })?;
        self.streams.get_mut(port)
    }

    #[instrument(skip(self, datagram))]
    fn handle_datagram(&mut self, addr: SocketAddr, datagram: &[u8]) {
        let header_size = self.config.header_size;
        let swap16 = self.config.swap16;
        let Some(stream) = self.target_for(addr) else {
            debug!(%addr, "no stream matched datagram, dropping");
            return;
        };
        stream.bind(addr);
        if !stream.active {
            warn!(port = stream.port(), "stream inactive, dropping datagram");
            return;
        }
        if datagram.len() <= header_size {
            warn!(len = datagram.len(), header_size, "datagram too short, dropping");
            return;
        }
        let payload = &datagram[header_size..];
        if swap16 && payload.len() % 2 == 0 {
            let mut swapped = payload.to_vec();
            swapped.chunks_exact_mut(2).for_each(|pair| pair.swap(0, 1));
            stream.feed(&swapped);
        } else {
            if swap16 {
                debug!(len = payload.len(), "odd payload length, skipping byte swap");
            }
            stream.feed(payload);
        }
    }

    async fn run(mut self, socket: UdpSocket, mut rx: mpsc::Receiver<RtpMessage>) {
        let mut buf = [0u8; 2048];
        loop {
            select! {
                res = socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, addr)) => self.handle_datagram(addr, &buf[..len]),
                        Err(e) => warn!(error = %e, "RTP socket recv error"),
                    }
                }
                Some(msg) = rx.recv() => {
                    match msg {
                        RtpMessage::CreateStream(port, reply) => {
                            self.create_stream(port);
                            reply.send(()).ok();
                        }
                        RtpMessage::EndStream(port, reply) => {
                            if let Some(s) = self.streams.get_mut(&port) {
                                s.reset();
                            }
                            self.end_stream(port);
                            reply.send(()).ok();
                        }
                        RtpMessage::Read(port, n, reply) => {
                            let data = self
                                .streams
                                .get_mut(&port)
                                .map(|s| s.read(n))
                                .unwrap_or_default();
                            reply.send(data).ok();
                        }
                        RtpMessage::RemotePort(port, reply) => {
                            let remote = self
                                .streams
                                .get(&port)
                                .and_then(|s| s.remote_addr)
                                .map(|addr| addr.port());
                            reply.send(remote).ok();
                        }
                    }
                }
                else => break,
            }
        }
        for port in self.declaration_order.clone() {
            if let Some(s) = self.streams.get_mut(&port) {
                s.reset();
            }
        }
    }
}

/// Binds the UDP socket and spawns the server actor as a graceful-shutdown
/// subsystem. Per-datagram errors never tear this down; only bind failure
/// does.
pub async fn start(subsys: &SubsystemHandle, config: RtpConfig) -> RtpResult<RtpServerApi> {
    let addr = SocketAddr::new(config.host, config.port);
    let socket = bind_rtp_socket(addr).map_err(|source| RtpError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    let (tx, rx) = mpsc::channel(1024);
    let server = RtpServer::new(config);
    subsys.start(tokio_graceful_shutdown::SubsystemBuilder::new(
        "rtp-server",
        async move |s: &mut SubsystemHandle| {
            select! {
                _ = server.run(socket, rx) => {}
                _ = s.on_shutdown_requested() => {}
            }
            Ok::<(), std::convert::Infallible>(())
        },
    ));
    Ok(RtpServerApi { tx })
}

/// Binds the RTP ingest socket with `SO_REUSEADDR` set before bind, so a
/// restart racing a lingering TIME_WAIT socket from the previous process
/// doesn't fail to rebind the fixed RTP port.
fn bind_rtp_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(addr))?;
    UdpSocket::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk(port: u16) -> RtpStream {
        RtpStream::new(port, 51_200)
    }

    #[test]
    fn first_unbound_wins_in_declaration_order() {
        let mut server = RtpServer::new(RtpConfig {
            host: "0.0.0.0".parse().expect("ip"),
            port: 0,
            swap16: false,
            header_size: 12,
            ring_buffer_cap: 64,
        });
        server.streams.insert(10, mk(10));
        server.streams.insert(20, mk(20));
        server.declaration_order = vec![10, 20];

        let addr: SocketAddr = "127.0.0.1:5000".parse().expect("addr");
        let port = server.target_for(addr).expect("target").port();
        assert_eq!(port, 10);
    }

    #[test]
    fn bound_stream_is_sticky() {
        let mut server = RtpServer::new(RtpConfig {
            host: "0.0.0.0".parse().expect("ip"),
            port: 0,
            swap16: false,
            header_size: 12,
            ring_buffer_cap: 64,
        });
        server.streams.insert(10, mk(10));
        server.declaration_order = vec![10];
        let addr: SocketAddr = "127.0.0.1:5000".parse().expect("addr");
        server.target_for(addr).expect("target").bind(addr);

        let other: SocketAddr = "127.0.0.1:6000".parse().expect("addr");
        assert!(server.target_for(other).is_none());
    }

    #[test]
    fn short_datagram_is_dropped() {
        let mut server = RtpServer::new(RtpConfig {
            host: "0.0.0.0".parse().expect("ip"),
            port: 0,
            swap16: false,
            header_size: 12,
            ring_buffer_cap: 64,
        });
        server.create_stream(10);
        let addr: SocketAddr = "127.0.0.1:5000".parse().expect("addr");
        server.handle_datagram(addr, &[0u8; 8]);
        assert_eq!(server.streams.get_mut(&10).expect("stream").read(8).len(), 0);
    }

    #[test]
    fn swap16_swaps_byte_pairs_on_even_payload() {
        let mut server = RtpServer::new(RtpConfig {
            host: "0.0.0.0".parse().expect("ip"),
            port: 0,
            swap16: true,
            header_size: 2,
            ring_buffer_cap: 64,
        });
        server.create_stream(10);
        let addr: SocketAddr = "127.0.0.1:5000".parse().expect("addr");
        let datagram = [0xAA, 0xBB, 0x01, 0x02, 0x03, 0x04];
        server.handle_datagram(addr, &datagram);
        let read = server.streams.get_mut(&10).expect("stream").read(4);
        assert_eq!(read, vec![0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn create_stream_is_idempotent() {
        let mut server = RtpServer::new(RtpConfig {
            host: "0.0.0.0".parse().expect("ip"),
            port: 0,
            swap16: false,
            header_size: 12,
            ring_buffer_cap: 64,
        });
        server.create_stream(10);
        server.create_stream(10);
        assert_eq!(server.declaration_order, vec![10]);
    }

    #[test]
    fn end_stream_then_create_gives_fresh_stream() {
        let mut server = RtpServer::new(RtpConfig {
            host: "0.0.0.0".parse().expect("ip"),
            port: 0,
            swap16: false,
            header_size: 12,
            ring_buffer_cap: 64,
        });
        server.create_stream(10);
        let addr: SocketAddr = "127.0.0.1:5000".parse().expect("addr");
        server.streams.get_mut(&10).expect("stream").bind(addr);
        server.end_stream(10);
        server.create_stream(10);
        assert_eq!(server.streams.get(&10).expect("stream").remote_addr, None);
    }
}
