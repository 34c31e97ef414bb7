use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;

use super::{BoxError, DnsTransport};
use crate::context::Context;
use crate::trace::{Saver, SaverUdpSocket};

/// Largest UDP payload, so a reply is never cut short by the buffer.
const MAX_REPLY_SIZE: usize = 65_535;

/// Sends raw DNS messages to one server over UDP.
///
/// Each round trip binds a fresh socket and records its datagrams into
/// `saver`. Datagrams whose ID does not match the query are dropped, which
/// also makes injected replies visible in the trace.
pub struct UdpDnsTransport {
    server: SocketAddr,
    address: String,
    saver: Saver,
}

impl UdpDnsTransport {
    pub fn new(server: SocketAddr, saver: Saver) -> Self {
        Self {
            server,
            address: server.to_string(),
            saver,
        }
    }
}

#[async_trait]
impl DnsTransport for UdpDnsTransport {
    async fn round_trip(&self, ctx: &Context, query: &[u8]) -> Result<Vec<u8>, BoxError> {
        if query.len() < 2 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "dns query shorter than its id").into());
        }
        let local = match self.server {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = SaverUdpSocket::bind(local, self.saver.clone()).await?;
        socket.send_to(ctx, query, self.server).await?;

        let mut buf = vec![0u8; MAX_REPLY_SIZE];
        loop {
            let (read, from) = socket.recv_from(ctx, &mut buf).await?;
            if from == self.server && read >= 2 && buf[..2] == query[..2] {
                return Ok(buf[..read].to_vec());
            }
            tracing::debug!(%from, read, "dropping unrelated datagram");
        }
    }

    fn network(&self) -> &str {
        "udp"
    }

    fn address(&self) -> &str {
        &self.address
    }
}
