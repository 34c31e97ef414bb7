use std::net::SocketAddr;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpSocket;

use super::{BoxError, Conn, DialError, Dialer};
use crate::context::Context;

/// TCP dialer over the OS socket API.
///
/// `ttl` sets the IP TTL (hop limit for IPv6) before connecting, which is
/// how TTL-limited probes locate a middlebox along the path.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDialer {
    pub ttl: Option<u32>,
}

impl SystemDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: u32) -> Self {
        Self { ttl: Some(ttl) }
    }

    fn socket_for(&self, network: &str, addr: &SocketAddr) -> Result<TcpSocket, BoxError> {
        match (network, addr) {
            ("tcp", _) | ("tcp4", SocketAddr::V4(_)) | ("tcp6", SocketAddr::V6(_)) => {}
            _ => return Err(DialError::UnsupportedNetwork(network.to_owned()).into()),
        }

        let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
        if let Some(ttl) = self.ttl {
            match addr {
                SocketAddr::V4(_) => socket.set_ttl(ttl)?,
                SocketAddr::V6(_) => socket.set_unicast_hops_v6(ttl)?,
            }
        }
        socket.set_nonblocking(true)?;
        let std_stream: std::net::TcpStream = socket.into();
        Ok(TcpSocket::from_std_stream(std_stream))
    }
}

#[async_trait]
impl Dialer for SystemDialer {
    async fn dial_context(&self, ctx: &Context, network: &str, address: &str) -> Result<Conn, BoxError> {
        let addr: SocketAddr = address.parse().map_err(|source| DialError::InvalidAddress {
            address: address.to_owned(),
            source,
        })?;
        let socket = self.socket_for(network, &addr)?;
        tracing::trace!(%addr, ttl = ?self.ttl, "connecting");
        let stream = ctx.run(socket.connect(addr)).await?;
        Ok(Box::new(stream))
    }
}
