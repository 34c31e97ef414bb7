use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use super::event::{EventName, EventValue};
use super::saver::{Operation, Saver};
use crate::context::Context;
use crate::netx::BoxError;

/// Connectionless socket whose every datagram becomes a `write_to` or
/// `read_from` event.
#[derive(Debug)]
pub struct SaverUdpSocket {
    socket: UdpSocket,
    saver: Saver,
}

impl SaverUdpSocket {
    pub fn new(socket: UdpSocket, saver: Saver) -> Self {
        Self { socket, saver }
    }

    pub async fn bind(local: SocketAddr, saver: Saver) -> io::Result<Self> {
        Ok(Self::new(UdpSocket::bind(local).await?, saver))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send_to(&self, ctx: &Context, buf: &[u8], target: SocketAddr) -> Result<usize, BoxError> {
        let op = Operation::single(
            &self.saver,
            EventName::WriteTo,
            EventValue {
                address: Some(target.to_string()),
                proto: Some("udp".to_owned()),
                ..EventValue::default()
            },
        );
        match ctx.run(self.socket.send_to(buf, target)).await {
            Ok(sent) => {
                Operation::succeed(op, |v| {
                    v.num_bytes = Some(sent);
                    v.data = Some(buf[..sent].to_vec());
                });
                Ok(sent)
            }
            Err(err) => {
                Operation::fail(op, &*err, |v| v.num_bytes = Some(0));
                Err(err)
            }
        }
    }

    pub async fn recv_from(&self, ctx: &Context, buf: &mut [u8]) -> Result<(usize, SocketAddr), BoxError> {
        let op = Operation::single(
            &self.saver,
            EventName::ReadFrom,
            EventValue {
                proto: Some("udp".to_owned()),
                ..EventValue::default()
            },
        );
        match ctx.run(self.socket.recv_from(buf)).await {
            Ok((read, from)) => {
                Operation::succeed(op, |v| {
                    v.address = Some(from.to_string());
                    v.num_bytes = Some(read);
                    v.data = Some(buf[..read].to_vec());
                });
                Ok((read, from))
            }
            Err(err) => {
                Operation::fail(op, &*err, |v| v.num_bytes = Some(0));
                Err(err)
            }
        }
    }
}
