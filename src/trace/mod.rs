//! Trace recording: the event model, the [`Saver`] log, and the decorators
//! that wrap each network capability and write into a shared `Saver`.

pub mod dialer;
pub mod dns;
pub mod event;
pub mod http;
pub mod quic;
pub mod resolver;
pub mod saver;
pub mod tls;
pub mod udp;

pub use dialer::{SaverConn, SaverConnDialer, SaverDialer};
pub use dns::SaverDnsTransport;
pub use event::{Event, EventName, EventValue};
pub use http::SaverHttpTransport;
pub use quic::SaverQuicDialer;
pub use resolver::SaverResolver;
pub use saver::{Operation, PendingOperation, Saver};
pub use tls::SaverTlsHandshaker;
pub use udp::SaverUdpSocket;

impl Saver {
    pub fn wrap_resolver<R>(&self, inner: R) -> SaverResolver<R> {
        SaverResolver::new(inner, self.clone())
    }

    pub fn wrap_dialer<D>(&self, inner: D) -> SaverDialer<D> {
        SaverDialer::new(inner, self.clone())
    }

    pub fn wrap_conn_dialer<D>(&self, inner: D) -> SaverConnDialer<D> {
        SaverConnDialer::new(inner, self.clone())
    }

    pub fn wrap_tls_handshaker<T>(&self, inner: T) -> SaverTlsHandshaker<T> {
        SaverTlsHandshaker::new(inner, self.clone())
    }

    pub fn wrap_quic_dialer<Q>(&self, inner: Q) -> SaverQuicDialer<Q> {
        SaverQuicDialer::new(inner, self.clone())
    }

    pub fn wrap_dns_transport<T>(&self, inner: T) -> SaverDnsTransport<T> {
        SaverDnsTransport::new(inner, self.clone())
    }

    pub fn wrap_http_transport<T>(&self, inner: T, snapshot_size: usize) -> SaverHttpTransport<T> {
        SaverHttpTransport::new(inner, self.clone(), snapshot_size)
    }
}
