//! Network capabilities: the minimal async traits every primitive and every
//! decorator implements, plus their system implementations.

use std::collections::BTreeMap;
use std::error::Error;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::context::Context;

pub mod dialer;
pub mod dns_transport;
pub mod http;
pub mod mocks;
pub mod quic;
pub mod resolver;
pub mod tls;

pub use dialer::SystemDialer;
pub use dns_transport::UdpDnsTransport;
pub use http::ReqwestTransport;
pub use quic::SystemQuicDialer;
pub use resolver::{DohResolver, SystemResolver};
pub use tls::SystemTlsHandshaker;

pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Byte stream returned by dialers and handshakers.
pub trait NetConn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> NetConn for T {}

pub type Conn = Box<dyn NetConn>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DnsError {
    #[error("dns answer contains bogon address {0}")]
    Bogon(IpAddr),
    #[error("no such host")]
    NxDomain,
    #[error("no answer from dns server")]
    NoAnswer,
    #[error("dns server refused the query")]
    Refused,
    #[error("dns server misbehaving")]
    ServerMisbehaving,
    #[error("dns server returned response code {0}")]
    ResponseCode(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("invalid address {address}: {source}")]
    InvalidAddress {
        address: String,
        source: std::net::AddrParseError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
    #[error("loading root certificates: {0}")]
    RootStore(#[source] io::Error),
    /// The chain the peer presented is kept even though the handshake failed.
    #[error("tls handshake: {source}")]
    Handshake {
        source: io::Error,
        peer_certificates: Vec<Vec<u8>>,
    },
}

impl TlsError {
    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        match self {
            TlsError::Handshake {
                peer_certificates, ..
            } => peer_certificates,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub server_name: String,
    pub next_protos: Vec<String>,
    pub insecure_skip_verify: bool,
    /// Overrides the handshaker's own roots when set.
    pub root_store: Option<Arc<rustls::RootCertStore>>,
}

impl TlsConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            ..Self::default()
        }
    }

    pub fn with_next_protos<I, S>(mut self, protos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_protos = protos.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConnectionState {
    pub version: String,
    pub cipher_suite: String,
    pub negotiated_protocol: Option<String>,
    /// DER, leaf first.
    pub peer_certificates: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuicConfig {
    pub max_idle_timeout: Duration,
    pub keep_alive_interval: Option<Duration>,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            max_idle_timeout: Duration::from_secs(30),
            keep_alive_interval: None,
        }
    }
}

/// An established QUIC connection.
#[async_trait]
pub trait QuicConnection: Send + Sync {
    fn remote_address(&self) -> SocketAddr;
    fn connection_state(&self) -> TlsConnectionState;
    async fn close(&self);
}

pub type QuicConn = Box<dyn QuicConnection>;

pub type HttpHeaders = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_owned(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup_host(&self, ctx: &Context, hostname: &str) -> Result<Vec<IpAddr>, BoxError>;

    /// Transport the resolver speaks, e.g. `system` or `doh`.
    fn network(&self) -> &str;

    /// Server address, empty when not applicable.
    fn address(&self) -> &str;
}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial_context(&self, ctx: &Context, network: &str, address: &str) -> Result<Conn, BoxError>;
}

#[async_trait]
pub trait TlsHandshaker: Send + Sync {
    async fn handshake(
        &self,
        ctx: &Context,
        conn: Conn,
        config: &TlsConfig,
    ) -> Result<(Conn, TlsConnectionState), BoxError>;
}

#[async_trait]
pub trait QuicDialer: Send + Sync {
    async fn dial_context(
        &self,
        ctx: &Context,
        address: &str,
        tls: &TlsConfig,
        quic: &QuicConfig,
    ) -> Result<QuicConn, BoxError>;
}

#[async_trait]
pub trait DnsTransport: Send + Sync {
    async fn round_trip(&self, ctx: &Context, query: &[u8]) -> Result<Vec<u8>, BoxError>;
    fn network(&self) -> &str;
    fn address(&self) -> &str;
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn round_trip(&self, ctx: &Context, request: HttpRequest) -> Result<HttpResponse, BoxError>;
    fn network(&self) -> &str;
}

#[async_trait]
impl<T: Resolver + ?Sized> Resolver for Arc<T> {
    async fn lookup_host(&self, ctx: &Context, hostname: &str) -> Result<Vec<IpAddr>, BoxError> {
        (**self).lookup_host(ctx, hostname).await
    }

    fn network(&self) -> &str {
        (**self).network()
    }

    fn address(&self) -> &str {
        (**self).address()
    }
}

#[async_trait]
impl<T: Dialer + ?Sized> Dialer for Arc<T> {
    async fn dial_context(&self, ctx: &Context, network: &str, address: &str) -> Result<Conn, BoxError> {
        (**self).dial_context(ctx, network, address).await
    }
}

#[async_trait]
impl<T: TlsHandshaker + ?Sized> TlsHandshaker for Arc<T> {
    async fn handshake(
        &self,
        ctx: &Context,
        conn: Conn,
        config: &TlsConfig,
    ) -> Result<(Conn, TlsConnectionState), BoxError> {
        (**self).handshake(ctx, conn, config).await
    }
}

#[async_trait]
impl<T: QuicDialer + ?Sized> QuicDialer for Arc<T> {
    async fn dial_context(
        &self,
        ctx: &Context,
        address: &str,
        tls: &TlsConfig,
        quic: &QuicConfig,
    ) -> Result<QuicConn, BoxError> {
        (**self).dial_context(ctx, address, tls, quic).await
    }
}

#[async_trait]
impl<T: DnsTransport + ?Sized> DnsTransport for Arc<T> {
    async fn round_trip(&self, ctx: &Context, query: &[u8]) -> Result<Vec<u8>, BoxError> {
        (**self).round_trip(ctx, query).await
    }

    fn network(&self) -> &str {
        (**self).network()
    }

    fn address(&self) -> &str {
        (**self).address()
    }
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn round_trip(&self, ctx: &Context, request: HttpRequest) -> Result<HttpResponse, BoxError> {
        (**self).round_trip(ctx, request).await
    }

    fn network(&self) -> &str {
        (**self).network()
    }
}
