//! Closure-driven fakes for every capability, used to inject failures and
//! latency without touching the network.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::{
    BoxError, Conn, Dialer, DnsTransport, HttpRequest, HttpResponse, HttpTransport, QuicConfig,
    QuicConn, QuicConnection, QuicDialer, Resolver, TlsConfig, TlsConnectionState, TlsHandshaker,
};
use crate::context::Context;
use crate::failure::{errno_of, FailureCode};

/// An OS error carrying the platform errno for a system failure code.
pub fn os_error(code: FailureCode) -> BoxError {
    match errno_of(code) {
        Some(errno) => io::Error::from_raw_os_error(errno).into(),
        None => io::Error::new(io::ErrorKind::Other, code.as_str()).into(),
    }
}

/// Waits `delay` (bounded by `ctx`) and then produces the scripted result.
async fn scripted<T>(
    ctx: &Context,
    delay: Duration,
    result: impl FnOnce() -> Result<T, BoxError> + Send,
) -> Result<T, BoxError>
where
    T: Send,
{
    ctx.run(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result()
    })
    .await
}

type LookupFn = dyn Fn(&str) -> Result<Vec<IpAddr>, BoxError> + Send + Sync;

pub struct MockResolver {
    lookup: Box<LookupFn>,
    delay: Duration,
}

impl MockResolver {
    pub fn new(lookup: impl Fn(&str) -> Result<Vec<IpAddr>, BoxError> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
            delay: Duration::ZERO,
        }
    }

    /// Answers every query with `addrs`, which must be IP literals.
    pub fn answering(addrs: &[&str]) -> Self {
        let parsed: Vec<IpAddr> = addrs.iter().filter_map(|a| a.parse().ok()).collect();
        Self::new(move |_| Ok(parsed.clone()))
    }

    pub fn failing(make_err: impl Fn() -> BoxError + Send + Sync + 'static) -> Self {
        Self::new(move |_| Err(make_err()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Resolver for MockResolver {
    async fn lookup_host(&self, ctx: &Context, hostname: &str) -> Result<Vec<IpAddr>, BoxError> {
        scripted(ctx, self.delay, || (self.lookup)(hostname)).await
    }

    fn network(&self) -> &str {
        "mock"
    }

    fn address(&self) -> &str {
        ""
    }
}

type DialFn = dyn Fn(&str, &str) -> Result<Conn, BoxError> + Send + Sync;

pub struct MockDialer {
    dial: Box<DialFn>,
    delay: Duration,
}

impl MockDialer {
    pub fn new(dial: impl Fn(&str, &str) -> Result<Conn, BoxError> + Send + Sync + 'static) -> Self {
        Self {
            dial: Box::new(dial),
            delay: Duration::ZERO,
        }
    }

    /// Every dial gets an in-memory stream whose peer echoes what it reads.
    pub fn echo() -> Self {
        Self::new(|_, _| {
            let (client, server) = tokio::io::duplex(16 * 1024);
            tokio::spawn(echo_peer(server));
            Ok(Box::new(client) as Conn)
        })
    }

    pub fn failing(code: FailureCode) -> Self {
        Self::new(move |_, _| Err(os_error(code)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

async fn echo_peer(mut server: DuplexStream) {
    let mut buf = [0u8; 4096];
    loop {
        match server.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if server.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial_context(&self, ctx: &Context, network: &str, address: &str) -> Result<Conn, BoxError> {
        scripted(ctx, self.delay, || (self.dial)(network, address)).await
    }
}

type HandshakeFn = dyn Fn(&TlsConfig) -> Result<TlsConnectionState, BoxError> + Send + Sync;

/// Hands the connection back untouched together with a scripted state.
pub struct MockTlsHandshaker {
    handshake: Box<HandshakeFn>,
    delay: Duration,
}

impl MockTlsHandshaker {
    pub fn new(
        handshake: impl Fn(&TlsConfig) -> Result<TlsConnectionState, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handshake: Box::new(handshake),
            delay: Duration::ZERO,
        }
    }

    pub fn succeeding(state: TlsConnectionState) -> Self {
        Self::new(move |_| Ok(state.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TlsHandshaker for MockTlsHandshaker {
    async fn handshake(
        &self,
        ctx: &Context,
        conn: Conn,
        config: &TlsConfig,
    ) -> Result<(Conn, TlsConnectionState), BoxError> {
        let state = scripted(ctx, self.delay, || (self.handshake)(config)).await?;
        Ok((conn, state))
    }
}

type QuicDialFn = dyn Fn(&str, &TlsConfig) -> Result<TlsConnectionState, BoxError> + Send + Sync;

pub struct MockQuicDialer {
    dial: Box<QuicDialFn>,
    delay: Duration,
}

impl MockQuicDialer {
    pub fn new(
        dial: impl Fn(&str, &TlsConfig) -> Result<TlsConnectionState, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            dial: Box::new(dial),
            delay: Duration::ZERO,
        }
    }

    pub fn succeeding(state: TlsConnectionState) -> Self {
        Self::new(move |_, _| Ok(state.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl QuicDialer for MockQuicDialer {
    async fn dial_context(
        &self,
        ctx: &Context,
        address: &str,
        tls: &TlsConfig,
        _quic: &QuicConfig,
    ) -> Result<QuicConn, BoxError> {
        let state = scripted(ctx, self.delay, || (self.dial)(address, tls)).await?;
        let remote = address
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        Ok(Box::new(MockQuicConnection { remote, state }))
    }
}

#[derive(Debug, Clone)]
pub struct MockQuicConnection {
    pub remote: SocketAddr,
    pub state: TlsConnectionState,
}

#[async_trait]
impl QuicConnection for MockQuicConnection {
    fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    fn connection_state(&self) -> TlsConnectionState {
        self.state.clone()
    }

    async fn close(&self) {}
}

type ReplyFn = dyn Fn(&[u8]) -> Result<Vec<u8>, BoxError> + Send + Sync;

pub struct MockDnsTransport {
    reply: Box<ReplyFn>,
    address: String,
    delay: Duration,
}

impl MockDnsTransport {
    pub fn new(
        address: impl Into<String>,
        reply: impl Fn(&[u8]) -> Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reply: Box::new(reply),
            address: address.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl DnsTransport for MockDnsTransport {
    async fn round_trip(&self, ctx: &Context, query: &[u8]) -> Result<Vec<u8>, BoxError> {
        scripted(ctx, self.delay, || (self.reply)(query)).await
    }

    fn network(&self) -> &str {
        "udp"
    }

    fn address(&self) -> &str {
        &self.address
    }
}

type RespondFn = dyn Fn(&HttpRequest) -> Result<HttpResponse, BoxError> + Send + Sync;

pub struct MockHttpTransport {
    respond: Box<RespondFn>,
    delay: Duration,
}

impl MockHttpTransport {
    pub fn new(
        respond: impl Fn(&HttpRequest) -> Result<HttpResponse, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            delay: Duration::ZERO,
        }
    }

    /// Always answers `status` with `body`.
    pub fn responding(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self::new(move |_| {
            Ok(HttpResponse {
                status,
                body: body.clone(),
                ..HttpResponse::default()
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn round_trip(&self, ctx: &Context, request: HttpRequest) -> Result<HttpResponse, BoxError> {
        scripted(ctx, self.delay, || (self.respond)(&request)).await
    }

    fn network(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure;

    #[tokio::test]
    async fn echo_dialer_round_trips_bytes() {
        let dialer = MockDialer::echo();
        let mut conn = dialer
            .dial_context(&Context::background(), "tcp", "10.0.0.1:80")
            .await
            .unwrap();
        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn failing_dialer_carries_the_errno() {
        let err = MockDialer::failing(FailureCode::ConnectionReset)
            .dial_context(&Context::background(), "tcp", "10.0.0.1:80")
            .await
            .err()
            .unwrap();
        assert_eq!(failure::classify(err.as_ref()), Some(FailureCode::ConnectionReset));
    }

    #[tokio::test]
    async fn delay_is_bounded_by_the_context() {
        let resolver = MockResolver::answering(&["8.8.8.8"]).with_delay(Duration::from_secs(30));
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let err = resolver.lookup_host(&ctx, "dns.google").await.unwrap_err();
        assert_eq!(
            failure::classify(err.as_ref()),
            Some(FailureCode::GenericTimeoutError)
        );
    }
}
