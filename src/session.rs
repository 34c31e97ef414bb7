use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::bogon::BogonResolver;
use crate::config::{MeasurementConfig, ResolverConfig};
use crate::context::Context;
use crate::failure::{self, FailureCode};
use crate::netx::{
    tls, BoxError, Conn, Dialer, DohResolver, QuicConn, QuicDialer, ReqwestTransport,
    Resolver, SystemDialer, SystemQuicDialer, SystemResolver, SystemTlsHandshaker, TlsConfig,
    TlsConnectionState, TlsHandshaker, UdpDnsTransport,
};
use crate::trace::{
    Event, Saver, SaverDnsTransport, SaverHttpTransport, SaverQuicDialer,
    SaverResolver, SaverTlsHandshaker,
};

/// The undecorated primitives a session builds its chains from.
#[derive(Clone)]
pub struct Primitives {
    pub resolver: Arc<dyn Resolver>,
    pub dialer: Arc<dyn Dialer>,
    pub tls_handshaker: Arc<dyn TlsHandshaker>,
    pub quic_dialer: Arc<dyn QuicDialer>,
}

impl Primitives {
    /// OS resolver or DoH, socket2 dialer, rustls handshaker, quinn dialer.
    /// A DoH resolver's own HTTP exchanges are recorded into `saver`.
    pub fn system(config: &MeasurementConfig, saver: &Saver) -> Result<Self, BoxError> {
        let resolver: Arc<dyn Resolver> = match &config.resolver {
            ResolverConfig::System => Arc::new(SystemResolver),
            ResolverConfig::Doh { url } => {
                let http = saver.wrap_http_transport(ReqwestTransport::new()?, config.snapshot_size);
                Arc::new(DohResolver::new(Arc::new(http), url.clone()))
            }
        };
        let roots = tls::native_roots()?;
        Ok(Self {
            resolver,
            dialer: Arc::new(SystemDialer { ttl: config.socket_ttl }),
            tls_handshaker: Arc::new(SystemTlsHandshaker::with_roots(roots.clone())),
            quic_dialer: Arc::new(SystemQuicDialer::with_roots(roots)),
        })
    }
}

/// What happened at one resolved endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOutcome {
    pub address: SocketAddr,
    pub tls: Result<TlsConnectionState, FailureCode>,
    /// `None` when QUIC is disabled.
    pub quic: Option<Result<TlsConnectionState, FailureCode>>,
}

/// One measurement attempt: a config, a fresh [`Saver`], and the primitives
/// every decorated chain is built from. Clones share the same saver.
#[derive(Clone)]
pub struct MeasurementSession {
    config: Arc<MeasurementConfig>,
    saver: Saver,
    primitives: Arc<Primitives>,
}

impl MeasurementSession {
    pub fn new(config: MeasurementConfig) -> Result<Self, BoxError> {
        config.validate()?;
        let saver = Saver::new();
        let primitives = Primitives::system(&config, &saver)?;
        Ok(Self {
            config: Arc::new(config),
            saver,
            primitives: Arc::new(primitives),
        })
    }

    pub fn with_primitives(config: MeasurementConfig, primitives: Primitives) -> Self {
        Self {
            config: Arc::new(config),
            saver: Saver::new(),
            primitives: Arc::new(primitives),
        }
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    pub fn saver(&self) -> &Saver {
        &self.saver
    }

    /// Bogon policy over the traced resolver, so the trace keeps the raw
    /// answer and the caller sees one `dns_bogon_error`.
    pub fn resolver(&self) -> BogonResolver<SaverResolver<Arc<dyn Resolver>>> {
        BogonResolver::new(self.saver.wrap_resolver(self.primitives.resolver.clone()))
    }

    pub fn dialer(&self) -> Arc<dyn Dialer> {
        let traced = self.saver.wrap_dialer(self.primitives.dialer.clone());
        if self.config.trace_read_write {
            Arc::new(self.saver.wrap_conn_dialer(traced))
        } else {
            Arc::new(traced)
        }
    }

    pub fn tls_handshaker(&self) -> SaverTlsHandshaker<Arc<dyn TlsHandshaker>> {
        self.saver.wrap_tls_handshaker(self.primitives.tls_handshaker.clone())
    }

    pub fn quic_dialer(&self) -> SaverQuicDialer<Arc<dyn QuicDialer>> {
        self.saver.wrap_quic_dialer(self.primitives.quic_dialer.clone())
    }

    pub fn dns_transport(&self, server: SocketAddr) -> SaverDnsTransport<UdpDnsTransport> {
        self.saver
            .wrap_dns_transport(UdpDnsTransport::new(server, self.saver.clone()))
    }

    pub fn http_transport(&self) -> Result<SaverHttpTransport<ReqwestTransport>, BoxError> {
        Ok(self
            .saver
            .wrap_http_transport(ReqwestTransport::new()?, self.config.snapshot_size))
    }

    pub fn tls_config(&self, server_name: &str) -> TlsConfig {
        TlsConfig {
            insecure_skip_verify: self.config.tls.insecure_skip_verify,
            ..TlsConfig::new(server_name).with_next_protos(self.config.tls.next_protos.iter().cloned())
        }
    }

    fn quic_tls_config(&self, server_name: &str) -> TlsConfig {
        TlsConfig {
            insecure_skip_verify: self.config.tls.insecure_skip_verify,
            ..TlsConfig::new(server_name).with_next_protos(self.config.quic.next_protos.iter().cloned())
        }
    }

    pub async fn resolve(&self, ctx: &Context, hostname: &str) -> Result<Vec<IpAddr>, BoxError> {
        let ctx = ctx.with_timeout(self.config.timeouts.resolve);
        self.resolver().lookup_host(&ctx, hostname).await
    }

    pub async fn tcp_connect(&self, ctx: &Context, address: SocketAddr) -> Result<Conn, BoxError> {
        let ctx = ctx.with_timeout(self.config.timeouts.connect);
        self.dialer().dial_context(&ctx, "tcp", &address.to_string()).await
    }

    pub async fn tls_connect(
        &self,
        ctx: &Context,
        address: SocketAddr,
        server_name: &str,
    ) -> Result<(Conn, TlsConnectionState), BoxError> {
        let conn = self.tcp_connect(ctx, address).await?;
        let ctx = ctx.with_timeout(self.config.timeouts.tls_handshake);
        self.tls_handshaker()
            .handshake(&ctx, conn, &self.tls_config(server_name))
            .await
    }

    pub async fn quic_connect(
        &self,
        ctx: &Context,
        address: SocketAddr,
        server_name: &str,
    ) -> Result<QuicConn, BoxError> {
        let ctx = ctx.with_timeout(self.config.timeouts.quic_handshake);
        self.quic_dialer()
            .dial_context(
                &ctx,
                &address.to_string(),
                &self.quic_tls_config(server_name),
                &self.config.quic.transport(),
            )
            .await
    }

    /// Resolves `hostname`, then measures TLS (and QUIC when enabled) on
    /// every address concurrently. A failed resolution, bogon rejection
    /// included, is returned as is and nothing else is attempted.
    pub async fn measure_endpoints(
        &self,
        ctx: &Context,
        hostname: &str,
        port: u16,
    ) -> Result<Vec<EndpointOutcome>, BoxError> {
        let addrs = self.resolve(ctx, hostname).await?;

        let mut tasks = JoinSet::new();
        for (index, ip) in addrs.into_iter().enumerate() {
            let session = self.clone();
            let ctx = ctx.clone();
            let hostname = hostname.to_owned();
            tasks.spawn(async move {
                let outcome = session
                    .measure_endpoint(&ctx, SocketAddr::new(ip, port), &hostname)
                    .await;
                (index, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined?);
        }
        outcomes.sort_by_key(|(index, _)| *index);
        Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
    }

    async fn measure_endpoint(&self, ctx: &Context, address: SocketAddr, server_name: &str) -> EndpointOutcome {
        let tls = match self.tls_connect(ctx, address, server_name).await {
            Ok((_conn, state)) => Ok(state),
            Err(err) => Err(failure::classify_or_unknown(&*err)),
        };
        let quic = if self.config.quic.enabled {
            Some(match self.quic_connect(ctx, address, server_name).await {
                Ok(conn) => {
                    let state = conn.connection_state();
                    conn.close().await;
                    Ok(state)
                }
                Err(err) => Err(failure::classify_or_unknown(&*err)),
            })
        } else {
            None
        };
        tracing::info!(%address, tls = ?tls.as_ref().err(), quic = ?quic.as_ref().map(|q| q.as_ref().err()), "endpoint measured");
        EndpointOutcome { address, tls, quic }
    }

    /// Everything recorded so far by every chain of this session.
    pub fn events(&self) -> Vec<Event> {
        self.saver.read()
    }
}
