use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use quinn::{Connection, Endpoint, IdleTimeout, TransportConfig, VarInt};
use rustls::RootCertStore;

use super::tls::{client_config, server_name, take_observed, Observed, SeenChain};
use super::{
    BoxError, DialError, QuicConfig, QuicConn, QuicConnection, QuicDialer, TlsConfig, TlsConnectionState,
    TlsError,
};
use crate::context::Context;

/// QUIC dialer backed by quinn. Each dial gets its own client endpoint so
/// that connections never share a UDP socket.
#[derive(Clone)]
pub struct SystemQuicDialer {
    roots: Arc<RootCertStore>,
}

impl SystemQuicDialer {
    pub fn new() -> Result<Self, TlsError> {
        Ok(Self::with_roots(super::tls::native_roots()?))
    }

    pub fn with_roots(roots: RootCertStore) -> Self {
        Self {
            roots: Arc::new(roots),
        }
    }

    fn endpoint_config(
        &self,
        tls: &TlsConfig,
        quic: &QuicConfig,
        seen: SeenChain,
    ) -> Result<quinn::ClientConfig, BoxError> {
        let crypto = client_config(tls, &self.roots, &[&rustls::version::TLS13], seen)?;
        let mut transport = TransportConfig::default();
        transport.max_idle_timeout(Some(IdleTimeout::try_from(quic.max_idle_timeout)?));
        transport.keep_alive_interval(quic.keep_alive_interval);

        let mut config = quinn::ClientConfig::new(Arc::new(crypto));
        config.transport_config(Arc::new(transport));
        Ok(config)
    }
}

#[async_trait]
impl QuicDialer for SystemQuicDialer {
    async fn dial_context(
        &self,
        ctx: &Context,
        address: &str,
        tls: &TlsConfig,
        quic: &QuicConfig,
    ) -> Result<QuicConn, BoxError> {
        let remote: SocketAddr = address.parse().map_err(|source| DialError::InvalidAddress {
            address: address.to_owned(),
            source,
        })?;
        server_name(tls)?;

        let seen = SeenChain::default();
        let config = self.endpoint_config(tls, quic, seen.clone())?;
        let local = match remote {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let endpoint = Endpoint::client(local)?;
        let connecting = endpoint.connect_with(config, remote, &tls.server_name)?;

        match ctx.run(connecting).await {
            Ok(connection) => Ok(Box::new(QuinnConnection::new(connection, endpoint))),
            Err(err) => Err(handshake_failure(err, take_observed(&seen))),
        }
    }
}

/// Attaches what the verifier saw to a failed QUIC handshake. A verifier
/// rejection becomes the source, so certificate failures classify as they
/// do over TCP instead of through the TLS alert quinn reports.
fn handshake_failure(err: BoxError, observed: Observed) -> BoxError {
    if observed.chain.is_empty() {
        return err;
    }
    let source = match observed.rejection {
        Some(rejection) => io::Error::new(io::ErrorKind::InvalidData, rejection),
        None => io::Error::new(io::ErrorKind::Other, err),
    };
    TlsError::Handshake {
        source,
        peer_certificates: observed.chain,
    }
    .into()
}

struct QuinnConnection {
    connection: Connection,
    endpoint: Endpoint,
    state: TlsConnectionState,
}

impl QuinnConnection {
    fn new(connection: Connection, endpoint: Endpoint) -> Self {
        let negotiated_protocol = connection
            .handshake_data()
            .and_then(|data| data.downcast::<quinn::crypto::rustls::HandshakeData>().ok())
            .and_then(|data| data.protocol)
            .map(|proto| String::from_utf8_lossy(&proto).into_owned());
        let peer_certificates = connection
            .peer_identity()
            .and_then(|identity| identity.downcast::<Vec<rustls::Certificate>>().ok())
            .map(|chain| chain.iter().map(|cert| cert.0.clone()).collect())
            .unwrap_or_default();
        let state = TlsConnectionState {
            version: "TLSv1.3".to_owned(),
            cipher_suite: String::new(),
            negotiated_protocol,
            peer_certificates,
        };
        Self {
            connection,
            endpoint,
            state,
        }
    }
}

#[async_trait]
impl QuicConnection for QuinnConnection {
    fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    fn connection_state(&self) -> TlsConnectionState {
        self.state.clone()
    }

    async fn close(&self) {
        self.connection.close(VarInt::from_u32(0), b"");
        self.endpoint.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{self, FailureCode};
    use std::time::Duration;

    fn dialer() -> SystemQuicDialer {
        SystemQuicDialer::with_roots(RootCertStore::empty())
    }

    #[test]
    fn verifier_rejection_drives_the_classification() {
        let alert: BoxError = io::Error::new(io::ErrorKind::Other, "crypto alert 42").into();
        let err = handshake_failure(
            alert,
            Observed {
                chain: vec![vec![0x30]],
                rejection: Some(rustls::Error::InvalidCertificate(
                    rustls::CertificateError::NotValidForName,
                )),
            },
        );
        assert_eq!(failure::classify(&*err), Some(FailureCode::SslInvalidHostname));
        let tls = err.downcast_ref::<TlsError>().unwrap();
        assert_eq!(tls.peer_certificates(), &[vec![0x30]]);
    }

    #[test]
    fn failure_without_a_chain_is_untouched() {
        let timeout: BoxError = crate::context::ContextError::DeadlineExceeded.into();
        let err = handshake_failure(timeout, Observed::default());
        assert!(err.downcast_ref::<TlsError>().is_none());
        assert_eq!(failure::classify(&*err), Some(FailureCode::GenericTimeoutError));
    }

    #[tokio::test]
    async fn hostname_is_not_an_address() {
        let err = dialer()
            .dial_context(
                &Context::background(),
                "example.com:443",
                &TlsConfig::new("example.com"),
                &QuicConfig::default(),
            )
            .await
            .err()
            .unwrap();
        assert!(err.downcast_ref::<DialError>().is_some());
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        // Bound but never read: the handshake goes unanswered.
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let address = silent.local_addr().unwrap().to_string();
        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        let err = dialer()
            .dial_context(
                &ctx,
                &address,
                &TlsConfig::new("example.com").with_next_protos(["h3"]),
                &QuicConfig::default(),
            )
            .await
            .err()
            .unwrap();
        assert_eq!(failure::classify(&*err), Some(FailureCode::GenericTimeoutError));
    }
}
