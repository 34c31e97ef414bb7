use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::{Certificate, ClientConfig, ClientConnection, ProtocolVersion, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;

use super::{BoxError, Conn, TlsConfig, TlsConnectionState, TlsError, TlsHandshaker};
use crate::context::Context;

/// What the verifier saw during one handshake.
#[derive(Debug, Default)]
pub(crate) struct Observed {
    /// Certificate chain as presented by the peer.
    pub chain: Vec<Vec<u8>>,
    /// Why verification rejected that chain, if it did.
    pub rejection: Option<rustls::Error>,
}

pub(crate) type SeenChain = Arc<Mutex<Observed>>;

pub(crate) fn take_observed(seen: &SeenChain) -> Observed {
    std::mem::take(&mut *seen.lock().unwrap_or_else(PoisonError::into_inner))
}

/// Records the presented chain and the verdict, so both are still
/// available when verification rejects the chain.
struct RecordingVerifier {
    inner: Option<WebPkiVerifier>,
    seen: SeenChain,
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        scts: &mut dyn Iterator<Item = &[u8]>,
        ocsp_response: &[u8],
        now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain: Vec<Vec<u8>> = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|cert| cert.0.clone())
            .collect();
        let verdict = match &self.inner {
            Some(verifier) => verifier.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                scts,
                ocsp_response,
                now,
            ),
            None => Ok(ServerCertVerified::assertion()),
        };

        *self.seen.lock().unwrap_or_else(PoisonError::into_inner) = Observed {
            chain,
            rejection: verdict.as_ref().err().cloned(),
        };
        verdict
    }
}

/// Builds a fresh client config for one handshake.
pub(crate) fn client_config(
    config: &TlsConfig,
    default_roots: &Arc<RootCertStore>,
    versions: &[&'static rustls::SupportedProtocolVersion],
    seen: SeenChain,
) -> Result<ClientConfig, rustls::Error> {
    let inner = if config.insecure_skip_verify {
        None
    } else {
        let roots = config.root_store.as_ref().unwrap_or(default_roots);
        Some(WebPkiVerifier::new(RootCertStore::clone(roots), None))
    };

    let mut client = ClientConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(versions)?
        .with_custom_certificate_verifier(Arc::new(RecordingVerifier { inner, seen }))
        .with_no_client_auth();
    client.alpn_protocols = config
        .next_protos
        .iter()
        .map(|proto| proto.as_bytes().to_vec())
        .collect();
    Ok(client)
}

pub(crate) fn server_name(config: &TlsConfig) -> Result<ServerName, TlsError> {
    ServerName::try_from(config.server_name.as_str())
        .map_err(|_| TlsError::InvalidServerName(config.server_name.clone()))
}

pub(crate) fn version_name(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_owned(),
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_owned(),
        other => format!("{other:?}"),
    }
}

fn connection_state(conn: &ClientConnection) -> TlsConnectionState {
    TlsConnectionState {
        version: conn.protocol_version().map(version_name).unwrap_or_default(),
        cipher_suite: conn
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()))
            .unwrap_or_default(),
        negotiated_protocol: conn
            .alpn_protocol()
            .map(|proto| String::from_utf8_lossy(proto).into_owned()),
        peer_certificates: conn
            .peer_certificates()
            .map(|chain| chain.iter().map(|cert| cert.0.clone()).collect())
            .unwrap_or_default(),
    }
}

/// Loads the platform trust store. Certificates that fail to parse are skipped.
pub fn native_roots() -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    let ders: Vec<Vec<u8>> = rustls_native_certs::load_native_certs()
        .map_err(TlsError::RootStore)?
        .into_iter()
        .map(|cert| cert.0)
        .collect();
    let (added, skipped) = roots.add_parsable_certificates(&ders);
    tracing::debug!(added, skipped, "loaded native root certificates");
    Ok(roots)
}

/// rustls handshaker over any [`Conn`].
#[derive(Clone)]
pub struct SystemTlsHandshaker {
    roots: Arc<RootCertStore>,
}

impl SystemTlsHandshaker {
    pub fn new() -> Result<Self, TlsError> {
        Ok(Self::with_roots(native_roots()?))
    }

    pub fn with_roots(roots: RootCertStore) -> Self {
        Self {
            roots: Arc::new(roots),
        }
    }
}

#[async_trait]
impl TlsHandshaker for SystemTlsHandshaker {
    async fn handshake(
        &self,
        ctx: &Context,
        conn: Conn,
        config: &TlsConfig,
    ) -> Result<(Conn, TlsConnectionState), BoxError> {
        let name = server_name(config)?;
        let seen = SeenChain::default();
        let client = client_config(
            config,
            &self.roots,
            &[&rustls::version::TLS13, &rustls::version::TLS12],
            seen.clone(),
        )?;
        let connector = TlsConnector::from(Arc::new(client));

        match ctx.run(connector.connect(name, conn)).await {
            Ok(stream) => {
                let state = connection_state(stream.get_ref().1);
                let conn: Conn = Box::new(stream);
                Ok((conn, state))
            }
            Err(err) => match err.downcast::<io::Error>() {
                Ok(source) => Err(TlsError::Handshake {
                    source: *source,
                    peer_certificates: take_observed(&seen).chain,
                }
                .into()),
                Err(other) => Err(other),
            },
        }
    }
}
