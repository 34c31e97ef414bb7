use async_trait::async_trait;

use super::event::{EventName, EventValue};
use super::saver::{Operation, Saver};
use crate::context::Context;
use crate::netx::{BoxError, Conn, TlsConfig, TlsConnectionState, TlsError, TlsHandshaker};

/// Records `tls_handshake_start` / `tls_handshake_done`.
///
/// On failure the peer chain is still recorded when the inner handshaker
/// reports it through [`TlsError::Handshake`].
pub struct SaverTlsHandshaker<T> {
    inner: T,
    saver: Saver,
}

impl<T> SaverTlsHandshaker<T> {
    pub fn new(inner: T, saver: Saver) -> Self {
        Self { inner, saver }
    }
}

pub(crate) fn start_value(config: &TlsConfig, transport: &str) -> EventValue {
    EventValue {
        tls_server_name: Some(config.server_name.clone()),
        tls_next_protos: Some(config.next_protos.clone()),
        no_tls_verify: Some(config.insecure_skip_verify),
        transport: Some(transport.to_owned()),
        ..EventValue::default()
    }
}

pub(crate) fn fill_state(value: &mut EventValue, state: &TlsConnectionState) {
    value.tls_version = Some(state.version.clone());
    value.tls_cipher_suite = Some(state.cipher_suite.clone());
    value.tls_negotiated_proto = Some(state.negotiated_protocol.clone().unwrap_or_default());
    value.tls_peer_certs = Some(state.peer_certificates.clone());
}

pub(crate) fn fill_failed_chain(value: &mut EventValue, err: &BoxError) {
    let chain = err
        .downcast_ref::<TlsError>()
        .map(TlsError::peer_certificates)
        .unwrap_or_default();
    if !chain.is_empty() {
        value.tls_peer_certs = Some(chain.to_vec());
    }
}

#[async_trait]
impl<T: TlsHandshaker> TlsHandshaker for SaverTlsHandshaker<T> {
    async fn handshake(
        &self,
        ctx: &Context,
        conn: Conn,
        config: &TlsConfig,
    ) -> Result<(Conn, TlsConnectionState), BoxError> {
        let op = Operation::begin(
            &self.saver,
            EventName::TlsHandshakeStart,
            EventName::TlsHandshakeDone,
            start_value(config, "tcp"),
        );
        tracing::debug!(server_name = %config.server_name, "tls handshake start");

        match self.inner.handshake(ctx, conn, config).await {
            Ok((conn, state)) => {
                tracing::debug!(
                    server_name = %config.server_name,
                    version = %state.version,
                    "tls handshake done"
                );
                Operation::succeed(op, |v| fill_state(v, &state));
                Ok((conn, state))
            }
            Err(err) => {
                tracing::debug!(server_name = %config.server_name, error = %err, "tls handshake failed");
                Operation::fail(op, &*err, |v| fill_failed_chain(v, &err));
                Err(err)
            }
        }
    }
}
