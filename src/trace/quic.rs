use async_trait::async_trait;

use super::event::{EventName, EventValue};
use super::saver::{Operation, Saver};
use super::tls::{fill_failed_chain, fill_state, start_value};
use crate::context::Context;
use crate::netx::{BoxError, QuicConfig, QuicConn, QuicDialer, TlsConfig};

/// Records `quic_handshake_start` / `quic_handshake_done`.
pub struct SaverQuicDialer<Q> {
    inner: Q,
    saver: Saver,
}

impl<Q> SaverQuicDialer<Q> {
    pub fn new(inner: Q, saver: Saver) -> Self {
        Self { inner, saver }
    }
}

#[async_trait]
impl<Q: QuicDialer> QuicDialer for SaverQuicDialer<Q> {
    async fn dial_context(
        &self,
        ctx: &Context,
        address: &str,
        tls: &TlsConfig,
        quic: &QuicConfig,
    ) -> Result<QuicConn, BoxError> {
        let op = Operation::begin(
            &self.saver,
            EventName::QuicHandshakeStart,
            EventName::QuicHandshakeDone,
            EventValue {
                address: Some(address.to_owned()),
                proto: Some("quic".to_owned()),
                ..start_value(tls, "udp")
            },
        );
        tracing::debug!(address, server_name = %tls.server_name, "quic handshake start");

        match self.inner.dial_context(ctx, address, tls, quic).await {
            Ok(conn) => {
                let state = conn.connection_state();
                Operation::succeed(op, |v| fill_state(v, &state));
                Ok(conn)
            }
            Err(err) => {
                tracing::debug!(address, error = %err, "quic handshake failed");
                Operation::fail(op, &*err, |v| fill_failed_chain(v, &err));
                Err(err)
            }
        }
    }
}
