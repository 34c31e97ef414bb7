use async_trait::async_trait;

use super::event::{EventName, EventValue};
use super::saver::{Operation, Saver};
use crate::context::Context;
use crate::netx::{BoxError, DnsTransport};

/// Records `dns_round_trip_start` / `dns_round_trip_done` with the raw
/// query and reply bytes.
pub struct SaverDnsTransport<T> {
    inner: T,
    saver: Saver,
}

impl<T> SaverDnsTransport<T> {
    pub fn new(inner: T, saver: Saver) -> Self {
        Self { inner, saver }
    }
}

#[async_trait]
impl<T: DnsTransport> DnsTransport for SaverDnsTransport<T> {
    async fn round_trip(&self, ctx: &Context, query: &[u8]) -> Result<Vec<u8>, BoxError> {
        let op = Operation::begin(
            &self.saver,
            EventName::DnsRoundTripStart,
            EventName::DnsRoundTripDone,
            EventValue {
                address: Some(self.inner.address().to_owned()),
                transport: Some(self.inner.network().to_owned()),
                dns_query: Some(query.to_vec()),
                ..EventValue::default()
            },
        );
        match self.inner.round_trip(ctx, query).await {
            Ok(reply) => {
                Operation::succeed(op, |v| v.dns_reply = Some(reply.clone()));
                Ok(reply)
            }
            Err(err) => {
                tracing::debug!(server = self.inner.address(), error = %err, "dns round trip failed");
                Operation::fail(op, &*err, |_| {});
                Err(err)
            }
        }
    }

    fn network(&self) -> &str {
        self.inner.network()
    }

    fn address(&self) -> &str {
        self.inner.address()
    }
}
