use std::net::IpAddr;

use async_trait::async_trait;

use super::event::{EventName, EventValue};
use super::saver::{Operation, Saver};
use crate::context::Context;
use crate::netx::{BoxError, Resolver};

/// Records `resolve_start` / `resolve_done` around an inner resolver.
pub struct SaverResolver<R> {
    inner: R,
    saver: Saver,
}

impl<R> SaverResolver<R> {
    pub fn new(inner: R, saver: Saver) -> Self {
        Self { inner, saver }
    }
}

#[async_trait]
impl<R: Resolver> Resolver for SaverResolver<R> {
    async fn lookup_host(&self, ctx: &Context, hostname: &str) -> Result<Vec<IpAddr>, BoxError> {
        let address = self.inner.address();
        let op = Operation::begin(
            &self.saver,
            EventName::ResolveStart,
            EventName::ResolveDone,
            EventValue {
                hostname: Some(hostname.to_owned()),
                transport: Some(self.inner.network().to_owned()),
                address: (!address.is_empty()).then(|| address.to_owned()),
                ..EventValue::default()
            },
        );
        tracing::debug!(hostname, resolver = self.inner.network(), "resolve start");

        match self.inner.lookup_host(ctx, hostname).await {
            Ok(addrs) => {
                tracing::debug!(hostname, count = addrs.len(), "resolve done");
                Operation::succeed(op, |v| {
                    v.addresses = Some(addrs.iter().map(ToString::to_string).collect());
                });
                Ok(addrs)
            }
            Err(err) => {
                tracing::debug!(hostname, error = %err, "resolve failed");
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
