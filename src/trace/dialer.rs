use std::io;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

use super::event::{Event, EventName, EventValue};
use super::saver::{Operation, Saver};
use crate::context::Context;
use crate::failure;
use crate::netx::{BoxError, Conn, Dialer};

/// Records one combined `connect` event per dial.
pub struct SaverDialer<D> {
    inner: D,
    saver: Saver,
}

impl<D> SaverDialer<D> {
    pub fn new(inner: D, saver: Saver) -> Self {
        Self { inner, saver }
    }
}

#[async_trait]
impl<D: Dialer> Dialer for SaverDialer<D> {
    async fn dial_context(&self, ctx: &Context, network: &str, address: &str) -> Result<Conn, BoxError> {
        let op = Operation::single(
            &self.saver,
            EventName::Connect,
            EventValue {
                address: Some(address.to_owned()),
                proto: Some(network.to_owned()),
                ..EventValue::default()
            },
        );
        match self.inner.dial_context(ctx, network, address).await {
            Ok(conn) => {
                tracing::debug!(address, network, "connected");
                Operation::succeed(op, |_| {});
                Ok(conn)
            }
            Err(err) => {
                tracing::debug!(address, network, error = %err, "connect failed");
                Operation::fail(op, &*err, |_| {});
                Err(err)
            }
        }
    }
}

/// Wraps every connection the inner dialer returns in a [`SaverConn`].
pub struct SaverConnDialer<D> {
    inner: D,
    saver: Saver,
}

impl<D> SaverConnDialer<D> {
    pub fn new(inner: D, saver: Saver) -> Self {
        Self { inner, saver }
    }
}

#[async_trait]
impl<D: Dialer> Dialer for SaverConnDialer<D> {
    async fn dial_context(&self, ctx: &Context, network: &str, address: &str) -> Result<Conn, BoxError> {
        let conn = self.inner.dial_context(ctx, network, address).await?;
        Ok(Box::new(SaverConn::new(conn, self.saver.clone(), address, network)))
    }
}

/// Connection that writes a `read` or `write` event for every completed
/// I/O call.
///
/// The duration runs from the first poll after the previous completion in
/// the same direction. A read or write dropped while pending records no
/// event, and its wait is counted in the next completed call's duration.
pub struct SaverConn {
    inner: Conn,
    saver: Saver,
    address: String,
    network: String,
    read_started: Option<Instant>,
    write_started: Option<Instant>,
}

impl SaverConn {
    pub fn new(inner: Conn, saver: Saver, address: &str, network: &str) -> Self {
        Self {
            inner,
            saver,
            address: address.to_owned(),
            network: network.to_owned(),
            read_started: None,
            write_started: None,
        }
    }

    fn record(&self, name: EventName, started: Instant, data: &[u8], error: Option<&io::Error>) {
        self.saver.append(Event::new(
            name,
            EventValue {
                address: Some(self.address.clone()),
                proto: Some(self.network.clone()),
                num_bytes: Some(data.len()),
                data: Some(data.to_vec()),
                duration: Some(started.elapsed()),
                failure: error.map(|err| failure::classify_or_unknown(err)),
                time: Some(Utc::now()),
                ..EventValue::default()
            },
        ));
    }
}

impl AsyncRead for SaverConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let started = *this.read_started.get_or_insert_with(Instant::now);
        let before = buf.filled().len();
        let Poll::Ready(result) = Pin::new(&mut this.inner).poll_read(cx, buf) else {
            return Poll::Pending;
        };
        this.read_started = None;
        match &result {
            Ok(()) => this.record(EventName::Read, started, &buf.filled()[before..], None),
            Err(err) => this.record(EventName::Read, started, &[], Some(err)),
        }
        Poll::Ready(result)
    }
}

impl AsyncWrite for SaverConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let started = *this.write_started.get_or_insert_with(Instant::now);
        let Poll::Ready(result) = Pin::new(&mut this.inner).poll_write(cx, buf) else {
            return Poll::Pending;
        };
        this.write_started = None;
        match &result {
            Ok(written) => this.record(EventName::Write, started, &buf[..*written], None),
            Err(err) => this.record(EventName::Write, started, &[], Some(err)),
        }
        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureCode;
    use crate::netx::mocks::MockDialer;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn connect_is_a_single_event() {
        let saver = Saver::new();
        let dialer = SaverDialer::new(MockDialer::echo(), saver.clone());
        dialer
            .dial_context(&Context::background(), "tcp", "93.184.216.34:443")
            .await
            .unwrap();

        let events = saver.read();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, EventName::Connect);
        assert_eq!(events[0].value.address.as_deref(), Some("93.184.216.34:443"));
        assert_eq!(events[0].value.proto.as_deref(), Some("tcp"));
        assert!(events[0].value.failure.is_none());
        assert!(events[0].value.duration.is_some());
    }

    #[tokio::test]
    async fn refused_connect_is_classified() {
        let saver = Saver::new();
        let dialer = SaverDialer::new(MockDialer::failing(FailureCode::ConnectionRefused), saver.clone());
        let err = dialer
            .dial_context(&Context::background(), "tcp", "10.0.0.1:443")
            .await
            .err()
            .unwrap();
        assert_eq!(failure::classify(&*err), Some(FailureCode::ConnectionRefused));
        assert_eq!(saver.read()[0].value.failure, Some(FailureCode::ConnectionRefused));
    }

    #[tokio::test]
    async fn connect_timeout_reports_elapsed_time() {
        let saver = Saver::new();
        let dialer = SaverDialer::new(
            MockDialer::echo().with_delay(Duration::from_secs(30)),
            saver.clone(),
        );
        let ctx = Context::background().with_timeout(Duration::from_millis(25));
        assert!(dialer.dial_context(&ctx, "tcp", "10.0.0.1:443").await.is_err());

        let event = &saver.read()[0];
        assert_eq!(event.value.failure, Some(FailureCode::GenericTimeoutError));
        assert!(event.value.duration.unwrap() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn reads_and_writes_are_recorded_per_call() {
        let saver = Saver::new();
        let dialer = SaverConnDialer::new(SaverDialer::new(MockDialer::echo(), saver.clone()), saver.clone());
        let mut conn = dialer
            .dial_context(&Context::background(), "tcp", "93.184.216.34:80")
            .await
            .unwrap();

        conn.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let mut buf = [0u8; 18];
        conn.read_exact(&mut buf).await.unwrap();

        let events = saver.read();
        assert_eq!(events[0].name, EventName::Connect);
        let writes: Vec<_> = events.iter().filter(|e| e.name == EventName::Write).collect();
        let reads: Vec<_> = events.iter().filter(|e| e.name == EventName::Read).collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].value.num_bytes, Some(18));
        assert_eq!(writes[0].value.data.as_deref(), Some(&b"GET / HTTP/1.0\r\n\r\n"[..]));
        let total: usize = reads.iter().filter_map(|e| e.value.num_bytes).sum();
        assert_eq!(total, 18);
        assert!(reads.iter().all(|e| e.value.failure.is_none()));
    }

    #[tokio::test]
    async fn abandoned_read_wait_counts_toward_the_next_read() {
        let saver = Saver::new();
        let (client, mut server) = tokio::io::duplex(64);
        let mut conn = SaverConn::new(Box::new(client), saver.clone(), "10.0.0.1:80", "tcp");
        let mut buf = [0u8; 8];

        let abandoned = tokio::time::timeout(Duration::from_millis(20), conn.read(&mut buf)).await;
        assert!(abandoned.is_err());
        assert!(saver.is_empty());

        server.write_all(b"x").await.unwrap();
        assert_eq!(conn.read(&mut buf).await.unwrap(), 1);

        let events = saver.read();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value.num_bytes, Some(1));
        assert!(events[0].value.duration.unwrap() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn eof_read_is_zero_bytes_without_failure() {
        let saver = Saver::new();
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut conn = SaverConn::new(Box::new(client), saver.clone(), "10.0.0.1:80", "tcp");
        let mut buf = [0u8; 8];
        assert_eq!(conn.read(&mut buf).await.unwrap(), 0);

        let events = saver.read();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, EventName::Read);
        assert_eq!(events[0].value.num_bytes, Some(0));
        assert!(events[0].value.failure.is_none());
    }
}
