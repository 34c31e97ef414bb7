use async_trait::async_trait;
use chrono::Utc;

use super::event::{Event, EventName, EventValue};
use super::saver::{Operation, Saver};
use crate::context::Context;
use crate::netx::{BoxError, HttpRequest, HttpResponse, HttpTransport};

/// Records one HTTP transaction: start, request metadata and body
/// snapshot, response metadata and body snapshot, done.
///
/// Body snapshots keep at most `snapshot_size` bytes and flag truncation.
pub struct SaverHttpTransport<T> {
    inner: T,
    saver: Saver,
    snapshot_size: usize,
}

impl<T> SaverHttpTransport<T> {
    pub fn new(inner: T, saver: Saver, snapshot_size: usize) -> Self {
        Self {
            inner,
            saver,
            snapshot_size,
        }
    }

    fn snapshot(&self, name: EventName, body: &[u8]) {
        let kept = body.len().min(self.snapshot_size);
        self.saver.append(Event::new(
            name,
            EventValue {
                data: Some(body[..kept].to_vec()),
                data_is_truncated: Some(kept < body.len()),
                num_bytes: Some(body.len()),
                time: Some(Utc::now()),
                ..EventValue::default()
            },
        ));
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for SaverHttpTransport<T> {
    async fn round_trip(&self, ctx: &Context, request: HttpRequest) -> Result<HttpResponse, BoxError> {
        let op = Operation::begin(
            &self.saver,
            EventName::HttpTransactionStart,
            EventName::HttpTransactionDone,
            EventValue {
                http_method: Some(request.method.clone()),
                http_url: Some(request.url.clone()),
                transport: Some(self.inner.network().to_owned()),
                ..EventValue::default()
            },
        );
        self.saver.append(Event::new(
            EventName::HttpRequestMetadata,
            EventValue {
                http_headers: Some(request.headers.clone()),
                http_method: Some(request.method.clone()),
                http_url: Some(request.url.clone()),
                time: Some(Utc::now()),
                ..EventValue::default()
            },
        ));
        if !request.body.is_empty() {
            self.snapshot(EventName::HttpRequestBodySnapshot, &request.body);
        }

        match self.inner.round_trip(ctx, request).await {
            Ok(response) => {
                self.saver.append(Event::new(
                    EventName::HttpResponseMetadata,
                    EventValue {
                        http_headers: Some(response.headers.clone()),
                        http_status_code: Some(response.status),
                        time: Some(Utc::now()),
                        ..EventValue::default()
                    },
                ));
                self.snapshot(EventName::HttpResponseBodySnapshot, &response.body);
                Operation::succeed(op, |v| v.http_status_code = Some(response.status));
                Ok(response)
            }
            Err(err) => {
                tracing::debug!(error = %err, "http transaction failed");
                Operation::fail(op, &*err, |_| {});
                Err(err)
            }
        }
    }

    fn network(&self) -> &str {
        self.inner.network()
    }
}
