use async_trait::async_trait;

use super::{BoxError, HttpHeaders, HttpRequest, HttpResponse, HttpTransport};
use crate::context::Context;

/// HTTP(S) transport over reqwest with the rustls backend.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(reqwest::Client::builder().build()?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn round_trip(&self, ctx: &Context, request: HttpRequest) -> Result<HttpResponse, BoxError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())?;
        let mut builder = self.client.request(method, request.url.as_str());
        for (name, values) in &request.headers {
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = ctx.run(builder.send()).await?;
        let status = response.status().as_u16();
        let mut headers = HttpHeaders::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.as_str().to_owned())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        let body = ctx.run(response.bytes()).await?;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }

    fn network(&self) -> &str {
        "tcp"
    }
}
