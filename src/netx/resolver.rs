use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dns_lookup::{AddrInfoHints, LookupError, LookupErrorKind, SockType};
use serde::Deserialize;

use super::{BoxError, DnsError, HttpRequest, HttpTransport, Resolver};
use crate::context::Context;

/// Resolves through the operating system (`getaddrinfo`).
///
/// The call runs on the blocking pool so the `getaddrinfo` status code
/// survives: a missing name is `DnsError::NxDomain`, a name without
/// addresses is `DnsError::NoAnswer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_host(&self, ctx: &Context, hostname: &str) -> Result<Vec<IpAddr>, BoxError> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let host = hostname.to_owned();
        let addrs = ctx
            .run(tokio::task::spawn_blocking(move || getaddrinfo(&host)))
            .await??;
        if addrs.is_empty() {
            return Err(DnsError::NoAnswer.into());
        }
        Ok(addrs)
    }

    fn network(&self) -> &str {
        "system"
    }

    fn address(&self) -> &str {
        ""
    }
}

fn getaddrinfo(hostname: &str) -> Result<Vec<IpAddr>, BoxError> {
    let hints = AddrInfoHints {
        socktype: SockType::Stream.into(),
        ..AddrInfoHints::default()
    };
    let infos = dns_lookup::getaddrinfo(Some(hostname), None, Some(hints)).map_err(lookup_error)?;

    let mut addrs: Vec<IpAddr> = Vec::new();
    for info in infos {
        let ip = info?.sockaddr.ip();
        if !addrs.contains(&ip) {
            addrs.push(ip);
        }
    }
    Ok(addrs)
}

/// `EAI_AGAIN` and `EAI_FAIL` mean the resolver could not get a usable
/// answer; `EAI_SYSTEM` keeps its errno through the `io::Error`.
fn lookup_error(err: LookupError) -> BoxError {
    match err.kind() {
        LookupErrorKind::NoName => DnsError::NxDomain.into(),
        LookupErrorKind::NoData => DnsError::NoAnswer.into(),
        LookupErrorKind::Again | LookupErrorKind::Fail => DnsError::ServerMisbehaving.into(),
        _ => io::Error::from(err).into(),
    }
}

#[derive(Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u16,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

const TYPE_A: u16 = 1;
const TYPE_AAAA: u16 = 28;

const RCODE_NXDOMAIN: u16 = 3;
const RCODE_REFUSED: u16 = 5;

/// DNS-over-HTTPS using the JSON API (`application/dns-json`).
///
/// Queries A and AAAA concurrently. Results are never cached: every
/// lookup is a fresh observation.
pub struct DohResolver {
    transport: Arc<dyn HttpTransport>,
    url: String,
}

impl DohResolver {
    pub fn new(transport: Arc<dyn HttpTransport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }

    async fn query(&self, ctx: &Context, hostname: &str, record_type: u16) -> Result<Vec<IpAddr>, BoxError> {
        let url = reqwest::Url::parse_with_params(
            &self.url,
            &[("name", hostname), ("type", record_type.to_string().as_str())],
        )?;
        let request = HttpRequest::get(url).header("Accept", "application/dns-json");
        let response = self.transport.round_trip(ctx, request).await?;
        if response.status != 200 {
            return Err(DnsError::ServerMisbehaving.into());
        }

        let parsed: DohResponse = serde_json::from_slice(&response.body)?;
        match parsed.status {
            0 => {}
            RCODE_NXDOMAIN => return Err(DnsError::NxDomain.into()),
            RCODE_REFUSED => return Err(DnsError::Refused.into()),
            other => return Err(DnsError::ResponseCode(other).into()),
        }

        Ok(parsed
            .answer
            .into_iter()
            .filter(|answer| answer.record_type == record_type)
            .filter_map(|answer| answer.data.parse::<IpAddr>().ok())
            .collect())
    }
}

#[async_trait]
impl Resolver for DohResolver {
    async fn lookup_host(&self, ctx: &Context, hostname: &str) -> Result<Vec<IpAddr>, BoxError> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let (v4, v6) = tokio::join!(
            self.query(ctx, hostname, TYPE_A),
            self.query(ctx, hostname, TYPE_AAAA)
        );

        // An AAAA failure is tolerated as long as A produced something.
        let mut addrs = v4?;
        match v6 {
            Ok(more) => addrs.extend(more),
            Err(err) if addrs.is_empty() => return Err(err),
            Err(err) => tracing::debug!(hostname, error = %err, "ignoring failed AAAA query"),
        }
        if addrs.is_empty() {
            return Err(DnsError::NoAnswer.into());
        }
        Ok(addrs)
    }

    fn network(&self) -> &str {
        "doh"
    }

    fn address(&self) -> &str {
        &self.url
    }
}
