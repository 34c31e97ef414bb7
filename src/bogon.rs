//! Bogon safety policy for resolver answers.
//!
//! A bogon is an address from a private, loopback, link-local, multicast or
//! otherwise reserved range. An answer containing one cannot be trusted, so
//! [`BogonResolver`] rejects the whole answer instead of filtering it.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use lazy_static::lazy_static;

use crate::context::Context;
use crate::netx::{BoxError, DnsError, Resolver};

const BOGONS_V4: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 18, 0, 0), 15),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
    (Ipv4Addr::new(255, 255, 255, 255), 32),
];

const BOGONS_V6: &[(Ipv6Addr, u8)] = &[
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0), 128),
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1), 128),
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0, 0), 96),
    (Ipv6Addr::new(0x100, 0, 0, 0, 0, 0, 0, 0), 64),
    (Ipv6Addr::new(0x2001, 0x10, 0, 0, 0, 0, 0, 0), 28),
    (Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 32),
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8),
];

lazy_static! {
    /// (network, mask) pairs, built once and read-only afterwards.
    static ref MASKS_V4: Vec<(u32, u32)> = BOGONS_V4
        .iter()
        .map(|(net, prefix)| {
            let mask = u32::MAX.checked_shl(32 - u32::from(*prefix)).unwrap_or(0);
            (u32::from(*net) & mask, mask)
        })
        .collect();
    static ref MASKS_V6: Vec<(u128, u128)> = BOGONS_V6
        .iter()
        .map(|(net, prefix)| {
            let mask = u128::MAX.checked_shl(128 - u32::from(*prefix)).unwrap_or(0);
            (u128::from(*net) & mask, mask)
        })
        .collect();
}

pub fn is_bogon(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            MASKS_V4.iter().any(|(net, mask)| bits & mask == *net)
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            MASKS_V6.iter().any(|(net, mask)| bits & mask == *net)
        }
    }
}

/// Like [`is_bogon`] for a textual address. Anything that does not parse
/// as an IP address is not a bogon.
pub fn is_bogon_literal(address: &str) -> bool {
    address.parse().map(is_bogon).unwrap_or(false)
}

/// Fails the whole resolution with [`DnsError::Bogon`] when any returned
/// address is a bogon. Inner failures pass through unchanged.
pub struct BogonResolver<R> {
    inner: R,
}

impl<R> BogonResolver<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: Resolver> Resolver for BogonResolver<R> {
    async fn lookup_host(&self, ctx: &Context, hostname: &str) -> Result<Vec<IpAddr>, BoxError> {
        let addrs = self.inner.lookup_host(ctx, hostname).await?;
        if let Some(bogon) = addrs.iter().copied().find(|ip| is_bogon(*ip)) {
            tracing::warn!(hostname, %bogon, "resolver answer contains a bogon, rejecting it");
            return Err(DnsError::Bogon(bogon).into());
        }
        Ok(addrs)
    }

    fn network(&self) -> &str {
        self.inner.network()
    }

    fn address(&self) -> &str {
        self.inner.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{self, FailureCode};
    use crate::netx::mocks::{os_error, MockResolver};
    use crate::trace::{EventName, Saver, SaverResolver};

    #[test]
    fn reserved_ranges() {
        let bogons = [
            "0.1.2.3",
            "10.0.0.1",
            "100.64.0.1",
            "127.0.0.1",
            "169.254.10.10",
            "172.16.0.1",
            "172.31.255.255",
            "192.0.0.9",
            "192.0.2.1",
            "192.168.1.1",
            "198.19.0.1",
            "198.51.100.7",
            "203.0.113.200",
            "224.0.0.251",
            "239.255.255.250",
            "250.1.1.1",
            "255.255.255.255",
            "::",
            "::1",
            "::ffff:8.8.8.8",
            "100::1",
            "2001:10::1",
            "2001:db8::1",
            "fd00::1",
            "fe80::1",
            "ff02::1",
        ];
        for addr in bogons {
            assert!(is_bogon_literal(addr), "{addr} should be a bogon");
        }
    }

    #[test]
    fn routable_addresses() {
        let routable = [
            "1.1.1.1",
            "8.8.8.8",
            "93.184.216.34",
            "100.63.255.255",
            "100.128.0.1",
            "172.15.255.255",
            "172.32.0.1",
            "198.20.0.1",
            "223.255.255.255",
            "2606:4700:4700::1111",
            "2001:4860:4860::8888",
            "2001:20::1",
        ];
        for addr in routable {
            assert!(!is_bogon_literal(addr), "{addr} should be routable");
        }
        assert!(!is_bogon_literal("example.com"));
    }

    #[tokio::test]
    async fn one_bogon_fails_the_whole_answer() {
        let resolver = BogonResolver::new(MockResolver::answering(&["93.184.216.34", "127.0.0.1"]));
        let err = resolver
            .lookup_host(&Context::background(), "example.com")
            .await
            .unwrap_err();
        assert_eq!(failure::classify(&*err), Some(FailureCode::DnsBogonError));
        assert_eq!(
            err.downcast_ref::<DnsError>(),
            Some(&DnsError::Bogon("127.0.0.1".parse().unwrap()))
        );
    }

    #[tokio::test]
    async fn clean_answer_passes_through_in_order() {
        let resolver = BogonResolver::new(MockResolver::answering(&["93.184.216.34", "8.8.8.8"]));
        let addrs = resolver
            .lookup_host(&Context::background(), "example.com")
            .await
            .unwrap();
        let expected: Vec<IpAddr> = vec!["93.184.216.34".parse().unwrap(), "8.8.8.8".parse().unwrap()];
        assert_eq!(addrs, expected);
    }

    #[tokio::test]
    async fn inner_failure_is_untouched() {
        let resolver = BogonResolver::new(MockResolver::failing(|| os_error(FailureCode::HostUnreachable)));
        let err = resolver
            .lookup_host(&Context::background(), "example.com")
            .await
            .unwrap_err();
        assert_eq!(failure::classify(&*err), Some(FailureCode::HostUnreachable));
    }

    #[tokio::test]
    async fn traced_resolution_still_records_the_addresses() {
        let saver = Saver::new();
        let resolver = BogonResolver::new(SaverResolver::new(
            MockResolver::answering(&["10.10.34.35"]),
            saver.clone(),
        ));
        assert!(resolver
            .lookup_host(&Context::background(), "blocked.example")
            .await
            .is_err());

        // The trace shows what the resolver said, the bogon policy acts after it.
        let events = saver.read();
        assert_eq!(events[1].name, EventName::ResolveDone);
        assert_eq!(events[1].value.addresses, Some(vec!["10.10.34.35".to_owned()]));
        assert!(events[1].value.failure.is_none());
    }

    #[tokio::test]
    async fn tracing_outside_the_policy_records_the_bogon_failure() {
        let saver = Saver::new();
        let resolver = SaverResolver::new(
            BogonResolver::new(MockResolver::answering(&["10.10.34.35"])),
            saver.clone(),
        );
        assert!(resolver
            .lookup_host(&Context::background(), "blocked.example")
            .await
            .is_err());
        assert_eq!(saver.read()[1].value.failure, Some(FailureCode::DnsBogonError));
    }
}
