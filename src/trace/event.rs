use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::failure::FailureCode;
use crate::netx::HttpHeaders;

/// Closed vocabulary of trace event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    ResolveStart,
    ResolveDone,
    DnsRoundTripStart,
    DnsRoundTripDone,
    /// Single combined event, there is no connect_start.
    Connect,
    TlsHandshakeStart,
    TlsHandshakeDone,
    QuicHandshakeStart,
    QuicHandshakeDone,
    Read,
    Write,
    ReadFrom,
    WriteTo,
    HttpTransactionStart,
    HttpTransactionDone,
    HttpRequestMetadata,
    HttpResponseMetadata,
    HttpRequestBodySnapshot,
    HttpResponseBodySnapshot,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::ResolveStart => "resolve_start",
            EventName::ResolveDone => "resolve_done",
            EventName::DnsRoundTripStart => "dns_round_trip_start",
            EventName::DnsRoundTripDone => "dns_round_trip_done",
            EventName::Connect => "connect",
            EventName::TlsHandshakeStart => "tls_handshake_start",
            EventName::TlsHandshakeDone => "tls_handshake_done",
            EventName::QuicHandshakeStart => "quic_handshake_start",
            EventName::QuicHandshakeDone => "quic_handshake_done",
            EventName::Read => "read",
            EventName::Write => "write",
            EventName::ReadFrom => "read_from",
            EventName::WriteTo => "write_to",
            EventName::HttpTransactionStart => "http_transaction_start",
            EventName::HttpTransactionDone => "http_transaction_done",
            EventName::HttpRequestMetadata => "http_request_metadata",
            EventName::HttpResponseMetadata => "http_response_metadata",
            EventName::HttpRequestBodySnapshot => "http_request_body_snapshot",
            EventName::HttpResponseBodySnapshot => "http_response_body_snapshot",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat payload shared by every event. Absent fields are omitted from JSON
/// and come back absent, so `Some(0)` never collapses into `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub dns_query: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub dns_reply: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_is_truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub data: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_headers: Option<HttpHeaders>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_tls_verify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_cipher_suite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_negotiated_proto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_next_protos: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", with = "base64_list")]
    pub tls_peer_certs: Option<Vec<Vec<u8>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: EventName,
    pub value: EventValue,
}

impl Event {
    pub fn new(name: EventName, value: EventValue) -> Self {
        Self { name, value }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

mod base64_list {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        chain: &Option<Vec<Vec<u8>>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match chain {
            Some(chain) => serializer.collect_seq(chain.iter().map(|der| STANDARD.encode(der))),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<Vec<u8>>>, D::Error> {
        let encoded: Option<Vec<String>> = Option::deserialize(deserializer)?;
        encoded
            .map(|list| {
                list.into_iter()
                    .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
                    .collect()
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn names_serialize_as_their_wire_string() {
        let names = [
            EventName::ResolveStart,
            EventName::Connect,
            EventName::ReadFrom,
            EventName::HttpResponseBodySnapshot,
        ];
        for name in names {
            let json = serde_json::to_value(name).unwrap();
            assert_eq!(json, serde_json::Value::from(name.as_str()));
        }
    }

    #[test]
    fn absent_fields_are_omitted() {
        let event = Event::new(
            EventName::ResolveStart,
            EventValue {
                hostname: Some("example.com".to_owned()),
                ..EventValue::default()
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "resolve_start", "value": {"hostname": "example.com"}})
        );
    }

    #[test]
    fn round_trip_keeps_zero_values_distinct_from_absent() {
        let event = Event::new(
            EventName::Read,
            EventValue {
                num_bytes: Some(0),
                data: Some(Vec::new()),
                data_is_truncated: Some(false),
                duration: Some(Duration::from_micros(1500)),
                failure: Some(FailureCode::EofError),
                tls_peer_certs: Some(vec![vec![0x30, 0x82, 0x01], vec![0xde, 0xad]]),
                dns_query: Some(vec![0xab, 0xcd, 0x01, 0x00]),
                time: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
                ..EventValue::default()
            },
        );
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.value.address, None);
        assert_eq!(decoded.value.http_status_code, None);
        assert_eq!(decoded.value.num_bytes, Some(0));
    }

    #[test]
    fn bytes_are_standard_base64() {
        let value = EventValue {
            dns_reply: Some(b"hi?".to_vec()),
            ..EventValue::default()
        };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["dns_reply"], "aGk/");
    }

    #[test]
    fn duration_uses_humantime() {
        let value = EventValue {
            duration: Some(Duration::from_millis(250)),
            ..EventValue::default()
        };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["duration"], "250ms");
    }
}
