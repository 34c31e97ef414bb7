//! Portable failure taxonomy.
//!
//! Every error produced by a network operation is reduced to one
//! [`FailureCode`], a stable string that does not depend on the operating
//! system, the locale, or the TLS/QUIC library in use. Classification looks
//! at the *type* of each error in the cause chain and never at its message.

use std::error::Error;
use std::fmt;
use std::io;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::context::ContextError;
use crate::netx::DnsError;

mod errno;

pub use errno::{classify_errno, errno_of, SYSTEM_ERRORS};

/// Closed set of failure codes written into traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    // System errors
    OperationCanceled,
    ConnectionRefused,
    ConnectionReset,
    HostUnreachable,
    TimedOut,
    AddressFamilyNotSupported,
    AddressInUse,
    AddressNotAvailable,
    AlreadyConnected,
    BadAddress,
    BadFileDescriptor,
    ConnectionAborted,
    ConnectionAlreadyInProgress,
    DestinationAddressRequired,
    Interrupted,
    InvalidArgument,
    MessageSize,
    NetworkDown,
    NetworkReset,
    NetworkUnreachable,
    NoBufferSpace,
    NoProtocolOption,
    NotASocket,
    NotConnected,
    OperationWouldBlock,
    PermissionDenied,
    ProtocolNotSupported,
    WrongProtocolType,

    // Library errors
    DnsBogonError,
    DnsNxdomainError,
    DnsNoAnswer,
    DnsRefusedError,
    DnsServerMisbehaving,
    EofError,
    GenericTimeoutError,
    QuicIncompatibleVersion,
    SslFailedHandshake,
    SslInvalidHostname,
    SslUnknownAuthority,
    SslInvalidCertificate,
    JsonParseError,
    ConnectionAlreadyClosed,

    /// Written when nothing else matched, so a failure is never dropped.
    UnknownFailure,
}

impl FailureCode {
    pub const ALL: &'static [FailureCode] = &[
        FailureCode::OperationCanceled,
        FailureCode::ConnectionRefused,
        FailureCode::ConnectionReset,
        FailureCode::HostUnreachable,
        FailureCode::TimedOut,
        FailureCode::AddressFamilyNotSupported,
        FailureCode::AddressInUse,
        FailureCode::AddressNotAvailable,
        FailureCode::AlreadyConnected,
        FailureCode::BadAddress,
        FailureCode::BadFileDescriptor,
        FailureCode::ConnectionAborted,
        FailureCode::ConnectionAlreadyInProgress,
        FailureCode::DestinationAddressRequired,
        FailureCode::Interrupted,
        FailureCode::InvalidArgument,
        FailureCode::MessageSize,
        FailureCode::NetworkDown,
        FailureCode::NetworkReset,
        FailureCode::NetworkUnreachable,
        FailureCode::NoBufferSpace,
        FailureCode::NoProtocolOption,
        FailureCode::NotASocket,
        FailureCode::NotConnected,
        FailureCode::OperationWouldBlock,
        FailureCode::PermissionDenied,
        FailureCode::ProtocolNotSupported,
        FailureCode::WrongProtocolType,
        FailureCode::DnsBogonError,
        FailureCode::DnsNxdomainError,
        FailureCode::DnsNoAnswer,
        FailureCode::DnsRefusedError,
        FailureCode::DnsServerMisbehaving,
        FailureCode::EofError,
        FailureCode::GenericTimeoutError,
        FailureCode::QuicIncompatibleVersion,
        FailureCode::SslFailedHandshake,
        FailureCode::SslInvalidHostname,
        FailureCode::SslUnknownAuthority,
        FailureCode::SslInvalidCertificate,
        FailureCode::JsonParseError,
        FailureCode::ConnectionAlreadyClosed,
        FailureCode::UnknownFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::OperationCanceled => "operation_canceled",
            FailureCode::ConnectionRefused => "connection_refused",
            FailureCode::ConnectionReset => "connection_reset",
            FailureCode::HostUnreachable => "host_unreachable",
            FailureCode::TimedOut => "timed_out",
            FailureCode::AddressFamilyNotSupported => "address_family_not_supported",
            FailureCode::AddressInUse => "address_in_use",
            FailureCode::AddressNotAvailable => "address_not_available",
            FailureCode::AlreadyConnected => "already_connected",
            FailureCode::BadAddress => "bad_address",
            FailureCode::BadFileDescriptor => "bad_file_descriptor",
            FailureCode::ConnectionAborted => "connection_aborted",
            FailureCode::ConnectionAlreadyInProgress => "connection_already_in_progress",
            FailureCode::DestinationAddressRequired => "destination_address_required",
            FailureCode::Interrupted => "interrupted",
            FailureCode::InvalidArgument => "invalid_argument",
            FailureCode::MessageSize => "message_size",
            FailureCode::NetworkDown => "network_down",
            FailureCode::NetworkReset => "network_reset",
            FailureCode::NetworkUnreachable => "network_unreachable",
            FailureCode::NoBufferSpace => "no_buffer_space",
            FailureCode::NoProtocolOption => "no_protocol_option",
            FailureCode::NotASocket => "not_a_socket",
            FailureCode::NotConnected => "not_connected",
            FailureCode::OperationWouldBlock => "operation_would_block",
            FailureCode::PermissionDenied => "permission_denied",
            FailureCode::ProtocolNotSupported => "protocol_not_supported",
            FailureCode::WrongProtocolType => "wrong_protocol_type",
            FailureCode::DnsBogonError => "dns_bogon_error",
            FailureCode::DnsNxdomainError => "dns_nxdomain_error",
            FailureCode::DnsNoAnswer => "dns_no_answer",
            FailureCode::DnsRefusedError => "dns_refused_error",
            FailureCode::DnsServerMisbehaving => "dns_server_misbehaving",
            FailureCode::EofError => "eof_error",
            FailureCode::GenericTimeoutError => "generic_timeout_error",
            FailureCode::QuicIncompatibleVersion => "quic_incompatible_version",
            FailureCode::SslFailedHandshake => "ssl_failed_handshake",
            FailureCode::SslInvalidHostname => "ssl_invalid_hostname",
            FailureCode::SslUnknownAuthority => "ssl_unknown_authority",
            FailureCode::SslInvalidCertificate => "ssl_invalid_certificate",
            FailureCode::JsonParseError => "json_parse_error",
            FailureCode::ConnectionAlreadyClosed => "connection_already_closed",
            FailureCode::UnknownFailure => "unknown_failure",
        }
    }

    /// Whether this code stands for an OS error number.
    pub fn is_system_error(&self) -> bool {
        SYSTEM_ERRORS.iter().any(|(_, code)| code == self)
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown failure code: {0}")]
pub struct UnknownFailureCode(pub String);

impl FromStr for FailureCode {
    type Err = UnknownFailureCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FailureCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| UnknownFailureCode(s.to_owned()))
    }
}

impl Serialize for FailureCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FailureCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

const MAX_CAUSE_DEPTH: usize = 16;

/// Structural matcher for one family of library errors.
type LibraryRule = fn(&(dyn Error + 'static)) -> Option<FailureCode>;

const LIBRARY_RULES: &[LibraryRule] = &[
    context_rule,
    elapsed_rule,
    eof_rule,
    dns_rule,
    rustls_rule,
    quic_connection_rule,
    quic_connect_rule,
    json_rule,
];

/// Classifies an error, or returns `None` when nothing in its cause chain
/// is recognized.
///
/// Precedence: cancellation anywhere in the chain, then OS error numbers,
/// then the library table, then the timeout fallback.
pub fn classify(err: &(dyn Error + 'static)) -> Option<FailureCode> {
    let chain = causes(err);

    if chain
        .iter()
        .any(|cause| matches!(cause.downcast_ref::<ContextError>(), Some(ContextError::Canceled)))
    {
        return Some(FailureCode::OperationCanceled);
    }

    let errno = chain
        .iter()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .filter_map(io::Error::raw_os_error)
        .find_map(classify_errno);
    if errno.is_some() {
        return errno;
    }

    for cause in &chain {
        if let Some(code) = LIBRARY_RULES.iter().find_map(|rule| rule(*cause)) {
            return Some(code);
        }
    }

    chain.iter().find_map(|cause| timeout_rule(*cause))
}

/// Like [`classify`], falling back to [`FailureCode::UnknownFailure`].
pub fn classify_or_unknown(err: &(dyn Error + 'static)) -> FailureCode {
    classify(err).unwrap_or(FailureCode::UnknownFailure)
}

/// The error itself, whatever an `io::Error` wraps, and every `source()`.
fn causes<'a>(err: &'a (dyn Error + 'static)) -> Vec<&'a (dyn Error + 'static)> {
    let mut chain: Vec<&'a (dyn Error + 'static)> = Vec::new();
    let mut next = Some(err);
    while let Some(cause) = next {
        chain.push(cause);
        if chain.len() >= MAX_CAUSE_DEPTH {
            break;
        }
        next = match cause.downcast_ref::<io::Error>().and_then(io::Error::get_ref) {
            Some(inner) => Some(inner as &(dyn Error + 'static)),
            None => cause.source(),
        };
    }
    chain
}

fn context_rule(err: &(dyn Error + 'static)) -> Option<FailureCode> {
    match err.downcast_ref::<ContextError>()? {
        ContextError::Canceled => Some(FailureCode::OperationCanceled),
        ContextError::DeadlineExceeded => Some(FailureCode::GenericTimeoutError),
    }
}

fn elapsed_rule(err: &(dyn Error + 'static)) -> Option<FailureCode> {
    err.downcast_ref::<tokio::time::error::Elapsed>()
        .map(|_| FailureCode::GenericTimeoutError)
}

fn eof_rule(err: &(dyn Error + 'static)) -> Option<FailureCode> {
    let err = err.downcast_ref::<io::Error>()?;
    (err.raw_os_error().is_none() && err.kind() == io::ErrorKind::UnexpectedEof)
        .then_some(FailureCode::EofError)
}

fn dns_rule(err: &(dyn Error + 'static)) -> Option<FailureCode> {
    Some(match err.downcast_ref::<DnsError>()? {
        DnsError::Bogon(_) => FailureCode::DnsBogonError,
        DnsError::NxDomain => FailureCode::DnsNxdomainError,
        DnsError::NoAnswer => FailureCode::DnsNoAnswer,
        DnsError::Refused => FailureCode::DnsRefusedError,
        DnsError::ServerMisbehaving | DnsError::ResponseCode(_) => {
            FailureCode::DnsServerMisbehaving
        }
    })
}

fn rustls_rule(err: &(dyn Error + 'static)) -> Option<FailureCode> {
    use rustls::CertificateError;

    Some(match err.downcast_ref::<rustls::Error>()? {
        rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer) => {
            FailureCode::SslUnknownAuthority
        }
        rustls::Error::InvalidCertificate(CertificateError::NotValidForName) => {
            FailureCode::SslInvalidHostname
        }
        rustls::Error::InvalidCertificate(_) => FailureCode::SslInvalidCertificate,
        _ => FailureCode::SslFailedHandshake,
    })
}

fn quic_connection_rule(err: &(dyn Error + 'static)) -> Option<FailureCode> {
    match err.downcast_ref::<quinn::ConnectionError>()? {
        quinn::ConnectionError::VersionMismatch => Some(FailureCode::QuicIncompatibleVersion),
        quinn::ConnectionError::TimedOut => Some(FailureCode::GenericTimeoutError),
        quinn::ConnectionError::Reset => Some(FailureCode::ConnectionReset),
        quinn::ConnectionError::LocallyClosed => Some(FailureCode::ConnectionAlreadyClosed),
        quinn::ConnectionError::TransportError(error) => crypto_alert_rule(u64::from(error.code)),
        quinn::ConnectionError::ConnectionClosed(close) => {
            crypto_alert_rule(u64::from(close.error_code))
        }
        _ => None,
    }
}

fn quic_connect_rule(err: &(dyn Error + 'static)) -> Option<FailureCode> {
    match err.downcast_ref::<quinn::ConnectError>()? {
        quinn::ConnectError::UnsupportedVersion => Some(FailureCode::QuicIncompatibleVersion),
        _ => None,
    }
}

fn json_rule(err: &(dyn Error + 'static)) -> Option<FailureCode> {
    err.downcast_ref::<serde_json::Error>()
        .map(|_| FailureCode::JsonParseError)
}

fn timeout_rule(err: &(dyn Error + 'static)) -> Option<FailureCode> {
    let err = err.downcast_ref::<io::Error>()?;
    (err.raw_os_error().is_none() && err.kind() == io::ErrorKind::TimedOut)
        .then_some(FailureCode::GenericTimeoutError)
}

// QUIC carries TLS alerts as transport errors 0x100..=0x1ff (RFC 9001 §4.8).
const QUIC_CRYPTO_ERROR_FIRST: u64 = 0x100;
const QUIC_CRYPTO_ERROR_LAST: u64 = 0x1ff;

const ALERT_BAD_CERTIFICATE: u64 = 42;
const ALERT_UNSUPPORTED_CERTIFICATE: u64 = 43;
const ALERT_CERTIFICATE_REVOKED: u64 = 44;
const ALERT_CERTIFICATE_EXPIRED: u64 = 45;
const ALERT_CERTIFICATE_UNKNOWN: u64 = 46;
const ALERT_UNKNOWN_CA: u64 = 48;
const ALERT_UNRECOGNIZED_NAME: u64 = 112;

fn crypto_alert_rule(code: u64) -> Option<FailureCode> {
    if !(QUIC_CRYPTO_ERROR_FIRST..=QUIC_CRYPTO_ERROR_LAST).contains(&code) {
        return None;
    }
    Some(match code - QUIC_CRYPTO_ERROR_FIRST {
        ALERT_BAD_CERTIFICATE
        | ALERT_UNSUPPORTED_CERTIFICATE
        | ALERT_CERTIFICATE_REVOKED
        | ALERT_CERTIFICATE_EXPIRED
        | ALERT_CERTIFICATE_UNKNOWN => FailureCode::SslInvalidCertificate,
        ALERT_UNKNOWN_CA => FailureCode::SslUnknownAuthority,
        ALERT_UNRECOGNIZED_NAME => FailureCode::SslInvalidHostname,
        _ => FailureCode::SslFailedHandshake,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netx::TlsError;
    use std::net::{IpAddr, Ipv4Addr};

    fn wrapped(inner: impl Error + Send + Sync + 'static) -> io::Error {
        io::Error::new(io::ErrorKind::Other, inner)
    }

    #[test]
    fn codes_round_trip_through_their_string_form() {
        for code in FailureCode::ALL {
            assert_eq!(code.as_str().parse::<FailureCode>(), Ok(*code));
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, serde_json::Value::from(code.as_str()));
            let back: FailureCode = serde_json::from_value(json).unwrap();
            assert_eq!(back, *code);
        }
        assert!("not_a_failure".parse::<FailureCode>().is_err());
    }

    #[test]
    fn system_error_flag_matches_errno_table() {
        assert!(FailureCode::ConnectionRefused.is_system_error());
        assert!(FailureCode::PermissionDenied.is_system_error());
        assert!(!FailureCode::DnsBogonError.is_system_error());
        assert!(!FailureCode::UnknownFailure.is_system_error());
    }

    #[test]
    fn os_errors_classify_through_the_errno_table() {
        for (errno, code) in SYSTEM_ERRORS {
            let err = io::Error::from_raw_os_error(*errno);
            assert_eq!(classify(&err), Some(*code), "{err}");
        }
    }

    #[test]
    fn unmapped_errors_stay_unclassified() {
        let err = io::Error::from_raw_os_error(0);
        assert_eq!(classify(&err), None);
        assert_eq!(classify_or_unknown(&err), FailureCode::UnknownFailure);

        let err = io::Error::new(io::ErrorKind::Other, "something odd");
        assert_eq!(classify(&err), None);
        assert_eq!(classify_or_unknown(&err), FailureCode::UnknownFailure);
    }

    #[test]
    fn cancellation_wins_over_everything_else() {
        let err = wrapped(ContextError::Canceled);
        assert_eq!(classify(&err), Some(FailureCode::OperationCanceled));
        assert_eq!(
            classify(&ContextError::DeadlineExceeded),
            Some(FailureCode::GenericTimeoutError)
        );
    }

    #[tokio::test]
    async fn elapsed_timer_is_a_generic_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        assert_eq!(classify(&elapsed), Some(FailureCode::GenericTimeoutError));
    }

    #[test]
    fn eof_and_timeout_kinds_without_errno() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "tls handshake eof");
        assert_eq!(classify(&eof), Some(FailureCode::EofError));

        let timeout = io::Error::new(io::ErrorKind::TimedOut, "read timed out");
        assert_eq!(classify(&timeout), Some(FailureCode::GenericTimeoutError));
    }

    #[test]
    fn dns_errors_map_to_dns_codes() {
        let bogon = DnsError::Bogon(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(classify(&bogon), Some(FailureCode::DnsBogonError));
        assert_eq!(classify(&DnsError::NxDomain), Some(FailureCode::DnsNxdomainError));
        assert_eq!(classify(&DnsError::NoAnswer), Some(FailureCode::DnsNoAnswer));
        assert_eq!(classify(&DnsError::Refused), Some(FailureCode::DnsRefusedError));
        assert_eq!(
            classify(&DnsError::ResponseCode(4)),
            Some(FailureCode::DnsServerMisbehaving)
        );
    }

    #[test]
    fn certificate_errors_are_told_apart() {
        use rustls::CertificateError;

        let cases = [
            (CertificateError::UnknownIssuer, FailureCode::SslUnknownAuthority),
            (CertificateError::NotValidForName, FailureCode::SslInvalidHostname),
            (CertificateError::Expired, FailureCode::SslInvalidCertificate),
            (CertificateError::BadSignature, FailureCode::SslInvalidCertificate),
        ];
        for (cert_err, expected) in cases {
            let err = io::Error::new(
                io::ErrorKind::InvalidData,
                rustls::Error::InvalidCertificate(cert_err),
            );
            assert_eq!(classify(&err), Some(expected));
        }

        let err = io::Error::new(io::ErrorKind::InvalidData, rustls::Error::HandshakeNotComplete);
        assert_eq!(classify(&err), Some(FailureCode::SslFailedHandshake));
    }

    #[test]
    fn handshake_error_is_classified_through_its_source() {
        let err = TlsError::Handshake {
            source: io::Error::new(
                io::ErrorKind::InvalidData,
                rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
            ),
            peer_certificates: vec![vec![0x30, 0x82]],
        };
        assert_eq!(classify(&err), Some(FailureCode::SslUnknownAuthority));
    }

    #[test]
    fn quic_errors() {
        assert_eq!(
            classify(&quinn::ConnectionError::VersionMismatch),
            Some(FailureCode::QuicIncompatibleVersion)
        );
        assert_eq!(
            classify(&quinn::ConnectionError::TimedOut),
            Some(FailureCode::GenericTimeoutError)
        );
        assert_eq!(
            classify(&quinn::ConnectError::UnsupportedVersion),
            Some(FailureCode::QuicIncompatibleVersion)
        );
        assert_eq!(classify(&quinn::ConnectError::EndpointStopping), None);
    }

    #[test]
    fn quic_crypto_alerts() {
        assert_eq!(crypto_alert_rule(0x100 + 42), Some(FailureCode::SslInvalidCertificate));
        assert_eq!(crypto_alert_rule(0x100 + 48), Some(FailureCode::SslUnknownAuthority));
        assert_eq!(crypto_alert_rule(0x100 + 112), Some(FailureCode::SslInvalidHostname));
        assert_eq!(crypto_alert_rule(0x100 + 40), Some(FailureCode::SslFailedHandshake));
        assert_eq!(crypto_alert_rule(0x0a), None);
        assert_eq!(crypto_alert_rule(0x200), None);
    }

    #[test]
    fn malformed_json() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert_eq!(classify(&err), Some(FailureCode::JsonParseError));
    }

    #[test]
    fn errno_beats_library_rules() {
        let refused = io::Error::from_raw_os_error(errno_of(FailureCode::ConnectionRefused).unwrap());
        let err = TlsError::Handshake {
            source: refused,
            peer_certificates: Vec::new(),
        };
        assert_eq!(classify(&err), Some(FailureCode::ConnectionRefused));
    }
}
