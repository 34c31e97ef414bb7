use std::collections::HashMap;

use lazy_static::lazy_static;

use super::FailureCode;

#[cfg(unix)]
mod codes {
    pub use libc::{
        EACCES, EADDRINUSE, EADDRNOTAVAIL, EAFNOSUPPORT, EALREADY, EBADF, ECANCELED,
        ECONNABORTED, ECONNREFUSED, ECONNRESET, EDESTADDRREQ, EFAULT, EHOSTUNREACH, EINTR,
        EINVAL, EISCONN, EMSGSIZE, ENETDOWN, ENETRESET, ENETUNREACH, ENOBUFS, ENOPROTOOPT,
        ENOTCONN, ENOTSOCK, EPROTONOSUPPORT, EPROTOTYPE, ETIMEDOUT, EWOULDBLOCK,
    };
}

// Winsock reports socket failures with its own WSAE* numbering.
#[cfg(windows)]
mod codes {
    pub const EINTR: i32 = 10004;
    pub const EBADF: i32 = 10009;
    pub const EACCES: i32 = 10013;
    pub const EFAULT: i32 = 10014;
    pub const EINVAL: i32 = 10022;
    pub const EWOULDBLOCK: i32 = 10035;
    pub const EALREADY: i32 = 10037;
    pub const ENOTSOCK: i32 = 10038;
    pub const EDESTADDRREQ: i32 = 10039;
    pub const EMSGSIZE: i32 = 10040;
    pub const EPROTOTYPE: i32 = 10041;
    pub const ENOPROTOOPT: i32 = 10042;
    pub const EPROTONOSUPPORT: i32 = 10043;
    pub const EAFNOSUPPORT: i32 = 10047;
    pub const EADDRINUSE: i32 = 10048;
    pub const EADDRNOTAVAIL: i32 = 10049;
    pub const ENETDOWN: i32 = 10050;
    pub const ENETUNREACH: i32 = 10051;
    pub const ENETRESET: i32 = 10052;
    pub const ECONNABORTED: i32 = 10053;
    pub const ECONNRESET: i32 = 10054;
    pub const ENOBUFS: i32 = 10055;
    pub const EISCONN: i32 = 10056;
    pub const ENOTCONN: i32 = 10057;
    pub const ETIMEDOUT: i32 = 10060;
    pub const ECONNREFUSED: i32 = 10061;
    pub const EHOSTUNREACH: i32 = 10065;
    pub const ECANCELED: i32 = 10103;
}

/// Every OS error number we classify, paired with its failure code.
pub const SYSTEM_ERRORS: &[(i32, FailureCode)] = &[
    (codes::ECANCELED, FailureCode::OperationCanceled),
    (codes::ECONNREFUSED, FailureCode::ConnectionRefused),
    (codes::ECONNRESET, FailureCode::ConnectionReset),
    (codes::EHOSTUNREACH, FailureCode::HostUnreachable),
    (codes::ETIMEDOUT, FailureCode::TimedOut),
    (codes::EAFNOSUPPORT, FailureCode::AddressFamilyNotSupported),
    (codes::EADDRINUSE, FailureCode::AddressInUse),
    (codes::EADDRNOTAVAIL, FailureCode::AddressNotAvailable),
    (codes::EISCONN, FailureCode::AlreadyConnected),
    (codes::EFAULT, FailureCode::BadAddress),
    (codes::EBADF, FailureCode::BadFileDescriptor),
    (codes::ECONNABORTED, FailureCode::ConnectionAborted),
    (codes::EALREADY, FailureCode::ConnectionAlreadyInProgress),
    (codes::EDESTADDRREQ, FailureCode::DestinationAddressRequired),
    (codes::EINTR, FailureCode::Interrupted),
    (codes::EINVAL, FailureCode::InvalidArgument),
    (codes::EMSGSIZE, FailureCode::MessageSize),
    (codes::ENETDOWN, FailureCode::NetworkDown),
    (codes::ENETRESET, FailureCode::NetworkReset),
    (codes::ENETUNREACH, FailureCode::NetworkUnreachable),
    (codes::ENOBUFS, FailureCode::NoBufferSpace),
    (codes::ENOPROTOOPT, FailureCode::NoProtocolOption),
    (codes::ENOTSOCK, FailureCode::NotASocket),
    (codes::ENOTCONN, FailureCode::NotConnected),
    (codes::EWOULDBLOCK, FailureCode::OperationWouldBlock),
    (codes::EACCES, FailureCode::PermissionDenied),
    (codes::EPROTONOSUPPORT, FailureCode::ProtocolNotSupported),
    (codes::EPROTOTYPE, FailureCode::WrongProtocolType),
];

lazy_static! {
    static ref ERRNO_TABLE: HashMap<i32, FailureCode> = SYSTEM_ERRORS.iter().copied().collect();
}

/// Looks up an OS error number. Unlisted numbers are not classified.
pub fn classify_errno(errno: i32) -> Option<FailureCode> {
    ERRNO_TABLE.get(&errno).copied()
}

/// Reverse lookup, the platform error number behind a system failure code.
pub fn errno_of(code: FailureCode) -> Option<i32> {
    SYSTEM_ERRORS
        .iter()
        .find(|(_, listed)| *listed == code)
        .map(|(errno, _)| *errno)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_errno_maps_to_its_code() {
        for (errno, code) in SYSTEM_ERRORS {
            assert_eq!(classify_errno(*errno), Some(*code), "errno {errno}");
        }
    }

    #[test]
    fn table_has_no_duplicate_errno() {
        assert_eq!(ERRNO_TABLE.len(), SYSTEM_ERRORS.len());
    }

    #[test]
    fn unlisted_errno_is_not_classified() {
        assert_eq!(classify_errno(0), None);
        assert_eq!(classify_errno(-1), None);
    }

    #[test]
    fn reverse_lookup() {
        let errno = errno_of(FailureCode::ConnectionRefused).unwrap();
        assert_eq!(classify_errno(errno), Some(FailureCode::ConnectionRefused));
        assert_eq!(errno_of(FailureCode::DnsBogonError), None);
    }
}
