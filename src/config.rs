use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::netx::QuicConfig;

/// Default cap on recorded HTTP body bytes.
pub const DEFAULT_SNAPSHOT_SIZE: usize = 1 << 17;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration for one measurement session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub resolver: ResolverConfig,
    pub timeouts: TimeoutConfig,
    pub tls: TlsPolicy,
    pub quic: QuicPolicy,
    /// IP TTL applied to TCP sockets, for TTL-limited probing.
    pub socket_ttl: Option<u32>,
    pub snapshot_size: usize,
    /// Record a `read`/`write` event for every TCP I/O call.
    pub trace_read_write: bool,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::System,
            timeouts: TimeoutConfig::default(),
            tls: TlsPolicy::default(),
            quic: QuicPolicy::default(),
            socket_ttl: None,
            snapshot_size: DEFAULT_SNAPSHOT_SIZE,
            trace_read_write: false,
        }
    }
}

/// Which resolver the session starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolverConfig {
    System,
    Doh { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(with = "humantime_serde")]
    pub resolve: Duration,
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
    #[serde(with = "humantime_serde")]
    pub tls_handshake: Duration,
    #[serde(with = "humantime_serde")]
    pub quic_handshake: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            resolve: Duration::from_secs(4),
            connect: Duration::from_secs(15),
            tls_handshake: Duration::from_secs(10),
            quic_handshake: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsPolicy {
    pub next_protos: Vec<String>,
    pub insecure_skip_verify: bool,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            next_protos: vec!["h2".to_owned(), "http/1.1".to_owned()],
            insecure_skip_verify: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuicPolicy {
    pub enabled: bool,
    pub next_protos: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub max_idle_timeout: Duration,
}

impl Default for QuicPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            next_protos: vec!["h3".to_owned()],
            max_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl QuicPolicy {
    pub fn transport(&self) -> QuicConfig {
        QuicConfig {
            max_idle_timeout: self.max_idle_timeout,
            keep_alive_interval: None,
        }
    }
}

impl MeasurementConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("resolve", self.timeouts.resolve),
            ("connect", self.timeouts.connect),
            ("tls_handshake", self.timeouts.tls_handshake),
            ("quic_handshake", self.timeouts.quic_handshake),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, timeout)| timeout.is_zero()) {
            return Err(ConfigError::Invalid(format!("{name} timeout must be positive")));
        }
        if let ResolverConfig::Doh { url } = &self.resolver {
            if !url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!("DoH url must be https: {url}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = MeasurementConfig::from_json("{}").unwrap();
        assert_eq!(config, MeasurementConfig::default());
        assert_eq!(config.snapshot_size, DEFAULT_SNAPSHOT_SIZE);
    }

    #[test]
    fn humantime_durations_and_doh() {
        let config = MeasurementConfig::from_json(
            r#"{
                "resolver": {"kind": "doh", "url": "https://cloudflare-dns.com/dns-query"},
                "timeouts": {"resolve": "1s 500ms", "tls_handshake": "3s"},
                "socket_ttl": 5,
                "trace_read_write": true
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.resolver,
            ResolverConfig::Doh {
                url: "https://cloudflare-dns.com/dns-query".to_owned()
            }
        );
        assert_eq!(config.timeouts.resolve, Duration::from_millis(1500));
        assert_eq!(config.timeouts.tls_handshake, Duration::from_secs(3));
        assert_eq!(config.timeouts.connect, Duration::from_secs(15));
        assert_eq!(config.socket_ttl, Some(5));
        assert!(config.trace_read_write);
    }

    #[test]
    fn unknown_resolver_kind_is_rejected() {
        let err = MeasurementConfig::from_json(r#"{"resolver": {"kind": "carrier_pigeon"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn plaintext_doh_is_rejected() {
        let err = MeasurementConfig::from_json(r#"{"resolver": {"kind": "doh", "url": "http://dns.example/q"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = MeasurementConfig::from_json(r#"{"timeouts": {"connect": "0s"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
