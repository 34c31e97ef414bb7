use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub const DEFAULT_DIRECTIVE: &str = "info";

/// Installs the global subscriber, filtered by `RUST_LOG` or `info`.
pub fn init() -> bool {
    init_with_default(DEFAULT_DIRECTIVE)
}

/// Installs a stderr subscriber. `RUST_LOG` wins over `directive`.
/// Returns false if a global subscriber was already set.
pub fn init_with_default(directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_refused() {
        init_with_default("debug");
        assert!(!init());
    }
}
