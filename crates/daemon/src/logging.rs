/// Logging configuration
///
/// Structured logging with tracing. `RUST_LOG` overrides the default filter.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Default filter directives
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "onionp2p=debug"
    } else {
        "onionp2p=info"
    }
}

/// Initialize logging with environment-based filtering
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    // A subscriber may already be installed when embedded in tests
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_raises_level() {
        assert_eq!(default_directives(false), "onionp2p=info");
        assert_eq!(default_directives(true), "onionp2p=debug");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
