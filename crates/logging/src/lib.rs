//! Verbosity-flag-driven tracing subscriber setup.
//!
//! The CLI's repeatable `-v` flag maps to a
//! [`tracing_subscriber::filter::LevelFilter`]; [`init`] wires that filter
//! into an `EnvFilter`-backed `tracing_subscriber` registry, letting
//! `RUST_LOG` override the verbosity-derived default for ad-hoc debugging
//! without touching the flag surface.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Maps a repeated `-v` count to a tracing level.
#[must_use]
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global tracing subscriber for this process.
///
/// `RUST_LOG` takes precedence when set; otherwise the filter is derived
/// from `verbosity` via [`level_for_verbosity`]. Call once, at process
/// startup.
pub fn init(verbosity: u8) {
    let default_level = level_for_verbosity(verbosity);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_verbosity_is_warn() {
        assert_eq!(level_for_verbosity(0), LevelFilter::WARN);
    }

    #[test]
    fn one_v_is_info() {
        assert_eq!(level_for_verbosity(1), LevelFilter::INFO);
    }

    #[test]
    fn two_vs_is_debug() {
        assert_eq!(level_for_verbosity(2), LevelFilter::DEBUG);
    }

    #[test]
    fn three_or_more_vs_is_trace() {
        assert_eq!(level_for_verbosity(3), LevelFilter::TRACE);
        assert_eq!(level_for_verbosity(255), LevelFilter::TRACE);
    }
}
