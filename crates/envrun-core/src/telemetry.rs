//! Log output for the envrun binary.
//!
//! Every log line goes to stderr. Stdout carries only what the run produces
//! for its reader: per-environment command lines, the summary and the report
//! path. The CLI's `--verbose`/`--quiet` flags pick the default level through
//! [`level_for`]; a set `RUST_LOG` overrides it.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// `--verbose` wins over `--quiet`; with neither only warnings show.
pub fn level_for(verbose: bool, quiet: bool) -> Level {
    match (verbose, quiet) {
        (true, _) => Level::DEBUG,
        (false, true) => Level::ERROR,
        (false, false) => Level::WARN,
    }
}

/// Install the global subscriber writing to stderr, as JSON lines when
/// `json` is set. Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let output = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let output = if json {
        output.json().boxed()
    } else {
        output.boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(output)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_flags() {
        assert_eq!(level_for(true, false), Level::DEBUG);
        assert_eq!(level_for(true, true), Level::DEBUG);
        assert_eq!(level_for(false, true), Level::ERROR);
        assert_eq!(level_for(false, false), Level::WARN);
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
