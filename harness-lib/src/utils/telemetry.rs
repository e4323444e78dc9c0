use std::io::IsTerminal as _;

use rama::telemetry::tracing::{
    self,
    metadata::LevelFilter,
    subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryConfig {
    pub verbose: bool,
    pub pretty: bool,
}

/// Configures structured logging with runtime control via `RUST_LOG`.
///
/// Defaults to INFO; `--verbose` lowers the default to DEBUG. `RUST_LOG`
/// always wins over both.
pub fn init_tracing(cfg: TelemetryConfig) {
    let directive = if cfg.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
    .into();

    if cfg.pretty {
        tracing::subscriber::fmt()
            .pretty()
            .with_ansi(std::io::stderr().is_terminal())
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(directive)
                    .from_env_lossy(),
            )
            .init();
    } else {
        tracing::subscriber::registry()
            .with(fmt::layer())
            .with(
                EnvFilter::builder()
                    .with_default_directive(directive)
                    .from_env_lossy(),
            )
            .init();
    }

    tracing::debug!("tracing is set up");
}
