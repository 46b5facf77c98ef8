//! Tracing subscriber setup for binaries and tests.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the application's choice. [`init_tracing`] is a ready-made one.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Output format for [`init_tracing_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a console subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once, and a subscriber installed by someone else
/// is left in place.
pub fn init_tracing() {
    init_tracing_with(LogFormat::default());
}

pub fn init_tracing_with(format: LogFormat) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let layer = match format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_names(true)
                .with_filter(filter)
                .boxed(),
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("global tracing subscriber already set; keeping it");
        }
    });
}
