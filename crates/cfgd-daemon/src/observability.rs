//! Tracing initialization
//!
//! `RUST_LOG` wins over the configured filter. Output goes to stderr so the
//! CLI can print task snapshots on stdout. Initialization is guarded by
//! `OnceLock` so repeated calls (tests, embedding) are harmless.

use crate::settings::LogSettings;
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once
pub fn init_tracing(settings: &LogSettings) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&settings.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let json = settings.json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        });
        let plain = (!settings.json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
        });

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(json)
            .with(plain)
            .try_init();
    });
}
