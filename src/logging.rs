//! Tracing init for CLI runs. Adapted near-verbatim from the teacher's
//! `src/logging.rs`: `RUST_LOG`-driven `EnvFilter`, defaulting to `warn`,
//! compact formatting to stderr so stdout stays clean for machine-readable
//! output (`status`/`inspect`).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
