use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Installs the global subscriber once per process.
///
/// `json` selects machine-readable output (production); otherwise a pretty,
/// human-oriented layout is used. Filtering honours `RUST_LOG` and defaults to `info`.
pub fn init_tracing(service_name: &'static str, json: bool) {
    LOGGER_INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // stderr keeps stdout free for command output.
        let base = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            // Includes timing when the span closes
            .with_span_events(fmt::format::FmtSpan::CLOSE);

        if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.json())
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.pretty())
                .init();
        }

        tracing::info!(service = service_name, json, "logger initialized");
    });
}
