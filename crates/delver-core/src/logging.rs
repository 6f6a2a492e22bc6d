//! Tracing subscriber bootstrap.
//!
//! Call once at startup. The filter comes from `RUST_LOG` with an `info`
//! default; `json` switches the formatter for log aggregation. Repeated
//! calls are no-ops (`try_init`), which keeps tests that each initialize
//! logging from panicking.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global tracing subscriber.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init();
    }
}
