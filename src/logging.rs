//! Tracing subscriber setup.
//!
//! Events go to stderr so `ragq` stdout stays machine-readable (JSON
//! reports, TSV exports). `RUST_LOG` overrides `[logging].level`.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);

    // A second init (tests, embedding the library) is not an error.
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
}
