use std::sync::Once;

use crate::common::config::StoreConfig;
use env_logger::Builder;
use log::LevelFilter;

static INIT: Once = Once::new();

pub fn initialize_logger() {
    initialize_logger_with_level(LevelFilter::Info);
}

/// Same as [`initialize_logger`] with an explicit default level; `RUST_LOG` still wins.
pub fn initialize_logger_with_level(level: LevelFilter) {
    // Use call_once_force to recover if an earlier initialization attempt panicked.
    INIT.call_once_force(|_| {
        let mut builder = Builder::new();

        builder
            .filter_level(level)
            .filter_module("arbor", level)
            .filter_module("arbor::storage", level)
            .filter_module("arbor::concurrency", level)
            .format_timestamp_millis()
            .parse_default_env();

        // Avoid panicking if the logger was already initialized elsewhere.
        let _ = builder.try_init();
    });
}

/// Initializes logging at the level named in `config.log_level`.
pub fn initialize_logger_from_config(config: &StoreConfig) {
    initialize_logger_with_level(parse_level(&config.log_level));
}

/// Maps a textual level from configuration, defaulting to `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}
