use arbor::common::logger as core_logger;
use log::LevelFilter;
use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_test_logger() {
    INIT.call_once(|| {
        // INFO keeps CI output readable; RUST_LOG still overrides it
        core_logger::initialize_logger_with_level(LevelFilter::Info);
    });
}
