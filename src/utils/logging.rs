// src/utils/logging.rs
//! Logging configuration
//!
//! Thin wrapper over `env_logger` with the format used across the miner:
//! timestamp, level, module path and line. Respects `RUST_LOG` when set.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::env;

/// Initializes the logging subsystem with the default Info level.
pub fn init_logging() {
    common_log_config().filter(None, LevelFilter::Info).init();
}

/// Logging setup for verbose runs; defaults to Debug unless `RUST_LOG`
/// says otherwise.
pub fn init_verbose_logging() {
    let mut builder = common_log_config();

    if env::var("RUST_LOG").is_err() {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder.parse_env("RUST_LOG");
    }

    builder.init();
}

fn common_log_config() -> Builder {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;
            let ts = buf.timestamp_seconds();
            let level = record.level();
            let module = record.module_path().unwrap_or_default();
            let line = record.line().unwrap_or(0);

            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                ts,
                level,
                module,
                line,
                record.args()
            )
        })
        .target(Target::Stdout);

    builder
}
