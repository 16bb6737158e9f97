//! Tracing setup: an `EnvFilter` seeded by `LOG_LEVEL` when `RUST_LOG` is
//! unset, matching the teacher's dedicated telemetry module convention.

use crate::config::Config;
use tracing_subscriber::EnvFilter;

pub fn init(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
