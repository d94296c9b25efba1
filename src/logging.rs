use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Config;

type InitResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Installs the global subscriber. `RUST_LOG` overrides the level picked from
/// the config. The chat UI owns the terminal, so without a log file its
/// output is dropped.
pub fn init(config: &Config) -> InitResult {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive()));
    let registry = tracing_subscriber::registry().with(filter);

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .try_init()?;
        }
        None if config.interactive => {
            registry.with(fmt::layer().with_writer(io::sink)).try_init()?;
        }
        None => {
            registry
                .with(fmt::layer().with_target(false).with_writer(io::stderr))
                .try_init()?;
        }
    }

    Ok(())
}
