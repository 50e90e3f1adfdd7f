//! Tracing subscriber setup
//!
//! Library code only emits `tracing` events; the runner binary calls
//! [`init`] once to decide where they go.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::core::config::LoggingConfig;
use crate::core::error::{AgentverseError, Result};

/// Install the global subscriber described by `config`
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AgentverseError::config(format!("Invalid log level: {}", e)))?;

    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let installed = if config.json {
        registry.with(console.json()).try_init()
    } else {
        registry.with(console).try_init()
    };

    installed.map_err(|e| AgentverseError::config(format!("Logging already initialized: {}", e)))
}
