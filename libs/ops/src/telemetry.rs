use crate::error::{Error, Result};

use std::fmt;

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Install the global tracing subscriber.
///
/// `log_filter` is a `tracing_subscriber::filter::EnvFilter` directive,
/// e.g. "info,orbit_ops=debug".
pub fn init(log_filter: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(log_filter)
        .map_err(|e| Error::BadParameter(format!("invalid log filter {log_filter:?}: {e}")))?;
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
    Ok(())
}
