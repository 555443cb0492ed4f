use std::{fs, path::Path};

use anyhow::Context;
use tracing::debug;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

pub const LOG_FILE: &str = "pocketflow.log";
/// Newline-delimited JSON of flow run events only.
pub const EVENT_FILE: &str = "pocketflow.json";

/// Installs the global subscriber: stdout, plus daily-rotated files in
/// `logs_dir` when given. `RUST_LOG` wins over `log_level`.
///
/// Calling this again once a subscriber is installed does nothing.
pub fn init_tracing(log_level: &str, logs_dir: Option<&Path>) -> anyhow::Result<()> {
    let level = log_level.to_lowercase();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let stdout_layer = fmt::layer().with_target(false);

    let file_layers = match logs_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("could not create log directory {}", dir.display()))?;

            let txt_layer = fmt::layer()
                .with_writer(RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE))
                .with_ansi(false);

            let json_layer = fmt::layer()
                .json()
                .with_writer(RollingFileAppender::new(Rotation::DAILY, dir, EVENT_FILE))
                .with_target(true)
                .with_filter(EnvFilter::new("pocketflow::flow=info"));

            Some(txt_layer.and_then(json_layer))
        }
        None => None,
    };

    let installed = Registry::default()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layers)
        .try_init();

    if installed.is_err() {
        debug!("tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_is_repeatable_and_creates_log_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("logs");

        init_tracing("INFO", Some(&dir)).unwrap();
        init_tracing("debug", None).unwrap();

        assert!(dir.is_dir());
    }
}
