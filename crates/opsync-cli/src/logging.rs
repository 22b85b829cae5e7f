//! Logging setup
//!
//! Logs go to stderr unless `log_file` is configured. The level comes from
//! `--verbose`, or from `RUST_LOG` when it is set.

use std::fs::OpenOptions;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use opsync_core::Config;

/// Filter directive for our two crates at `level`
fn directives(level: &str) -> String {
    format!("opsync_core={},opsync_cli={}", level, level)
}

pub fn init(config: &Config, verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Could not open log file {:?}", path))?;
            // ignore error if a subscriber is already installed
            let _ = builder.with_ansi(false).with_writer(file).try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_cover_both_crates() {
        assert_eq!(directives("debug"), "opsync_core=debug,opsync_cli=debug");
    }
}
