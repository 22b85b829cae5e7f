//! Config command handlers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use opsync_core::Config;

use crate::output::{Output, OutputFormat};

fn load(config_path: Option<&Path>) -> Result<(Config, PathBuf)> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_file_path);
    let config = Config::load_from_path(&path).context("Failed to load configuration")?;
    Ok((config, path))
}

fn or_unset(value: Option<String>) -> String {
    value.unwrap_or_else(|| "(not set)".to_string())
}

/// Show current configuration
pub fn show(config_path: Option<&Path>, output: &Output) -> Result<()> {
    let (config, path) = load(config_path)?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "api_url": config.api_url,
                    "mirror_backend": config.mirror_backend.to_string(),
                    "debounce_ms": config.debounce_ms,
                    "request_timeout_secs": config.request_timeout_secs,
                    "log_file": config.log_file,
                    "config_file": path,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!("  api_url:              {}", or_unset(config.api_url.clone()));
            println!("  mirror_backend:       {}", config.mirror_backend);
            println!("  debounce_ms:          {}", config.debounce_ms);
            println!("  request_timeout_secs: {}", config.request_timeout_secs);
            println!(
                "  log_file:             {}",
                or_unset(config.log_file.as_ref().map(|p| p.display().to_string()))
            );
            println!();
            println!("Config file: {}", path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
///
/// `none` clears optional keys, same as an empty value.
pub fn set(key: String, value: String, config_path: Option<&Path>, output: &Output) -> Result<()> {
    let (mut config, path) = load(config_path)?;

    let stored = if value == "none" { "" } else { value.as_str() };
    config.set(&key, stored)?;
    config
        .save_to(&path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}
