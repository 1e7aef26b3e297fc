mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Locations searched, in order, when no config path is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "./hbrunner.toml",
    "~/.config/hbrunner/config.toml",
    "/etc/hbrunner/config.toml",
];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    tracing::debug!(
        "Loaded {} settings from {:?}",
        config.settings.len(),
        path
    );

    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse TOML")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    match find_default_config() {
        Some(path) => load_config(&path),
        None => {
            tracing::debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

/// First existing file among [`DEFAULT_CONFIG_PATHS`].
pub fn find_default_config() -> Option<PathBuf> {
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
        .find(|p| p.exists())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if let Some(path) = &config.tools.handbrake_cli {
        if !path.exists() {
            tracing::warn!("Configured HandBrakeCLI path does not exist: {:?}", path);
        }
    }

    let mut seen = HashSet::new();
    for setting in &config.settings {
        if setting.name.trim().is_empty() {
            anyhow::bail!("Setting names cannot be empty");
        }
        if !seen.insert(setting.name.as_str()) {
            anyhow::bail!("Setting '{}' is defined more than once", setting.name);
        }
        if setting.command_line.trim().is_empty() {
            anyhow::bail!("Setting '{}' has an empty command_line", setting.name);
        }
    }

    Ok(())
}
