use hbrunner_av::{ConvertSetting, SettingCatalog};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Named HandBrakeCLI argument templates, written as `[[settings]]`.
    #[serde(default)]
    pub settings: Vec<ConvertSetting>,
}

impl Config {
    /// Build the resolver the driver uses from the configured settings.
    pub fn catalog(&self) -> SettingCatalog {
        SettingCatalog::from_settings(self.settings.iter().cloned())
    }

    pub fn find_setting(&self, name: &str) -> Option<&ConvertSetting> {
        self.settings.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Explicit HandBrakeCLI location; `PATH` is searched when unset.
    #[serde(default)]
    pub handbrake_cli: Option<PathBuf>,
}
