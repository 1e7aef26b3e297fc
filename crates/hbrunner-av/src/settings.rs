//! Named conversion settings and their resolution into command lines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::template::TemplateContext;
use crate::{Error, Result};

/// A named HandBrakeCLI argument template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertSetting {
    pub name: String,

    /// Argument string with `{placeholder}` tokens, e.g.
    /// `-i "{input}" -o "{output}" --preset "Fast 1080p30"`.
    pub command_line: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Resolves a setting name into a fully-formed argument string.
pub trait SettingResolver: Send + Sync {
    /// Resolve `name`, substituting placeholders from `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SettingNotFound`] if no setting has that name.
    fn resolve(&self, name: &str, ctx: &TemplateContext) -> Result<String>;
}

/// In-memory [`SettingResolver`] keyed by setting name.
#[derive(Debug, Clone, Default)]
pub struct SettingCatalog {
    settings: BTreeMap<String, ConvertSetting>,
}

impl SettingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a list; later entries replace earlier ones with
    /// the same name.
    pub fn from_settings(settings: impl IntoIterator<Item = ConvertSetting>) -> Self {
        let mut catalog = Self::new();
        for setting in settings {
            catalog.insert(setting);
        }
        catalog
    }

    pub fn insert(&mut self, setting: ConvertSetting) {
        self.settings.insert(setting.name.clone(), setting);
    }

    pub fn get(&self, name: &str) -> Option<&ConvertSetting> {
        self.settings.get(name)
    }

    /// Setting names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.settings.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

impl SettingResolver for SettingCatalog {
    fn resolve(&self, name: &str, ctx: &TemplateContext) -> Result<String> {
        let setting = self
            .settings
            .get(name)
            .ok_or_else(|| Error::setting_not_found(name))?;
        Ok(ctx.substitute(&setting.command_line))
    }
}
