//! Placeholder substitution for setting command lines.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("valid regex"));

/// Replacement values for `{placeholder}` tokens in a command line.
///
/// # Example
///
/// ```
/// use hbrunner_av::TemplateContext;
/// use std::path::Path;
///
/// let ctx = TemplateContext::new()
///     .with_source(Path::new("/videos/movie.mkv"))
///     .with_var("output", "/out/movie.mp4");
///
/// assert_eq!(ctx.substitute("-i \"{input}\""), "-i \"/videos/movie.mkv\"");
/// assert_eq!(ctx.substitute("{filestem}.m4v"), "movie.m4v");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: HashMap<String, String>,
}

impl TemplateContext {
    /// Create a new empty template context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set variables derived from the source file.
    ///
    /// - `{input}` - Full path to the source file
    /// - `{filename}` - File name with extension
    /// - `{filestem}` - File name without extension
    /// - `{extension}` - File extension
    /// - `{dirname}` - Parent directory
    pub fn with_source(mut self, source: &Path) -> Self {
        self.set("input", &source.display().to_string());

        if let Some(name) = source.file_name() {
            self.set("filename", &name.to_string_lossy());
        }
        if let Some(stem) = source.file_stem() {
            self.set("filestem", &stem.to_string_lossy());
        }
        if let Some(ext) = source.extension() {
            self.set("extension", &ext.to_string_lossy());
        }
        if let Some(parent) = source.parent() {
            self.set("dirname", &parent.display().to_string());
        }

        self
    }

    /// Add a custom variable.
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    /// Add every entry of `vars`, replacing existing keys.
    pub fn with_vars(mut self, vars: &HashMap<String, String>) -> Self {
        for (key, value) in vars {
            self.set(key, value);
        }
        self
    }

    /// Set a variable.
    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    /// Get a variable value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Substitute `{varname}` tokens in one pass over `template`. Unknown
    /// tokens are left untouched and substituted values are never rescanned.
    pub fn substitute(&self, template: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(template, |caps: &Captures| match self.vars.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}
