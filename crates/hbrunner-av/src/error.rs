//! Error types for hbrunner-av.

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur before or around a conversion attempt.
///
/// Launch failures, cancellation and timeouts are not errors: they are
/// reported through [`crate::AttemptResult`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// The named conversion setting does not exist.
    #[error("setting not found: {name}")]
    SettingNotFound { name: String },

    /// The external process could not be started.
    #[error("failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    /// Another attempt is still running on the same driver.
    #[error("a conversion attempt is already running on this driver")]
    AttemptInProgress,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a setting not found error.
    pub fn setting_not_found(name: impl Into<String>) -> Self {
        Self::SettingNotFound { name: name.into() }
    }

    /// Create a launch error.
    pub fn launch(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Launch {
            program: program.into(),
            message: message.into(),
        }
    }
}
