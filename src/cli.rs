use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hbrunner")]
#[command(author, version, about = "Run HandBrakeCLI conversions with live progress")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a single file with a named setting
    Run {
        /// Source file to convert
        #[arg(required = true)]
        input: PathBuf,

        /// Name of the conversion setting to apply
        #[arg(short, long)]
        setting: String,

        /// Output path, available to settings as {output}
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Extra template variable (repeatable)
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,

        /// Print every HandBrakeCLI output line, not just progress
        #[arg(long)]
        show_log: bool,

        /// Print events as JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// List the configured conversion settings
    Settings,

    /// Check that HandBrakeCLI is available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}
