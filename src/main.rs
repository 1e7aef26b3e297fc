mod cli;

use hbrunner::{config, report};
use hbrunner_av::{
    check_tool, get_tool_path, EventBus, EventPayload, JobDriver, HANDBRAKE_CLI,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

struct RunArgs {
    input: PathBuf,
    setting: String,
    output: Option<PathBuf>,
    vars: Vec<(String, String)>,
    show_log: bool,
    json: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "hbrunner=trace,hbrunner_av=trace".to_string()
        } else {
            "hbrunner=info,hbrunner_av=info".to_string()
        }
    });

    // Progress and JSON events own stdout.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            input,
            setting,
            output,
            vars,
            show_log,
            json,
        } => {
            let args = RunArgs {
                input,
                setting,
                output,
                vars,
                show_log,
                json,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_convert(args, cli.config.as_deref()))
        }
        Commands::Settings => list_settings(cli.config.as_deref()),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("hbrunner {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_convert(args: RunArgs, config_path: Option<&Path>) -> Result<ExitCode> {
    let config = config::load_config_or_default(config_path)?;

    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", args.input);
    }

    if config.find_setting(&args.setting).is_none() {
        let available: Vec<&str> = config.settings.iter().map(|s| s.name.as_str()).collect();
        anyhow::bail!(
            "Unknown setting '{}' (available: {})",
            args.setting,
            if available.is_empty() {
                "none".to_string()
            } else {
                available.join(", ")
            }
        );
    }

    let program = get_tool_path(HANDBRAKE_CLI, config.tools.handbrake_cli.as_deref())
        .context("HandBrakeCLI not found; install it or set [tools] handbrake_cli")?;

    let mut params: HashMap<String, String> = args.vars.into_iter().collect();
    if let Some(output) = &args.output {
        params.insert("output".to_string(), output.display().to_string());
    }

    let bus = Arc::new(EventBus::default());
    let printer = tokio::spawn(print_events(bus.subscribe(), args.show_log, args.json));

    let driver = JobDriver::new(program, Arc::new(config.catalog()), bus);

    let cancel = driver.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, canceling conversion");
            cancel.request_cancel();
        }
    });

    let result = driver
        .execute_convert(&args.setting, &args.input, &params)
        .await?;

    interrupt.abort();
    let _ = printer.await;

    Ok(ExitCode::from(report::exit_status(&result)))
}

/// Print events until the attempt finishes.
async fn print_events(
    mut events: tokio::sync::broadcast::Receiver<hbrunner_av::Event>,
    show_log: bool,
    json: bool,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::warn!("Failed to serialize event: {}", e),
                    }
                } else if let Some(line) = report::render_event(&event, show_log) {
                    println!("{}", line);
                }

                if matches!(event.payload, EventPayload::AttemptFinished { .. }) {
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => tracing::warn!("Skipped {} events", n),
            Err(RecvError::Closed) => break,
        }
    }
}

fn list_settings(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = config::load_config_or_default(config_path)?;
    let catalog = config.catalog();

    if catalog.is_empty() {
        println!("No settings configured.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Settings ({}):", catalog.len());
    for name in catalog.names() {
        let Some(setting) = catalog.get(name) else {
            continue;
        };
        match &setting.description {
            Some(description) => println!("  {} - {}", name, description),
            None => println!("  {}", name),
        }
        println!("      {}", setting.command_line);
    }

    Ok(ExitCode::SUCCESS)
}

fn check_tools(config_path: Option<&Path>) -> Result<ExitCode> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let name = config
        .tools
        .handbrake_cli
        .as_ref()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| HANDBRAKE_CLI.to_string());

    let tool = check_tool(&name);
    let status = if tool.available { "✓" } else { "✗" };
    print!("{} {}", status, tool.name);

    if let Some(ref version) = tool.version {
        print!(" ({})", version);
    }

    if let Some(ref path) = tool.path {
        print!(" - {}", path.display());
    }

    println!();
    println!();
    if tool.available {
        println!("All required tools are available!");
    } else {
        println!("HandBrakeCLI is missing. Install it or set [tools] handbrake_cli.");
    }

    Ok(ExitCode::SUCCESS)
}

fn validate_config(path: Option<&Path>) -> Result<ExitCode> {
    let path = path.map(Path::to_path_buf).or_else(config::find_default_config);

    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(&p)?;
            println!("✓ Configuration is valid");
            match &config.tools.handbrake_cli {
                Some(cli) => println!("  HandBrakeCLI: {}", cli.display()),
                None => println!("  HandBrakeCLI: (from PATH)"),
            }
            println!("  Settings: {}", config.settings.len());
            for setting in &config.settings {
                println!("    {}", setting.name);
            }
        }
        None => {
            println!("No config file specified, using defaults");
            println!("  Settings: 0");
        }
    }

    Ok(ExitCode::SUCCESS)
}
