mod ui;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use tai::config::Settings;
use tai::core::{CommandRequest, OsDescriptor, Resolution};
use crate::ui::terminal::{print_execution, print_resolution, TaiTerminal};

#[derive(Parser)]
#[command(name = "tai")]
#[command(version, about = "Turn plain-language requests into shell commands")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Request to interpret, e.g. `tai list files`. Starts the interactive terminal when empty.
    request: Vec<String>,

    /// Execution timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Working directory for the command
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Never ask the remote model
    #[arg(long, global = true)]
    no_ai: bool,

    /// Show the command without running it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Settings file
    #[arg(long, global = true, env = "TAI_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List known phrases, optionally filtered by a search term
    Patterns { term: Option<String> },
    /// Show detected system information and AI status
    Info,
    /// Inspect or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the settings file location and contents
    Show,
    /// Store an OpenAI API key
    SetKey { key: String },
    /// Restore default settings
    Reset,
}

const EXIT_FAILED: u8 = 1;
const EXIT_REJECTED: u8 = 2;
const EXIT_UNRESOLVED: u8 = 3;

fn init_logging(verbose: bool) {
    let default = if verbose { "tai=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            eprintln!("{} {:#}", "Error:".red(), e);
            ExitCode::from(EXIT_FAILED)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load(&config_path)
        .with_context(|| format!("failed to load settings from {}", config_path.display()))?;
    if cli.no_ai {
        settings.ai.enabled = false;
    }
    if let Some(secs) = cli.timeout {
        settings.execution.timeout_secs = secs;
    }

    match cli.command {
        Some(Commands::Config { action }) => return config_command(action, settings, &config_path),
        Some(Commands::Patterns { term }) => {
            let interpreter = tai::build_interpreter(&settings, OsDescriptor::detect())
                .context("failed to build command catalog")?;
            let catalog = interpreter.catalog();
            let entries = match term.as_deref() {
                Some(term) => catalog.search(term),
                None => catalog.all(),
            };
            for (phrase, command) in &entries {
                println!("{:<28} {}", phrase.green(), command);
            }
            println!("{}", format!("{} of {} phrases", entries.len(), catalog.count()).dimmed());
            return Ok(ExitCode::SUCCESS);
        }
        Some(Commands::Info) => {
            let os = OsDescriptor::detect();
            println!("{} {}", "System:".blue(), os.display_name());
            println!("{} {}", "Settings:".blue(), config_path.display());
            let status = if settings.is_ai_enabled() {
                format!("{:?} ({})", settings.ai.provider, settings.ai.model).green()
            } else {
                "disabled".yellow()
            };
            println!("{} {}", "AI fallback:".blue(), status);
            return Ok(ExitCode::SUCCESS);
        }
        None => {}
    }

    let interpreter = tai::build_interpreter(&settings, OsDescriptor::detect())
        .context("failed to build command interpreter")?;
    let working_dir = match cli.cwd {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let max_lines = settings.execution.max_output_lines;

    if cli.request.is_empty() {
        let mut terminal = TaiTerminal::new(interpreter, working_dir, max_lines, cli.dry_run)
            .context("failed to start interactive terminal")?;
        terminal.run().await;
        return Ok(ExitCode::SUCCESS);
    }

    let request = CommandRequest::new(cli.request.join(" "))
        .with_working_dir(working_dir)
        .with_timeout(Duration::from_secs(settings.execution.timeout_secs));
    let resolution = interpreter.resolve(&request).await;
    print_resolution(&resolution);

    let code = match resolution {
        Resolution::Rejected { .. } => EXIT_REJECTED,
        Resolution::Unresolved { .. } => EXIT_UNRESOLVED,
        _ if cli.dry_run => 0,
        resolved => {
            let outcome = interpreter.execute(&request, resolved).await;
            match &outcome.execution {
                Some(result) => {
                    print_execution(result, max_lines);
                    if result.succeeded {
                        0
                    } else {
                        EXIT_FAILED
                    }
                }
                None => EXIT_REJECTED,
            }
        }
    };
    Ok(ExitCode::from(code))
}

fn config_command(action: ConfigAction, mut settings: Settings, path: &std::path::Path) -> Result<ExitCode> {
    match action {
        ConfigAction::Show => {
            println!("{} {}", "Settings file:".blue(), path.display());
            let mut shown = settings.clone();
            shown.ai.api_key = settings.api_key().map(|k| k.masked());
            print!("{}", toml::to_string_pretty(&shown).context("failed to render settings")?);
        }
        ConfigAction::SetKey { key } => {
            settings.set_api_key(&key)?;
            settings.save(path)?;
            println!("{}", "API key saved.".green());
        }
        ConfigAction::Reset => {
            settings.reset_to_defaults();
            settings.save(path)?;
            println!("{}", "Settings reset to defaults.".green());
        }
    }
    Ok(ExitCode::SUCCESS)
}
