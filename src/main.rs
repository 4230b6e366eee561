use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

use debloater::cli::commands::{batch, config, metrics, optimize, providers};

#[derive(Parser)]
#[command(name = "debloater")]
#[command(
    version,
    about = "Debloat source files with LLM providers and track LOC reduction"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Extra configuration file merged over global and project config
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Debloat a single file
    Optimize {
        #[arg(help = "Source file to optimize")]
        file: PathBuf,
        #[arg(long, short, help = "Provider id (default: llm.default_provider)")]
        provider: Option<String>,
        #[arg(long, short, help = "Metrics database path")]
        metrics: Option<PathBuf>,
        #[arg(long, conflicts_with = "custom_prompt", help = "Prompt template id")]
        prompt: Option<String>,
        #[arg(long, help = "Prompt text used instead of a template")]
        custom_prompt: Option<String>,
        #[arg(long, help = "Write optimized code here instead of overwriting the file")]
        export_path: Option<PathBuf>,
    },

    /// Debloat every file listed in a CSV
    Batch {
        #[command(subcommand)]
        action: BatchAction,
    },

    /// Inspect recorded metrics
    Metrics {
        #[command(subcommand)]
        action: MetricsAction,
    },

    /// List providers and credential status
    Providers {
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum BatchAction {
    /// Process a batch of files
    Process {
        #[arg(long, help = "CSV with a code_file column")]
        csv: PathBuf,
        #[arg(long, short, help = "Provider id (default: llm.default_provider)")]
        provider: Option<String>,
        #[arg(long, short, help = "Metrics database path")]
        metrics: Option<PathBuf>,
        #[arg(long, help = "Export optimized files here instead of updating them in place")]
        export_dir: Option<PathBuf>,
        #[arg(long, help = "Files processed in parallel")]
        concurrency: Option<usize>,
        #[arg(long, help = "Minimum delay between dispatches in milliseconds")]
        pacing_ms: Option<u64>,
        #[arg(long, help = "Prompt template id")]
        prompt: Option<String>,
    },
    /// Create a CSV template
    Template {
        #[arg(long, short, help = "Path to save the CSV template")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum MetricsAction {
    /// Per-provider averages with an overall row
    Summary {
        #[arg(long, short, help = "Metrics database path")]
        metrics: Option<PathBuf>,
        #[arg(long, short, help = "Also write the summary as CSV")]
        output: Option<PathBuf>,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },
    /// Export every run as CSV
    Export {
        #[arg(long, short, help = "CSV output path")]
        output: PathBuf,
        #[arg(long, short, help = "Metrics database path")]
        metrics: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'f', long, default_value = "toml", help = "Output format: toml, json")]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mdebloater encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Call default hook for backtrace (if RUST_BACKTRACE=1)
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into())
    };

    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter()),
        )
        .with(file_layer)
        .init();
    Ok(())
}

/// `Ok(false)` when a single-file run kept the original code
fn run_cli() -> anyhow::Result<bool> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    match dotenvy::dotenv() {
        Ok(path) => tracing::info!("Loaded environment variables from {}", path.display()),
        Err(e) if e.not_found() => {
            tracing::debug!(".env file not found; using the process environment")
        }
        Err(e) => tracing::warn!("Failed to load .env: {}", e),
    }

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Optimize {
            file,
            provider,
            metrics,
            prompt,
            custom_prompt,
            export_path,
        } => {
            let succeeded = optimize::run(
                config_path,
                optimize::OptimizeOptions {
                    file,
                    provider,
                    metrics,
                    prompt,
                    custom_prompt,
                    export_path,
                },
            )?;
            return Ok(succeeded);
        }
        Commands::Batch { action } => match action {
            BatchAction::Process {
                csv,
                provider,
                metrics,
                export_dir,
                concurrency,
                pacing_ms,
                prompt,
            } => {
                batch::process(
                    config_path,
                    batch::BatchProcessOptions {
                        csv,
                        provider,
                        metrics,
                        export_dir,
                        concurrency,
                        pacing_ms,
                        prompt,
                    },
                )?;
            }
            BatchAction::Template { output } => {
                batch::template(output)?;
            }
        },
        Commands::Metrics { action } => match action {
            MetricsAction::Summary {
                metrics: path,
                output,
                format,
            } => {
                metrics::summary(config_path, path, output, &format)?;
            }
            MetricsAction::Export {
                output,
                metrics: path,
            } => {
                metrics::export(config_path, path, &output)?;
            }
        },
        Commands::Providers { format } => {
            providers::run(config_path, &format)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => {
                config::show(config_path, &format)?;
            }
            ConfigAction::Path => {
                config::path(config_path)?;
            }
            ConfigAction::Init { global, force } => {
                if global {
                    config::init_global(force)?;
                } else {
                    config::init_project(force)?;
                }
            }
        },
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_optimize_args() {
        let cli = Cli::parse_from([
            "debloater",
            "optimize",
            "bloated.py",
            "--provider",
            "gpt-4o",
            "--export-path",
            "out/clean.py",
            "--verbose",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Optimize {
                file,
                provider,
                export_path,
                ..
            } => {
                assert_eq!(file, PathBuf::from("bloated.py"));
                assert_eq!(provider.as_deref(), Some("gpt-4o"));
                assert_eq!(export_path, Some(PathBuf::from("out/clean.py")));
            }
            _ => panic!("expected optimize"),
        }
    }

    #[test]
    fn test_prompt_conflicts_with_custom_prompt() {
        let result = Cli::try_parse_from([
            "debloater",
            "optimize",
            "a.py",
            "--prompt",
            "2",
            "--custom-prompt",
            "shorter",
        ]);
        assert!(result.is_err());
    }
}
