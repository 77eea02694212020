use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use voxbatch::app::{ProgressBarObserver, apply_overrides, read_chunks, run_synth};
use voxbatch::cli::{Cli, Commands, ConfigAction, SynthArgs};
use voxbatch::config::Config;
use voxbatch::pipeline::types::{PipelineOutcome, PipelineStatus};
use voxbatch::tts::EdgeTransportFactory;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    tracing::debug!(version = %voxbatch::version_string(), "voxbatch starting");

    match cli.command {
        Commands::Synth(args) => {
            handle_synth(args, cli.config.as_deref(), cli.quiet, cli.verbose).await?;
        }
        Commands::Split { input, max_chars } => {
            let config = load_config(cli.config.as_deref())?;
            let max_chars = max_chars.unwrap_or(config.pipeline.max_chunk_chars);
            let chunks = read_chunks(&input, max_chars)?;
            for (index, chunk) in chunks.iter().enumerate() {
                println!("[{:04}] ({} chars) {}", index + 1, chunk.chars().count(), chunk);
            }
            if !cli.quiet {
                eprintln!("{} chunks", chunks.len());
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "voxbatch",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Installs the stderr log subscriber.
///
/// `RUST_LOG` wins; otherwise the level follows `-q`/`-v`.
fn init_tracing(quiet: bool, verbose: u8) {
    let default_level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose >= 2)
                .with_filter(env_filter),
        )
        .init();
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        // Try default path, fall back to defaults
        let default_path = Config::default_path();
        Config::load_or_default(&default_path)?
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

async fn handle_synth(
    args: SynthArgs,
    custom_path: Option<&std::path::Path>,
    quiet: bool,
    verbose: u8,
) -> Result<()> {
    let mut config = load_config(custom_path)?;
    apply_overrides(&mut config, &args);

    let show_bar = !quiet && verbose == 0 && std::io::stderr().is_terminal();
    let observer = Arc::new(ProgressBarObserver::new(show_bar));
    let outcome = run_synth(
        &config,
        &args.input,
        Arc::new(EdgeTransportFactory::new()),
        observer,
    )
    .await?;

    if !quiet {
        print_summary(&outcome, &config);
    }
    if outcome.status == PipelineStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(outcome: &PipelineOutcome, config: &Config) {
    let counts = format!(
        "{}/{} chunks synthesized in {:.1}s",
        outcome.processed, outcome.total, outcome.elapsed_secs
    );
    match outcome.status {
        PipelineStatus::Completed if outcome.processed == outcome.total => {
            eprintln!("{} {}", "✓".green(), counts);
        }
        PipelineStatus::Completed => {
            eprintln!("{} {} (stopped early)", "!".yellow(), counts);
        }
        _ => {
            eprintln!(
                "{} {}, {} failed",
                "✗".red(),
                counts,
                outcome.failed.to_string().red()
            );
        }
    }

    let destination = if config.output.zip {
        config
            .output
            .directory
            .join(format!("{}.zip", config.output.stem))
    } else {
        config.output.directory.clone()
    };
    eprintln!(
        "  {} artifact(s) in {}",
        outcome.artifacts.len(),
        destination.display().bold()
    );
    for error in &outcome.assembly_errors {
        eprintln!("  {} {}", "error:".red(), error);
    }
}

fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&std::path::Path>,
) -> Result<()> {
    let config_path = custom_path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            print!("{}", config.to_toml_string()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}
