#![deny(unsafe_code)]

//! diffscope CLI: extract source context for a unified diff.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use diffscope_config::{AppConfig, IdentifierScope};
use diffscope_core::build_info;
use diffscope_core::{ContextExtractor, DiffAdditions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// diffscope: the changed lines of a diff plus the definitions they use.
#[derive(Parser)]
#[command(name = "diffscope", version = build_info::LONG_VERSION, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "diffscope.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract definition/diff context for a diff.
    Extract {
        /// Root of the codebase the diff applies to.
        #[arg(long)]
        root: PathBuf,

        /// Diff file, or `-` for stdin.
        #[arg(long, default_value = "-")]
        diff: PathBuf,

        /// Write the bundle here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not wait for the background index before resolving.
        #[arg(long)]
        no_index_wait: bool,

        /// Scan every line of changed files, not only added ones.
        #[arg(long)]
        full_file: bool,
    },

    /// Print the added lines of a diff as JSON.
    Additions {
        /// Diff file, or `-` for stdin.
        #[arg(long, default_value = "-")]
        diff: PathBuf,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config first: its log level is the fallback filter.
    let (config, found) = load_config(&cli.config).await?;
    init_tracing(cli.verbose, &config.logging.level);
    if !found {
        info!(path = %cli.config.display(), "config file not found, using defaults");
    }

    match cli.command {
        Commands::Extract {
            root,
            diff,
            output,
            no_index_wait,
            full_file,
        } => {
            cmd_extract(
                config,
                &root,
                &diff,
                output.as_deref(),
                no_index_wait,
                full_file,
            )
            .await?
        }
        Commands::Additions { diff } => cmd_additions(&diff).await?,
        Commands::Config { show } => cmd_config(&config, &cli.config, found, show)?,
    }

    Ok(())
}

/// `RUST_LOG` wins, then `-v`, then `logging.level`. Logs go to stderr.
fn init_tracing(verbose: u8, config_level: &str) {
    let fallback = match verbose {
        0 => config_level,
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_extract(
    mut config: AppConfig,
    root: &Path,
    diff: &Path,
    output: Option<&Path>,
    no_index_wait: bool,
    full_file: bool,
) -> Result<()> {
    if no_index_wait {
        config.indexing.wait = false;
    }
    if full_file {
        config.context.identifier_scope = IdentifierScope::FullFile;
    }
    let root = tokio::fs::canonicalize(root)
        .await
        .with_context(|| format!("codebase root '{}' is not accessible", root.display()))?;
    let diff_text = read_diff(diff).await?;

    info!(
        version = build_info::VERSION,
        git = build_info::GIT_HASH,
        root = %root.display(),
        "extracting context"
    );
    let extractor = ContextExtractor::new(config, root);
    let outcome = extractor.extract(&diff_text).await?;
    info!(
        files = outcome.additions.len(),
        added_lines = outcome.additions.added_line_count(),
        definitions = outcome.definitions.len(),
        blocks = outcome.bundle.len(),
        indexing = ?outcome.indexing,
        "extraction finished"
    );

    let rendered = outcome.bundle.render();
    match output {
        Some(path) => tokio::fs::write(path, rendered)
            .await
            .with_context(|| format!("failed to write '{}'", path.display()))?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(rendered.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

async fn cmd_additions(diff: &Path) -> Result<()> {
    let additions = DiffAdditions::parse(&read_diff(diff).await?);
    println!("{}", serde_json::to_string_pretty(&additions)?);
    Ok(())
}

fn cmd_config(config: &AppConfig, config_path: &Path, found: bool, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("failed to render configuration")?;
        println!("{toml_str}");
    } else if found {
        println!("Configuration at '{}' is valid.", config_path.display());
    } else {
        println!(
            "No configuration at '{}'; defaults are in effect.",
            config_path.display()
        );
    }
    Ok(())
}

async fn read_diff(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("failed to read diff from stdin")?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read diff '{}'", path.display()))
    }
}

/// Load the config file if it exists. The flag reports whether it did.
async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let config = AppConfig::load(path)
            .await
            .with_context(|| format!("invalid configuration '{}'", path.display()))?;
        Ok((config, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}
