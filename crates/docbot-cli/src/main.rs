#![deny(unsafe_code)]

//! Docbot CLI: load inventories and query them from the command line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use docbot_config::AppConfig;
use docbot_core::{DocEngine, RefreshDiff, ResolvedSymbol};

/// Docbot: Sphinx documentation lookup.
#[derive(Parser)]
#[command(name = "docbot", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "docbot.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every configured inventory and report what loaded.
    Refresh,

    /// Look up a symbol and print its documentation.
    Lookup {
        /// Symbol name. Extra words are ignored if the full text is unknown.
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Treat the query as an exact symbol name.
        #[arg(long)]
        interactive: bool,
    },

    /// List symbol names containing the query.
    Search {
        query: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Suggest symbol names close to a partially typed query.
    Complete {
        query: String,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List loaded packages and their documentation roots.
    Packages {
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
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
    let config = load_config(&cli.config).await?;

    let filter = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
        Commands::Refresh => {
            let engine = DocEngine::from_config(&config)?;
            let diff = engine.refresh_all(false).await?;
            print_diff(&diff);
            engine.shutdown();
        }
        Commands::Lookup { query, interactive } => {
            let engine = loaded_engine(&config).await?;
            cmd_lookup(&engine, &query.join(" "), interactive).await?;
            engine.shutdown();
        }
        Commands::Search { query, limit, json } => {
            let engine = loaded_engine(&config).await?;
            let names = engine.search(&query, limit).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else if names.is_empty() {
                println!("No symbols match '{query}'.");
            } else {
                for name in names {
                    println!("{name}");
                }
            }
            engine.shutdown();
        }
        Commands::Complete { query, json } => {
            let engine = loaded_engine(&config).await?;
            let names = engine.complete(&query).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else if names.is_empty() {
                println!("No symbols resemble '{query}'.");
            } else {
                for name in names {
                    println!("{name}");
                }
            }
            engine.shutdown();
        }
        Commands::Packages { json } => {
            let engine = loaded_engine(&config).await?;
            let packages = engine.list_packages().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&packages)?);
            } else if packages.is_empty() {
                println!("No packages loaded.");
            } else {
                for (name, base_url) in packages {
                    println!("{name:<24} {base_url}");
                }
            }
            engine.shutdown();
        }
    }

    Ok(())
}

/// Build an engine and run one refresh so queries have something to hit.
async fn loaded_engine(config: &AppConfig) -> Result<DocEngine> {
    let engine = DocEngine::from_config(config)?;
    let diff = engine.refresh_all(true).await?;
    if !diff.summary.rescheduled.is_empty() {
        info!(packages = ?diff.summary.rescheduled, "Some inventories are unreachable");
    }
    Ok(engine)
}

async fn cmd_lookup(engine: &DocEngine, query: &str, interactive: bool) -> Result<()> {
    match engine.resolve(query, interactive).await {
        Ok(Some(symbol)) => print_symbol(&symbol),
        Ok(None) => println!("No documentation found for the requested symbol."),
        Err(failure) => {
            info!(error = %failure, "Render failed");
            println!("{}", failure.user_message());
        }
    }
    Ok(())
}

fn print_symbol(symbol: &ResolvedSymbol) {
    println!("{} ({})", symbol.name, symbol.item.group());
    println!("{}", symbol.item.anchored_url());
    println!();
    println!("{}", symbol.content.text());
    if let Some(footer) = symbol.footer() {
        println!();
        println!("{footer}");
    }
}

fn print_diff(diff: &RefreshDiff) {
    println!("Loaded: {}", list_or_none(&diff.summary.loaded));
    println!("Added: {}", list_or_none(&diff.added));
    println!("Removed: {}", list_or_none(&diff.removed));
    if !diff.summary.rescheduled.is_empty() {
        println!("Unreachable: {}", diff.summary.rescheduled.join(", "));
    }
    if !diff.summary.failed.is_empty() {
        println!("Invalid: {}", diff.summary.failed.join(", "));
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("failed to serialize config")?;
        println!("{toml_str}");
    } else {
        println!(
            "Configuration at '{}' is valid ({} package(s)).",
            config_path.display(),
            config.docs.packages.len()
        );
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))
    } else {
        eprintln!(
            "Config file '{}' not found, using defaults (no packages).",
            path.display()
        );
        Ok(AppConfig::default())
    }
}
