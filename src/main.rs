use anyhow::{Context, Result};
use clap::Parser;
use modloader::config::Config;
use modloader::plugins::PluginRegistry;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

/// Modloader - discover, resolve and load plugins
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Directory to scan for plugin libraries
    #[arg(short, long)]
    plugins_dir: Option<PathBuf>,

    /// Print the loaded plugins as JSON
    #[arg(long)]
    json: bool,

    /// Plugin identities to load (default: everything that resolves)
    ids: Vec<Uuid>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = args.config {
        Config::load_from_file(&config_path)?
    } else {
        Config::load_default()?
    };

    if let Some(dir) = args.plugins_dir {
        config.plugins_dir = Some(dir);
    }
    if !args.ids.is_empty() {
        config.load = args.ids;
    }

    // RUST_LOG wins over the config file
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter())
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        // stderr, so listings on stdout stay machine readable
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")?;

    let mut registry = PluginRegistry::from_config(&config);
    if !registry.load(&config.load) {
        eprintln!("Error: requested plugins could not be resolved (see log for details)");
        std::process::exit(1);
    }

    let loaded = registry.loaded_plugins();
    if args.json {
        let json = serde_json::to_string_pretty(&loaded).context("Failed to serialize plugin list")?;
        println!("{json}");
    } else if loaded.is_empty() {
        println!("No plugins loaded");
    } else {
        for plugin in &loaded {
            println!(
                "{}  {:<24} v{:<10} refs={} {}",
                plugin.identity,
                plugin.name,
                plugin.version,
                plugin.refcount,
                if plugin.dynamic { "dynamic" } else { "static" }
            );
        }
    }

    registry.unload(&[]);
    Ok(())
}
