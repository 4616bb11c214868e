//! CLI binary for hotfolder-core.
//!
//! A thin shim over the library crate: maps subcommands onto
//! `ConfigStore`/`Settings`/`Supervisor` calls and prints the `(bool,
//! String)` result pairs the library returns, the same way the GUI
//! collaborator would.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use hotfolder_core::tooling::ToolResolver;
use hotfolder_core::{AlwaysLicensed, ConfigStore, CounterStore, Settings, Supervisor};

#[derive(Parser)]
#[command(name = "hotfolderd", about = "Hotfolder document-processing daemon")]
struct Cli {
    /// Directory holding `hotfolders.json`, `settings.json`, `counters.json`.
    #[arg(long, env = "HOTFOLDER_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Scratch workspace root for in-flight pipeline executions.
    #[arg(long, env = "HOTFOLDER_SCRATCH_DIR", default_value = "scratch")]
    scratch_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start watching every enabled hotfolder and run the worker pool
    /// until interrupted (Ctrl-C).
    Run,
    /// Print the `"<active> von <total> Hotfoldern aktiv"` status line.
    Status,
    /// List every configured hotfolder.
    List,
    /// Enable a hotfolder by id.
    Enable { id: String },
    /// Disable a hotfolder by id.
    Disable { id: String },
    /// Export a hotfolder config to a JSON file for later import.
    Export { id: String, out: PathBuf },
    /// Import a previously exported hotfolder config (assigned a fresh id,
    /// imported disabled).
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings_path = cli.config_dir.join("settings.json");
    let hotfolders_path = cli.config_dir.join("hotfolders.json");
    let counters_path = cli.config_dir.join("counters.json");

    let mut store = ConfigStore::load(&hotfolders_path).context("failed to load hotfolder configs")?;

    match cli.command {
        Command::Run => run(store, &settings_path, &counters_path, &cli.scratch_dir).await,
        Command::Status => {
            let enabled = store.list().iter().filter(|c| c.enabled).count();
            println!("{enabled} von {} Hotfoldern aktiv", store.list().len());
            Ok(())
        }
        Command::List => {
            for config in store.list() {
                println!(
                    "{}  {:<24} {:<8} {}",
                    config.id,
                    config.name,
                    if config.enabled { "enabled" } else { "disabled" },
                    config.input_path.display()
                );
            }
            Ok(())
        }
        Command::Enable { id } => {
            let (ok, message) = store.enable(&id, &AlwaysLicensed);
            print_result(ok, &message);
            Ok(())
        }
        Command::Disable { id } => {
            let (ok, message) = store.disable(&id);
            print_result(ok, &message);
            Ok(())
        }
        Command::Export { id, out } => {
            let value = store.export(&id).context("failed to export hotfolder config")?;
            std::fs::write(&out, serde_json::to_vec_pretty(&value)?)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("exported {id} to {}", out.display());
            Ok(())
        }
        Command::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let value: serde_json::Value = serde_json::from_str(&content)?;
            let (ok, message) = store.import(value);
            print_result(ok, &message);
            Ok(())
        }
    }
}

fn print_result(ok: bool, message: &str) {
    if ok {
        println!("OK: {message}");
    } else {
        eprintln!("FAILED: {message}");
        std::process::exit(1);
    }
}

/// Start the supervisor against every enabled config and block until
/// Ctrl-C, then shut down cooperatively.
async fn run(
    store: ConfigStore,
    settings_path: &std::path::Path,
    counters_path: &std::path::Path,
    scratch_dir: &std::path::Path,
) -> Result<()> {
    let settings = Settings::load_or_init(settings_path).context("failed to load settings")?;
    let counters = Arc::new(CounterStore::open(counters_path));
    let resolver = ToolResolver::new(settings.dependencies_dir.clone());

    std::fs::create_dir_all(scratch_dir)
        .with_context(|| format!("failed to create scratch directory {}", scratch_dir.display()))?;

    let supervisor = Supervisor::new(settings, counters, resolver, scratch_dir.to_path_buf(), None);
    supervisor.set_configs(store.list().to_vec()).await;

    let spinner = ProgressBar::new_spinner();
    spinner
        .set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    spinner.set_message(supervisor.status().await);

    tokio::spawn({
        let supervisor = supervisor.clone();
        let spinner = spinner.clone();
        async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                spinner.set_message(supervisor.status().await);
            }
        }
    });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    spinner.finish_with_message("shutting down, draining in-flight work...");
    supervisor.stop().await;
    Ok(())
}
