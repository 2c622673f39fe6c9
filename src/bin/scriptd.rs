//! scriptd: operator interface to persisted script state.

use clap::{Parser, Subcommand};
use script_engine::config::EngineConfig;
use script_engine::state::{FileStateStore, PersistedState, StateStore};
use script_engine::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "scriptd", about = "Script engine state tooling")]
struct Cli {
    /// TOML config file; environment variables are used when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Persisted script state operations
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum StateAction {
    /// List stored state documents
    List,
    /// Show a stored state document
    Show {
        /// Script item ID (full UUID or prefix)
        id: String,
    },
    /// Delete a stored state document
    Remove {
        /// Script item ID (full UUID or prefix)
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::from_env()?,
    };

    let _guard = init_telemetry(TelemetryConfig::from_engine_config(&config, "scriptd"))?;

    match cli.command {
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::State { action } => {
            let store = FileStateStore::open(config.state_dir.clone())?;
            match action {
                StateAction::List => cmd_state_list(&store, &config),
                StateAction::Show { id } => cmd_state_show(&store, &config, &id),
                StateAction::Remove { id } => cmd_state_remove(&store, &id),
            }
        }
    }
}

fn cmd_state_list(store: &FileStateStore, config: &EngineConfig) -> anyhow::Result<()> {
    let items = store.list_items()?;
    if items.is_empty() {
        println!("No stored script state in {}.", store.dir().display());
        return Ok(());
    }

    println!(
        "{:<36}  {:>8}  {:<8}  {:<16}  SAVED",
        "ITEM", "BYTES", "RUNNING", "STATE"
    );
    println!("{}", "-".repeat(100));

    for item_id in &items {
        let size = store.size(*item_id)?.unwrap_or(0);
        let summary = if size >= config.max_state_bytes {
            None
        } else {
            PersistedState::decode(&store.read(*item_id)?).ok()
        };
        match summary {
            Some(saved) => println!(
                "{:<36}  {:>8}  {:<8}  {:<16}  {}",
                item_id,
                size,
                saved.running,
                saved.state,
                saved.saved_at.format("%Y-%m-%d %H:%M")
            ),
            None => println!("{item_id:<36}  {size:>8}  (unloadable)"),
        }
    }

    println!("\n{} document(s)", items.len());
    Ok(())
}

fn cmd_state_show(store: &FileStateStore, config: &EngineConfig, id: &str) -> anyhow::Result<()> {
    let item_id = resolve_item(store, id)?;
    let size = store.size(item_id)?.unwrap_or(0);
    let raw = store.read(item_id)?;

    println!("Item:       {item_id}");
    println!("Path:       {}", store.path_for(item_id).display());
    println!("Size:       {size} bytes (limit {})", config.max_state_bytes);
    if size >= config.max_state_bytes {
        println!("Status:     over limit, would be discarded on load");
        return Ok(());
    }

    match PersistedState::decode(&raw) {
        Ok(saved) => {
            println!("State:      {}", saved.state);
            println!("Running:    {}", saved.running);
            println!("Saved:      {}", saved.saved_at);
            println!("Plugin:     {} bytes", saved.plugin_data.len());
            println!("Queued:     {} event(s)", saved.queue.len());
            for record in &saved.queue {
                println!("  - {}", record.name());
            }
            println!("Vars:       {}", saved.vars.len());
            for (name, value) in &saved.vars {
                println!("  {name} = {value}");
            }
        }
        Err(e) => {
            println!("Status:     malformed, would be discarded on load ({e})");
        }
    }
    Ok(())
}

fn cmd_state_remove(store: &FileStateStore, id: &str) -> anyhow::Result<()> {
    let item_id = resolve_item(store, id)?;
    store.remove(item_id)?;
    println!("Removed state for {item_id}");
    Ok(())
}

/// Support prefix matching, like `git` does for hashes.
fn resolve_item(store: &FileStateStore, id: &str) -> anyhow::Result<Uuid> {
    if id.len() >= 36 {
        return Ok(Uuid::parse_str(id)?);
    }
    let matches: Vec<Uuid> = store
        .list_items()?
        .into_iter()
        .filter(|item| item.to_string().starts_with(id))
        .collect();
    match matches.as_slice() {
        [] => anyhow::bail!("no stored state matching prefix '{id}'"),
        [one] => Ok(*one),
        many => anyhow::bail!("{} items match prefix '{id}', be more specific", many.len()),
    }
}
