use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use asset_cache::config::{self, CacheConfig};
use asset_cache::controller::{self, AssetCache};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[clap(name = "asset-cache", version, about = "Inspect and maintain a persistent asset cache.")]
struct Args {
    /// The path to the YAML config file.
    #[clap(short, long, env = "ASSET_CACHE_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Writes an example config file.
    Init {
        #[clap(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Prints the number and size of all stored images.
    Stats,

    /// Prints every metadata record, optionally only those of one owner.
    List {
        /// An ownership filter in the form `field=value`, e.g. `cardId=42`.
        #[clap(long)]
        owner: Option<OwnerFilter>,
    },

    /// Repairs interrupted writes and deletes and reports orphans.
    Reconcile {
        /// Also remove orphaned binaries and metadata.
        #[clap(long)]
        purge: bool,
    },

    /// Removes every image and metadata record of the cache.
    Clear,

    /// Removes every image owned by the given owner.
    ClearOwner {
        /// The owner in the form `field=value`, e.g. `cardId=42`.
        owner: OwnerFilter,
    },
}

#[derive(Debug, Clone)]
struct OwnerFilter {
    field: String,
    id: String,
}

impl FromStr for OwnerFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((field, id)) if !field.is_empty() && !id.is_empty() => Ok(Self {
                field: field.to_string(),
                id: id.to_string(),
            }),
            _ => Err(format!("expected an owner in the form field=value, got {:?}", s)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Args = Args::parse();

    if let Command::Init { output } = &args.command {
        return run_init(output).await;
    }

    config::init(&args.config)?;
    let cfg = config::config();

    tracing_subscriber::fmt()
        .with_max_level(cfg.log_level.as_filter())
        .with_writer(std::io::stderr)
        .init();

    controller::init_cache(AssetCache::start(cfg).await?);
    let cache = controller::get_cache()
        .ok_or_else(|| anyhow!("asset cache failed to initialise"))?;

    match args.command {
        Command::Init { .. } => Ok(()),
        Command::Stats => print_json(&cache.get_cache_stats().await?),
        Command::List { owner: None } => print_json(&cache.get_all_metadata()?),
        Command::List { owner: Some(owner) } => {
            print_json(&cache.metadata_for_owner(&owner.field, &owner.id)?)
        },
        Command::Reconcile { purge } => print_json(&cache.reconcile(purge).await?),
        Command::Clear => {
            cache.clear_all().await?;
            print_json(&serde_json::json!({ "cleared": true }))
        },
        Command::ClearOwner { owner } => {
            let removed = cache.clear_for_owner(&owner.field, &owner.id).await?;
            print_json(&serde_json::json!({ "removed": removed }))
        },
    }
}

async fn run_init(output: &Path) -> Result<()> {
    let example = CacheConfig::template();
    let out = serde_yaml::to_string(&example)?;
    tokio::fs::write(output, out).await?;

    println!("Wrote example config to {:?}", output);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
