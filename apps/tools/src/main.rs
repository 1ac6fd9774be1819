use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, prepare_database_url},
    AutoDownloadPreferences,
};
use shared::domain::{AutoDownloadPolicy, MediaCategory};
use storage::MediaStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists cached media, newest first.
    List,
    /// Removes cached media for one server, or everything.
    Purge {
        #[arg(long)]
        server: Option<String>,
    },
    /// Persists the auto-download policy for one category.
    SetPolicy {
        category: MediaCategory,
        policy: AutoDownloadPolicy,
    },
    /// Prints the effective auto-download policy per category.
    Policies,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let settings = load_settings();
    let database_url =
        prepare_database_url(cli.database_url.as_deref().unwrap_or(&settings.database_url))?;
    let cache_dir = cli.cache_dir.unwrap_or_else(|| settings.cache_dir.clone());
    let store = MediaStore::new(&database_url, cache_dir).await?;

    match cli.command {
        Command::List => {
            for entry in store.list().await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    entry.created_at.to_rfc3339(),
                    entry.category,
                    entry.size_bytes,
                    entry.path.display(),
                    entry.url_key
                );
            }
        }
        Command::Purge { server } => {
            let removed = store.purge(server.as_deref()).await?;
            println!("removed entries={removed}");
        }
        Command::SetPolicy { category, policy } => {
            let preferences = AutoDownloadPreferences::from_settings(&settings);
            preferences.persist(&store, category, policy).await?;
            println!("{}={policy}", category.preference_key());
        }
        Command::Policies => {
            let preferences = AutoDownloadPreferences::from_settings(&settings);
            preferences.hydrate(&store).await?;
            for category in MediaCategory::ALL {
                println!(
                    "{category}\t{}={}",
                    category.preference_key(),
                    preferences.policy(category)
                );
            }
            println!("network\t{}", preferences.network().as_str());
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
