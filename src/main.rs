//! # Provider Sync Entry Point
//!
//! Command line front for the local driver.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use provider_sync::config::ConfigLoader;
use provider_sync::documents::{DocumentStore, HttpDocumentStore, InMemoryDocumentStore};
use provider_sync::driver::LocalDriver;
use provider_sync::{db, telemetry};

#[derive(Debug, Parser)]
#[command(name = "provider-sync", version, about = "Provider sync and reconciliation engine")]
struct Cli {
    /// Keep documents in memory instead of calling the document store
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective configuration with secrets redacted
    Config,
    /// Apply pending state store migrations
    Migrate,
    /// Run a full sync of one connector
    Sync {
        #[arg(long)]
        connector: Uuid,
        /// Re-upsert every leaf regardless of timestamps
        #[arg(long)]
        force_resync: bool,
    },
    /// Run garbage collection only
    Gc {
        #[arg(long)]
        connector: Uuid,
    },
    /// Delete everything synced for a connector, then the connector itself
    Cleanup {
        #[arg(long)]
        connector: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;

    if let Command::Config = cli.command {
        println!("{}", config.redacted_json()?);
        return Ok(());
    }

    telemetry::init_tracing(&config)?;
    tracing::info!(profile = %config.profile, dry_run = cli.dry_run, "Starting provider-sync");

    let db = Arc::new(db::init_pool(&config).await?);
    db::health_check(&db).await?;
    if let Command::Migrate = cli.command {
        db::migrate(&db).await?;
        println!("Migrations applied");
        return Ok(());
    }

    let documents: Arc<dyn DocumentStore> = if cli.dry_run {
        Arc::new(InMemoryDocumentStore::new())
    } else {
        Arc::new(HttpDocumentStore::new(
            config.document_store_url.clone(),
            config.document_store_api_key.clone(),
            config.request_timeout(),
        )?)
    };
    let driver = LocalDriver::from_config(&config, db, documents)?;

    match cli.command {
        Command::Sync {
            connector,
            force_resync,
        } => {
            let report = driver.sync(connector, force_resync).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Gc { connector } => {
            let processed = driver.gc(connector).await?;
            println!("{}", serde_json::json!({ "processed_count": processed }));
        }
        Command::Cleanup { connector } => {
            let summary = driver.cleanup(connector).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Config | Command::Migrate => {}
    }
    Ok(())
}
