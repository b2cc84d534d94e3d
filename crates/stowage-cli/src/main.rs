//! Stowage CLI: operator commands for storages, migrations and the job worker.
//!
//! Reads settings from the environment (see `StowageConfig::from_env`).
//! Commands that touch storages, files or reports need DATABASE_URL.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::memory::LogNotifier;
use stowage_core::{StorageRepository, StowageConfig, VideoFileRepository};
use stowage_cli::{format_bytes, load_storage_spec, parse_storage_ref};
use stowage_db::{PgJobQueue, PgMigrationReportStore, PgStorageRepository, PgVideoFileRepository};
use stowage_storage::{AdapterFactory, ManagerOptions, StorageManager, DEFAULT_SIGNED_URL_TTL};
use stowage_worker::{
    init_tracing, JobHandlerContext, JobWorker, MigrationPlanner, MigrationReports,
    StorageJobContext, WorkerConfig,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "stowage", about = "Stowage storage operations")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a storage config file and test the connection
    Check {
        /// JSON file with name, kind and config
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the quota reported by a storage
    Quota {
        #[arg(long)]
        config: PathBuf,
    },
    /// Produce a signed URL for a remote path
    Sign {
        #[arg(long)]
        config: PathBuf,
        /// Path relative to the storage base path
        remote_path: String,
        /// Lifetime in seconds
        #[arg(long)]
        expires_in: Option<u64>,
    },
    /// Configured storages
    Storages {
        #[command(subcommand)]
        sub: StorageCommands,
    },
    /// Queue a migration of every file from one storage to another
    Migrate {
        /// Source storage id, or "local"
        #[arg(long)]
        from: String,
        /// Destination storage id, or "local"
        #[arg(long)]
        to: String,
    },
    /// Migration reports
    Report {
        #[command(subcommand)]
        sub: ReportCommands,
    },
    /// Run the job worker until interrupted
    Worker,
}

#[derive(Subcommand)]
enum StorageCommands {
    /// List storages
    List,
    /// Add a storage from a config file
    Add {
        #[arg(long)]
        config: PathBuf,
        /// Make it the default upload target
        #[arg(long)]
        default: bool,
    },
    /// Make a storage the default upload target
    SetDefault { id: Uuid },
    /// Usage and health of a storage
    Stats { id: Uuid },
}

#[derive(Subcommand)]
enum ReportCommands {
    /// Summary of one migration
    Show { id: String },
    /// Failed files of one migration
    Failures { id: String },
    /// Migrations still in progress
    Active,
    /// Most recently completed migrations
    Recent {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Remove a report
    Delete { id: String },
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

/// Repositories and queue backed by Postgres.
struct Services {
    storages: Arc<dyn StorageRepository>,
    files: Arc<dyn VideoFileRepository>,
    queue: Arc<PgJobQueue>,
    reports: MigrationReports,
}

impl Services {
    async fn connect(config: &StowageConfig) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set for this command")?;
        let pool = stowage_db::connect(url).await?;
        stowage_db::migrate(&pool).await?;

        Ok(Self {
            storages: Arc::new(PgStorageRepository::new(pool.clone())),
            files: Arc::new(PgVideoFileRepository::new(pool.clone())),
            queue: Arc::new(PgJobQueue::new(pool.clone())),
            reports: MigrationReports::new(Arc::new(PgMigrationReportStore::new(pool))),
        })
    }

    fn manager(&self, config: &StowageConfig) -> Result<Arc<StorageManager>> {
        let factory = AdapterFactory::from_config(config)?;
        Ok(Arc::new(StorageManager::new(
            self.storages.clone(),
            self.files.clone(),
            factory,
            ManagerOptions::from_config(config),
        )))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = StowageConfig::from_env()?;

    match cli.command {
        Commands::Check { config: path } => {
            let storage = load_storage_spec(&path)?;
            let factory = AdapterFactory::from_config(&config)?;
            if let Err(e) = factory.validate(&storage) {
                print_json(&serde_json::json!({
                    "success": false,
                    "message": e.to_string(),
                    "missingFields": e.missing_fields(),
                }))?;
                return Ok(());
            }
            let adapter = factory.create(&storage)?;
            print_json(&adapter.test_connection().await)?;
        }
        Commands::Quota { config: path } => {
            let storage = load_storage_spec(&path)?;
            let adapter = AdapterFactory::from_config(&config)?.create(&storage)?;
            match adapter.get_quota().await {
                Some(quota) => print_json(&serde_json::json!({
                    "usedBytes": quota.used_bytes,
                    "totalBytes": quota.total_bytes,
                    "availableBytes": quota.available_bytes(),
                    "usagePercent": quota.usage_percent(),
                    "used": format_bytes(quota.used_bytes),
                    "total": quota.total_bytes.map(format_bytes),
                }))?,
                None => print_json(&serde_json::json!({
                    "message": format!("{} storage does not report a quota", storage.kind.label()),
                }))?,
            }
        }
        Commands::Sign {
            config: path,
            remote_path,
            expires_in,
        } => {
            let storage = load_storage_spec(&path)?;
            let adapter = AdapterFactory::from_config(&config)?.create(&storage)?;
            let ttl = expires_in.map(Duration::from_secs).unwrap_or(DEFAULT_SIGNED_URL_TTL);
            let url = adapter.get_signed_url(&remote_path, ttl);
            print_json(&serde_json::json!({ "url": url, "expiresIn": ttl.as_secs() }))?;
        }
        Commands::Storages { sub } => {
            let services = Services::connect(&config).await?;
            match sub {
                StorageCommands::List => print_json(&services.storages.list().await?)?,
                StorageCommands::Add {
                    config: path,
                    default,
                } => {
                    let storage = load_storage_spec(&path)?;
                    AdapterFactory::from_config(&config)?.validate(&storage)?;
                    services.storages.save(&storage).await?;
                    if default {
                        services.storages.set_default(storage.id).await?;
                    }
                    let saved = services
                        .storages
                        .find(storage.id)
                        .await?
                        .context("Storage vanished after save")?;
                    print_json(&saved)?;
                }
                StorageCommands::SetDefault { id } => {
                    services.manager(&config)?.set_default_storage(id).await?;
                    print_json(&serde_json::json!({ "success": true, "defaultStorageId": id }))?;
                }
                StorageCommands::Stats { id } => {
                    let manager = services.manager(&config)?;
                    let storage = manager.storage(id).await?;
                    print_json(&manager.storage_stats(&storage).await)?;
                }
            }
        }
        Commands::Migrate { from, to } => {
            let source = parse_storage_ref(&from)?;
            let destination = parse_storage_ref(&to)?;
            let services = Services::connect(&config).await?;
            let planner = MigrationPlanner::new(
                services.storages.clone(),
                services.files.clone(),
                services.queue.clone(),
                services.reports.clone(),
            );
            let plan = planner.start_migration(source, destination).await?;
            print_json(&plan)?;
        }
        Commands::Report { sub } => {
            let services = Services::connect(&config).await?;
            let reports = &services.reports;
            match sub {
                ReportCommands::Show { id } => {
                    let summary = reports
                        .summary(&id)
                        .await?
                        .with_context(|| format!("Migration {} not found", id))?;
                    print_json(&summary)?;
                }
                ReportCommands::Failures { id } => print_json(&reports.failures(&id).await?)?,
                ReportCommands::Active => print_json(&reports.active_migrations().await?)?,
                ReportCommands::Recent { limit } => {
                    print_json(&reports.recent_completed(limit).await?)?
                }
                ReportCommands::Delete { id } => {
                    let deleted = reports.delete_report(&id).await?;
                    print_json(&serde_json::json!({ "deleted": deleted }))?;
                }
            }
        }
        Commands::Worker => run_worker(&config).await?,
    }

    Ok(())
}

async fn run_worker(config: &StowageConfig) -> Result<()> {
    let services = Services::connect(config).await?;
    let ctx: Arc<dyn JobHandlerContext> = Arc::new(StorageJobContext {
        manager: services.manager(config)?,
        storages: services.storages.clone(),
        files: services.files.clone(),
        notifier: Arc::new(LogNotifier),
        publisher: services.queue.clone(),
        reports: services.reports.clone(),
        media_root: config.media_root.clone(),
    });

    let worker = JobWorker::new(
        services.queue.clone(),
        services.queue.clone(),
        WorkerConfig::from_config(config),
        Arc::downgrade(&ctx),
        None,
    );

    tokio::signal::ctrl_c()
        .await
        .context("Listen for shutdown signal")?;
    worker.shutdown().await;
    tracing::info!(
        pending_jobs = services.queue.pending_count().await.unwrap_or(-1),
        "Worker stopped"
    );
    Ok(())
}
