//! # gitmirror Main Entry Point
//!
//! Wires the pieces together: config, logging, database pool, upstream
//! client, sync service, queue, monitor, workers, and the HTTP server.
//! Everything is constructor-injected; nothing reads process globals after
//! initialization.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use gitmirror::{
    config::ConfigLoader,
    db, github, logging,
    monitor::Monitor,
    queue::JobQueue,
    server::{self, AppState},
    sync::SyncService,
    worker::Worker,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "gitmirror")]
#[command(about = "Mirrors public GitHub repositories into a local relational store")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    logging::init_subscriber(&config);

    let db = db::init_pool(&config).await?;

    if let Some(command) = cli.command {
        match command {
            Commands::Migrate { action } => {
                handle_migrate_command(&db, action).await?;
                return Ok(());
            }
        }
    }

    // Local and test profiles migrate on boot; production deploys run the
    // migrate subcommand explicitly.
    if config.profile == "local" || config.profile == "test" {
        info!(profile = %config.profile, "Running migrations automatically");
        Migrator::up(&db, None).await?;
    }

    let github = Arc::new(github::Client::new(&config));
    let service = Arc::new(SyncService::new(db.clone(), github, &config));
    let queue = Arc::new(JobQueue::new(db.clone()));

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    if config.monitor_enabled {
        let monitor = Monitor::new(
            service.clone(),
            db.clone(),
            config.monitor_interval(),
            shutdown.clone(),
        );
        tasks.push(tokio::spawn(monitor.run()));
    } else {
        info!("Repository monitor disabled by configuration");
    }

    for id in 0..config.worker_count.max(1) {
        let worker = Worker::new(
            id,
            queue.clone(),
            service.clone(),
            config.worker_poll_interval(),
            shutdown.clone(),
        );
        tasks.push(tokio::spawn(worker.run()));
    }

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    let state = AppState {
        db,
        sync: service,
        queue,
    };
    server::run_server(&config, state, shutdown.clone()).await?;

    // Server stopped: bring the background loops down with it.
    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }

    info!("Shutdown complete");
    Ok(())
}

async fn handle_migrate_command(
    db: &DatabaseConnection,
    action: MigrateAction,
) -> anyhow::Result<()> {
    match action {
        MigrateAction::Up => {
            println!("Applying migrations...");
            Migrator::up(db, None).await?;
            println!("All migrations applied successfully");
        }
        MigrateAction::Down => {
            println!("Rolling back last migration...");
            Migrator::down(db, Some(1)).await?;
            println!("Migration rolled back successfully");
        }
        MigrateAction::Status => {
            println!("Checking migration status...");
            let applied = Migrator::get_applied_migrations(db).await?;
            let pending = Migrator::get_pending_migrations(db).await?;

            if applied.is_empty() {
                println!("No migrations have been applied");
            } else {
                println!("Applied migrations: {} migration(s)", applied.len());
            }

            if pending.is_empty() {
                println!("No pending migrations");
            } else {
                println!("Pending migrations: {} migration(s)", pending.len());
            }
        }
    }
    Ok(())
}
