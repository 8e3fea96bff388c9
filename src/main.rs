use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use davbox::{
    config::Config, dav::server, db::Database, scheduling::orphan_reaper::OrphanReaper,
    scheduling::trash_purge::TrashPurgeScheduler, seed, storage::create_blob_store, AppState,
    Engines,
};

#[derive(Parser)]
#[command(name = "davbox", about = "Multi-tenant WebDAV gateway over S3-compatible storage")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the WebDAV server (default)
    Serve,
    /// Permanently delete files past the trash retention window
    PurgeExpiredTrash {
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
        /// Max files to process per run
        #[arg(long, default_value_t = 1000)]
        batch_size: i64,
    },
    /// Recalculate a user's storage usage from their file records
    RecomputeQuota {
        /// Username of the account to recompute
        username: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info")
            .add_directive("sqlx::postgres::notice=warn".parse().unwrap())
            .add_directive("davbox=info".parse().unwrap())
    });

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::PurgeExpiredTrash {
            dry_run,
            batch_size,
        } => purge_expired_trash(dry_run, batch_size).await,
        Command::RecomputeQuota { username } => recompute_quota(&username).await,
    }
}

async fn build_engines(config: &Config) -> anyhow::Result<(Database, Engines)> {
    let db = Database::new(&config.database_url).await?;
    db.migrate().await?;
    let blob = create_blob_store(config).await?;
    let engines = Engines::new(db.clone(), blob, config);
    Ok((db, engines))
}

async fn serve() -> anyhow::Result<()> {
    println!("\n🚀 DAVBOX GATEWAY STARTUP");
    println!("{}", "=".repeat(60));

    let config = match Config::from_env() {
        Ok(cfg) => {
            println!("✅ Configuration loaded and validated successfully");
            cfg
        }
        Err(e) => {
            println!("❌ CRITICAL: Configuration loading failed!");
            println!("Error: {}", e);
            return Err(e);
        }
    };

    println!("\n🗄️  DATABASE CONNECTION:");
    println!("{}", "=".repeat(50));

    let db = match Database::new(&config.database_url).await {
        Ok(db) => {
            println!("✅ Database pool created");
            db
        }
        Err(e) => {
            println!("❌ CRITICAL: Failed to connect to database!");
            println!("Error: {}", e);
            println!("\n🔧 Please verify:");
            println!("   - Database server is running");
            println!("   - DATABASE_URL is correct");
            println!("   - Database credentials are valid");
            return Err(e);
        }
    };

    info!("Running schema migration...");
    db.migrate().await?;
    info!("✅ Schema migration completed");

    seed::seed_admin_user(&db, &config).await?;

    let blob = create_blob_store(&config).await?;
    let engines = Engines::new(db.clone(), blob.clone(), &config);

    // Background jobs: trash retention and blob/record reconciliation.
    println!("\n📅 SCHEDULER INITIALIZATION:");
    println!("{}", "=".repeat(50));

    let purge_scheduler = TrashPurgeScheduler::new(
        engines.trash.clone(),
        Duration::from_secs(config.purge_interval_seconds),
        config.purge_batch_size,
    );
    tokio::spawn(async move {
        purge_scheduler.start().await;
    });
    println!("✅ Trash purge scheduler started");

    let reaper = OrphanReaper::new(
        db.clone(),
        blob.clone(),
        Duration::from_secs(config.reaper_interval_seconds),
        config.reaper_grace_seconds,
    );
    tokio::spawn(async move {
        reaper.start().await;
    });
    println!("✅ Orphan reaper started");

    let state = Arc::new(AppState {
        config: config.clone(),
        engines,
    });
    let app = server::router(state);

    println!("\n🌐 STARTING WEBDAV SERVER:");
    println!("{}", "=".repeat(50));

    let address = config.server_address();
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => {
            println!("✅ WebDAV server bound to: {}", address);
            listener
        }
        Err(e) => {
            println!("❌ CRITICAL: Failed to bind to address: {}", address);
            println!("Error: {}", e);
            return Err(e.into());
        }
    };

    println!("\n🎉 DAVBOX READY!");
    println!("{}", "=".repeat(60));
    println!("🌐 WebDAV endpoint: http://{}/", address);
    println!("🔐 Auth realm: {}", config.webdav_realm);
    println!("🪣 Storage backend: {}", config.storage_backend);
    println!("{}", "=".repeat(60));

    info!("🚀 davbox is now running and accepting connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// `purge-expired-trash [--dry-run] [--batch-size N]`. Always exits 0 and
/// prints the processed count; failures are reported on stderr.
async fn purge_expired_trash(dry_run: bool, batch_size: i64) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let (_db, engines) = build_engines(&config).await?;

    let now = Utc::now();

    if dry_run {
        let expired = engines.trash.list_expired(now, batch_size).await?;
        for record in &expired {
            println!(
                "Would delete: {} (user: {}, deleted: {})",
                record.trash_name,
                record.user_id,
                record
                    .deleted_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            );
        }
        println!("Would purge {} files from trash", expired.len());
        return Ok(());
    }

    match engines.trash.purge_expired(now, batch_size).await {
        Ok(count) => {
            println!("Purged {} files from trash", count);
        }
        Err(e) => {
            // Partial progress still counts; the next run resumes.
            error!("Trash purge aborted: {}", e);
            eprintln!("Trash purge aborted: {}", e);
            println!("Purged 0 files from trash");
        }
    }

    Ok(())
}

async fn recompute_quota(username: &str) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let (db, engines) = build_engines(&config).await?;

    let Some(user) = db.get_user_by_username(username).await? else {
        warn!("User not found: {}", username);
        anyhow::bail!("User not found: {}", username);
    };

    let total = engines.quota.recompute(user.id).await?;
    println!("Recomputed quota for {}: {} bytes used", username, total);

    Ok(())
}
