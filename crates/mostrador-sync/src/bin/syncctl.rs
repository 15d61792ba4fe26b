//! # syncctl
//!
//! Operator tool for the local sync queue.
//!
//! ## Usage
//! ```bash
//! # Queue counts per status, oldest pending age, pending per table
//! cargo run -p mostrador-sync --bin syncctl -- status
//! cargo run -p mostrador-sync --bin syncctl -- status --json
//!
//! # Drain once against the configured remote
//! cargo run -p mostrador-sync --bin syncctl -- sync
//!
//! # List operations parked as failed
//! cargo run -p mostrador-sync --bin syncctl -- failed --limit 50
//!
//! # Explicit config file and database
//! cargo run -p mostrador-sync --bin syncctl -- status --config ./sync.toml --db ./mostrador.db
//! ```
//!
//! Log level follows `RUST_LOG` (default `info,mostrador=debug,sqlx=warn`).

use std::env;
use std::path::PathBuf;

use mostrador_db::Database;
use mostrador_sync::{SyncConfig, SyncEngine, SyncMode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut command: Option<String> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut db_path: Option<PathBuf> = None;
    let mut limit: u32 = 20;
    let mut json = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--limit" | "-n" => {
                if i + 1 < args.len() {
                    limit = args[i + 1].parse().unwrap_or(20);
                    i += 1;
                }
            }
            "--json" => json = true,
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other if command.is_none() && !other.starts_with('-') => {
                command = Some(other.to_string());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    let mut config = SyncConfig::read(config_path)?;
    if let Some(path) = db_path {
        config.database.path = Some(path);
    }

    match command.as_deref() {
        Some("status") => status(&config, json).await,
        Some("sync") => sync(config).await,
        Some("failed") => failed(&config, limit).await,
        _ => {
            print_help();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mostrador=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_help() {
    println!("Mostrador Sync Control");
    println!();
    println!("Usage: syncctl <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  status             Queue counts per status and pending per table");
    println!("  sync               Drain the queue once against the configured remote");
    println!("  failed             List operations parked as failed");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>  Config file (default: platform config dir/sync.toml)");
    println!("  -d, --db <PATH>      Local database file");
    println!("  -n, --limit <N>      Rows listed by `failed` (default: 20)");
    println!("      --json           Print `status` as JSON");
    println!("  -h, --help           Show this help message");
}

// =============================================================================
// Commands
// =============================================================================

async fn status(config: &SyncConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::new(config.db_config()).await?;
    let queue = db.queue();
    let status = queue.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Mostrador Sync Queue");
    println!("====================");
    println!("Database: {}", config.database_path().display());
    println!("Mode:     {}", config.mode());
    println!();
    println!("  pending    {:>6}", status.pending);
    println!("  in_flight  {:>6}", status.in_flight);
    println!("  completed  {:>6}", status.completed);
    println!("  skipped    {:>6}", status.skipped);
    println!("  failed     {:>6}", status.failed);
    println!();
    println!("Health: {:.1}%", status.health_score());

    if let (Some(at), Some(age)) = (status.oldest_pending_at, status.oldest_pending_age_secs) {
        println!("Oldest pending: {} ({}s ago)", at.to_rfc3339(), age);
    }

    let by_target = queue.pending_by_target().await?;
    if !by_target.is_empty() {
        println!();
        println!("Pending by table:");
        for (target, count) in by_target {
            println!("  {:<16} {:>6}", target, count);
        }
    }

    if status.needs_attention() {
        println!();
        println!("⚠ {} operation(s) need manual attention (see `syncctl failed`)", status.failed);
    }

    Ok(())
}

async fn sync(config: SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.mode() == SyncMode::Offline {
        println!("Sync is disabled (mode: offline). Nothing sent.");
        return Ok(());
    }

    let engine = SyncEngine::connect(config).await?;
    let before = engine.queue_status().await?;
    println!("Draining {} pending operation(s)...", before.pending);

    let report = engine.force_sync().await?;

    println!();
    println!("✓ Completed: {}", report.completed);
    println!("  Skipped:   {}", report.skipped);
    println!("  Retried:   {}", report.retried);
    println!("  Failed:    {}", report.failed);

    if report.aborted {
        let reason = report.last_error.unwrap_or_else(|| "remote unavailable".into());
        return Err(format!("remote unavailable, batch aborted: {reason}").into());
    }

    let after = engine.queue_status().await?;
    if after.pending > 0 {
        println!();
        println!("{} operation(s) still pending; run again to continue.", after.pending);
    }

    Ok(())
}

async fn failed(config: &SyncConfig, limit: u32) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::new(config.db_config()).await?;
    let parked = db.queue().failed(limit).await?;

    if parked.is_empty() {
        println!("No failed operations.");
        return Ok(());
    }

    println!("{:>8}  {:<16} {:<8} {:>8}  last error", "id", "table", "kind", "attempts");
    for op in parked {
        println!(
            "{:>8}  {:<16} {:<8} {:>8}  {}",
            op.id,
            op.target,
            op.kind.to_string(),
            op.attempts,
            op.last_error.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
