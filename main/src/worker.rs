//! The worker daemon (spec.md §6 "CLI", "Worker daemon").
//!
//! No positional arguments. `--segment-id` processes a single segment
//! outside the queue; `--no-write`/`--dry-run` is required alongside it and
//! suppresses catalogue/blob writes. Without `--segment-id` the process
//! recovers stale leases, then runs the worker pool until the per-process
//! job budget is exhausted (spec.md §4.D "Graceful restart") and exits 0.

use std::process::ExitCode;

use clap::Parser;
use common::{storage::db::SurrealDbClient, storage::store::StorageManager, utils::config::get_config};
use ingestion_pipeline::{recover_stale_leases, Dispatcher, SegmentProcessor};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Narrative-enrichment job worker.
#[derive(Parser, Debug)]
#[command(name = "worker", version)]
struct Args {
    /// Process a single segment without touching the queue.
    #[arg(long)]
    segment_id: Option<String>,

    /// Suppress all catalogue and blob writes. Required with `--segment-id`.
    #[arg(long = "no-write", alias = "dry-run")]
    no_write: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Args::parse();

    if args.segment_id.is_some() && !args.no_write {
        error!("--segment-id requires --no-write (or --dry-run)");
        return ExitCode::FAILURE;
    }

    let config = match get_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let db = match SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await
    {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "failed to connect to catalogue store");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = db.ensure_initialized().await {
        error!(error = %err, "failed to initialize catalogue indexes");
        return ExitCode::FAILURE;
    }

    let storage = match StorageManager::new(&config).await {
        Ok(storage) => storage,
        Err(err) => {
            error!(error = %err, "failed to initialize blob storage");
            return ExitCode::FAILURE;
        }
    };

    let processor = SegmentProcessor::new(db.clone(), storage, &config);

    if let Some(segment_id) = args.segment_id {
        info!(segment_id, dry_run = args.no_write, "processing single segment");
        return match processor.process_segment(&segment_id, false, args.no_write).await {
            Ok(output) => {
                info!(output = %output, "segment processed");
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!(segment_id, error = %err, "segment processing failed");
                ExitCode::FAILURE
            }
        };
    }

    match recover_stale_leases(
        &db,
        config.job_timeout_minutes,
        config.max_retries_per_job,
    )
    .await
    {
        Ok(count) if count > 0 => info!(recovered = count, "recovered stale leases at startup"),
        Ok(_) => {}
        Err(err) => error!(error = %err, "stale-lease recovery failed"),
    }

    let dispatcher = Dispatcher::new(db, processor, &config);
    info!(num_workers = config.num_workers, "starting worker pool");
    dispatcher.run().await;
    info!("worker pool exhausted job budget; exiting for graceful restart");

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_id_without_no_write_is_rejected_by_cli_contract() {
        let args = Args::try_parse_from(["worker", "--segment-id", "seg-1"]).expect("parses");
        assert!(args.segment_id.is_some());
        assert!(!args.no_write, "plain --segment-id must not imply dry-run");
    }

    #[test]
    fn dry_run_alias_sets_no_write() {
        let args = Args::try_parse_from(["worker", "--segment-id", "seg-1", "--dry-run"]).expect("parses");
        assert!(args.no_write);
    }

    #[test]
    fn no_write_long_flag_sets_no_write() {
        let args = Args::try_parse_from(["worker", "--no-write"]).expect("parses");
        assert!(args.no_write);
        assert!(args.segment_id.is_none());
    }

    #[test]
    fn bare_invocation_parses_with_no_flags() {
        let args = Args::try_parse_from(["worker"]).expect("parses");
        assert!(args.segment_id.is_none());
        assert!(!args.no_write);
    }
}
