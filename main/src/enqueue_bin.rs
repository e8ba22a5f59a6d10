//! The enqueue tool (spec.md §6 "Enqueue tool"). Scans the catalogue for
//! segments with raw input but no outputs and inserts `queued`
//! `pipeline_jobs` rows (spec.md §4.E).

use std::process::ExitCode;

use clap::Parser;
use common::{
    storage::{db::SurrealDbClient, types::edition::MediaType},
    utils::config::get_config,
};
use ingestion_pipeline::EnqueueFilters;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "enqueue", version)]
struct Args {
    /// Re-enqueue segments that already have outputs or a pending job.
    #[arg(short, long)]
    force: bool,

    /// Stop once this many candidates have been accumulated.
    #[arg(short = 'l', long)]
    limit: Option<usize>,

    /// Restrict the scan to one work.
    #[arg(short = 'w', long = "work-id")]
    work_id: Option<String>,

    /// Restrict the scan to one media type.
    #[arg(short = 'm', long = "media-type", value_parser = parse_media_type)]
    media_type: Option<MediaType>,

    /// Log what would be enqueued without writing any job rows.
    #[arg(short = 'n', long = "dry-run")]
    dry_run: bool,
}

fn parse_media_type(raw: &str) -> Result<MediaType, String> {
    match raw {
        "novel" => Ok(MediaType::Novel),
        "manhwa" => Ok(MediaType::Manhwa),
        "anime" => Ok(MediaType::Anime),
        other => Err(format!("unknown media type '{other}' (expected novel|manhwa|anime)")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Args::parse();

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

    let filters = EnqueueFilters {
        work_id: args.work_id,
        edition_id: None,
        media_type: args.media_type,
        limit: args.limit,
        force: args.force,
        dry_run: args.dry_run,
    };

    match ingestion_pipeline::enqueue::run(&filters, &db).await {
        Ok(stats) => {
            info!(
                enqueued = stats.enqueued,
                skipped_pending = stats.skipped_pending,
                skipped_complete = stats.skipped_complete,
                "enqueue run complete"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "enqueue run failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_flags_match_spec_cli_contract() {
        let args = Args::try_parse_from([
            "enqueue", "-f", "-l", "50", "-w", "work-1", "-m", "manhwa", "-n",
        ])
        .expect("parses");
        assert!(args.force);
        assert_eq!(args.limit, Some(50));
        assert_eq!(args.work_id.as_deref(), Some("work-1"));
        assert_eq!(args.media_type, Some(MediaType::Manhwa));
        assert!(args.dry_run);
    }

    #[test]
    fn defaults_are_unrestricted() {
        let args = Args::try_parse_from(["enqueue"]).expect("parses");
        assert!(!args.force);
        assert_eq!(args.limit, None);
        assert_eq!(args.work_id, None);
        assert_eq!(args.media_type, None);
        assert!(!args.dry_run);
    }

    #[test]
    fn unknown_media_type_is_rejected() {
        let result = Args::try_parse_from(["enqueue", "-m", "cartoon"]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_media_type_accepts_all_three_variants() {
        assert_eq!(parse_media_type("novel"), Ok(MediaType::Novel));
        assert_eq!(parse_media_type("manhwa"), Ok(MediaType::Manhwa));
        assert_eq!(parse_media_type("anime"), Ok(MediaType::Anime));
    }
}
