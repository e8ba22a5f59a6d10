//! The job dispatch engine (spec.md §4.D). Grounded on the teacher's
//! `run_worker_loop` shape (a `LocalSet` of cooperating tasks polling a
//! shared claim), generalized from the teacher's single `IngestionTask`
//! queue to `PipelineJob`'s claim/attempt-cap/stale-lease/graceful-restart
//! contract.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::pipeline_job::{JOB_TYPE_SUMMARIZE, PipelineJob, TASK_NLP_PACK_V1}},
    utils::config::AppConfig,
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::pipeline::SegmentProcessor;

const EXCEEDED_MAX_RETRIES: &str = "Exceeded max retries";

/// Scans `running` jobs whose lease has expired and fails them (spec.md
/// §4.D "Stale-lease recovery"). Runs once at daemon startup, before any
/// worker begins polling for new work (spec.md §8 scenario 3).
pub async fn recover_stale_leases(
    db: &SurrealDbClient,
    job_timeout_minutes: i64,
    max_retries_per_job: u32,
) -> Result<usize, AppError> {
    let stale = PipelineJob::list_stale_running(job_timeout_minutes, db).await?;
    let count = stale.len();

    for job in stale {
        let message = if job.attempt >= max_retries_per_job {
            format!("{EXCEEDED_MAX_RETRIES}: lease expired after {job_timeout_minutes} minutes")
        } else {
            format!("Interrupted: lease expired after {job_timeout_minutes} minutes, will retry")
        };
        warn!(job_id = %job.id, segment_id = %job.segment_id, "recovering stale lease");
        job.mark_failed(message, db).await?;
    }

    Ok(count)
}

/// The pool of cooperating workers that claim and run jobs until the
/// process-level job budget is exhausted (spec.md §4.D "Worker pool",
/// "Graceful restart"). `claim_lock` is the one process-local mutex on the
/// hot path (spec.md §5 "Shared-resource policy"); it serializes only the
/// "select next + mark running" critical section, not the job's own work.
pub struct Dispatcher {
    db: SurrealDbClient,
    processor: SegmentProcessor,
    claim_lock: Arc<Mutex<()>>,
    jobs_completed: Arc<AtomicU64>,
    poll_seconds: u64,
    max_retries_per_job: u32,
    max_jobs_per_restart: u64,
    num_workers: usize,
}

impl Dispatcher {
    pub fn new(db: SurrealDbClient, processor: SegmentProcessor, config: &AppConfig) -> Self {
        Self {
            db,
            processor,
            claim_lock: Arc::new(Mutex::new(())),
            jobs_completed: Arc::new(AtomicU64::new(0)),
            poll_seconds: config.poll_seconds,
            max_retries_per_job: config.max_retries_per_job,
            max_jobs_per_restart: config.max_jobs_per_restart,
            num_workers: config.num_workers,
        }
    }

    /// Runs `num_workers` cooperating loops until the shared job budget is
    /// exhausted, then awaits every in-flight job and returns (spec.md §4.D
    /// "Graceful restart": the caller exits 0 after this returns).
    pub async fn run(&self) {
        let mut handles = Vec::with_capacity(self.num_workers);

        for worker_id in 0..self.num_workers {
            let db = self.db.clone();
            let processor = self.processor.clone();
            let claim_lock = self.claim_lock.clone();
            let jobs_completed = self.jobs_completed.clone();
            let poll_seconds = self.poll_seconds;
            let max_retries_per_job = self.max_retries_per_job;
            let max_jobs_per_restart = self.max_jobs_per_restart;

            handles.push(tokio::spawn(async move {
                worker_loop(
                    worker_id,
                    db,
                    processor,
                    claim_lock,
                    jobs_completed,
                    poll_seconds,
                    max_retries_per_job,
                    max_jobs_per_restart,
                )
                .await;
            }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "worker task panicked");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    db: SurrealDbClient,
    processor: SegmentProcessor,
    claim_lock: Arc<Mutex<()>>,
    jobs_completed: Arc<AtomicU64>,
    poll_seconds: u64,
    max_retries_per_job: u32,
    max_jobs_per_restart: u64,
) {
    loop {
        if jobs_completed.load(Ordering::SeqCst) >= max_jobs_per_restart {
            info!(worker_id, "graceful restart: job budget exhausted, stopping");
            return;
        }

        let claimed = {
            let _guard = claim_lock.lock().await;
            PipelineJob::claim_next(JOB_TYPE_SUMMARIZE, TASK_NLP_PACK_V1, &db).await
        };

        let job = match claimed {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::time::sleep(std::time::Duration::from_secs(poll_seconds)).await;
                continue;
            }
            Err(err) => {
                error!(worker_id, error = %err, "claim query failed");
                tokio::time::sleep(std::time::Duration::from_secs(poll_seconds)).await;
                continue;
            }
        };

        if job.attempt > max_retries_per_job {
            warn!(job_id = %job.id, "exceeded max retries");
            if let Err(err) = job.mark_failed(EXCEEDED_MAX_RETRIES.to_string(), &db).await {
                error!(job_id = %job.id, error = %err, "failed to mark exceeded-retries job as failed");
            }
            jobs_completed.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        run_one_job(&db, &processor, &job).await;
        jobs_completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Runs §4.C for one claimed job and finalizes it (spec.md §4.D
/// "Success/failure finalization", §7 "Propagation policy": exceptions
/// never escape the job boundary into the dispatcher loop).
async fn run_one_job(db: &SurrealDbClient, processor: &SegmentProcessor, job: &PipelineJob) {
    let result = processor
        .process_segment(&job.segment_id, job.input.force, false)
        .await;

    match result {
        Ok(output) => {
            if let Err(err) = job.mark_success(output, db).await {
                error!(job_id = %job.id, error = %err, "failed to record job success");
            }
        }
        Err(err) => {
            warn!(job_id = %job.id, segment_id = %job.segment_id, error = %err, "job failed");
            if let Err(mark_err) = job.mark_failed(stringify_error(&err), db).await {
                error!(job_id = %job.id, error = %mark_err, "failed to record job failure");
            }
        }
    }
}

/// Exception-class-plus-message stringification (spec.md §4.D "Success/
/// failure finalization": "error is the exception class name plus
/// message"). `AppError`'s variant name stands in for a class name.
fn stringify_error(err: &AppError) -> String {
    err.as_stored_error()
}

#[cfg(test)]
mod tests {
    use common::storage::types::{edition::MediaType, pipeline_job::JobStatus};
    use uuid::Uuid;

    use super::*;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("dispatch_test", &Uuid::new_v4().to_string())
            .await
            .expect("memory db");
        db.build_indexes().await.expect("indexes");
        db
    }

    #[tokio::test]
    async fn recover_stale_leases_fails_old_running_jobs_before_polling() {
        let db = memory_db().await;

        let mut stale = PipelineJob::new_queued("seg-1".into(), "ed-1".into(), "work-1".into(), false);
        stale.status = JobStatus::Running;
        stale.started_at = Some(chrono::Utc::now() - chrono::Duration::minutes(10));
        stale.attempt = 1;
        db.store_item(stale.clone()).await.expect("store stale");

        let recovered = recover_stale_leases(&db, 3, 3).await.expect("recover");
        assert_eq!(recovered, 1);

        let reloaded: PipelineJob = db
            .get_item(&stale.id)
            .await
            .expect("query")
            .expect("row present");
        assert!(matches!(reloaded.status, JobStatus::Failed));
        assert!(reloaded.error.unwrap().contains("will retry"));
    }

    #[tokio::test]
    async fn recover_stale_leases_marks_permanent_failure_past_retry_cap() {
        let db = memory_db().await;

        let mut stale = PipelineJob::new_queued("seg-1".into(), "ed-1".into(), "work-1".into(), false);
        stale.status = JobStatus::Running;
        stale.started_at = Some(chrono::Utc::now() - chrono::Duration::minutes(10));
        stale.attempt = 3;
        db.store_item(stale.clone()).await.expect("store stale");

        recover_stale_leases(&db, 3, 3).await.expect("recover");

        let reloaded: PipelineJob = db
            .get_item(&stale.id)
            .await
            .expect("query")
            .expect("row present");
        assert!(reloaded.error.unwrap().contains(EXCEEDED_MAX_RETRIES));
    }

    #[tokio::test]
    async fn stringify_error_includes_variant_and_message() {
        let err = AppError::NotFound("segment abc".into());
        let message = stringify_error(&err);
        assert!(message.contains("segment abc"));
    }

    #[test]
    fn media_type_round_trips_as_str_for_sanity() {
        assert_eq!(MediaType::Novel.as_str(), "novel");
    }
}
