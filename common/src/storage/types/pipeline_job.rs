use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::StoredObject;

/// A job's lifecycle (spec.md §3, "PipelineJob" Lifecycles). Never
/// transitions out of `Success`/`Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobInput {
    pub task: String,
    #[serde(default)]
    pub force: bool,
}

/// The job type this worker ever produces. Kept as a string field (rather
/// than folded into the enum) because spec.md §3 describes `job_type` as an
/// open string column shared with sibling job kinds outside this core's scope.
pub const JOB_TYPE_SUMMARIZE: &str = "summarize";
pub const TASK_NLP_PACK_V1: &str = "nlp_pack_v1";

stored_object!(PipelineJob, "pipeline_jobs", {
    job_type: String,
    segment_id: String,
    edition_id: String,
    work_id: String,
    input: JobInput,
    status: JobStatus,
    attempt: u32,
    #[serde(default, serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime")]
    finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    output: Option<serde_json::Value>
});

impl PipelineJob {
    pub fn new_queued(segment_id: String, edition_id: String, work_id: String, force: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            job_type: JOB_TYPE_SUMMARIZE.to_string(),
            segment_id,
            edition_id,
            work_id,
            input: JobInput {
                task: TASK_NLP_PACK_V1.to_string(),
                force,
            },
            status: JobStatus::Queued,
            attempt: 0,
            started_at: None,
            finished_at: None,
            error: None,
            output: None,
        }
    }

    /// Atomically claims the oldest queued job of `job_type`/`task`
    /// (spec.md §4.D "Job claim protocol"). Expressed as a compare-and-swap
    /// `UPDATE ... WHERE id = (SELECT ...) AND status = 'queued' RETURNING *`,
    /// the form spec.md §9 REDESIGN FLAGS gives as the substitute for
    /// `SELECT ... FOR UPDATE SKIP LOCKED` on a store without row locks;
    /// SurrealDB executes the whole statement as one atomic operation, so
    /// this *is* the store-native claim primitive here, not a fallback.
    ///
    /// The returned job already has `status = running` and `attempt`
    /// incremented; the caller is responsible for the attempt-cap check
    /// (spec.md §4.D "Attempt cap") before doing any real work.
    pub async fn claim_next(
        job_type: &str,
        task: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let sql = format!(
            "UPDATE {table} SET
                status = 'running',
                started_at = time::now(),
                updated_at = time::now(),
                attempt = attempt + 1
             WHERE id = (
                SELECT VALUE id FROM {table}
                WHERE status = 'queued' AND job_type = $job_type AND input.task = $task
                ORDER BY created_at ASC
                LIMIT 1
             )[0]
             AND status = 'queued'
             RETURNING *;",
            table = Self::table_name()
        );

        let mut response = db
            .query(sql)
            .bind(("job_type", job_type.to_string()))
            .bind(("task", task.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    pub async fn mark_success(
        &self,
        output: serde_json::Value,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET status = 'success', finished_at = time::now(), updated_at = time::now(), output = $output",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("output", output))
            .await?
            .check()?;
        Ok(())
    }

    /// `error` is the stringified exception class + message (+ stack text
    /// where available), per spec.md §4.D "Success/failure finalization".
    pub async fn mark_failed(&self, error: String, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET status = 'failed', finished_at = time::now(), updated_at = time::now(), error = $error",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("error", error))
            .await?
            .check()?;
        Ok(())
    }

    /// Running jobs whose lease (`started_at`) is older than `timeout_minutes`
    /// (spec.md §4.D "Stale-lease recovery").
    pub async fn list_stale_running(
        timeout_minutes: i64,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let cutoff = Utc::now() - chrono::Duration::minutes(timeout_minutes);
        let mut response = db
            .query(format!(
                "SELECT * FROM {} WHERE status = 'running' AND started_at < $cutoff",
                Self::table_name()
            ))
            .bind(("cutoff", cutoff))
            .await?;
        Ok(response.take(0)?)
    }

    /// Segment ids with a queued-or-running job of `job_type`, chunked at
    /// ~200 ids per query (spec.md §4.E step 5).
    pub async fn pending_segment_ids(
        segment_ids: &[String],
        job_type: &str,
        db: &SurrealDbClient,
    ) -> Result<HashSet<String>, AppError> {
        let mut pending = HashSet::new();

        for chunk in segment_ids.chunks(200) {
            let mut response = db
                .query(format!(
                    "SELECT VALUE segment_id FROM {} WHERE segment_id IN $ids AND job_type = $job_type AND status IN ['queued', 'running']",
                    Self::table_name()
                ))
                .bind(("ids", chunk.to_vec()))
                .bind(("job_type", job_type.to_string()))
                .await?;
            let ids: Vec<String> = response.take(0)?;
            pending.extend(ids);
        }

        Ok(pending)
    }

    pub async fn bulk_insert(jobs: Vec<Self>, db: &SurrealDbClient) -> Result<usize, AppError> {
        let count = jobs.len();
        for job in jobs {
            db.store_item(job).await?;
        }
        Ok(count)
    }
}
