//! The enqueue scanner (spec.md §4.E). Grounded on the teacher's ingestion
//! scan-and-enqueue shape in `run_worker_loop`'s original task-discovery
//! pass, generalized from one task kind to the segment/work/edition/
//! media_type filter set and the paginated presence-probe this spec
//! describes.

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            asset::AssetType,
            edition::{Edition, MediaType},
            pipeline_job::{PipelineJob, JOB_TYPE_SUMMARIZE},
            segment::Segment,
            segment_asset::SegmentAsset,
            segment_entities::SegmentEntities,
            segment_summary::SegmentSummary,
        },
    },
};
use serde::Serialize;
use tracing::info;

const PAGE_SIZE: i64 = 1000;
const PENDING_CHUNK_SIZE: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct EnqueueFilters {
    pub work_id: Option<String>,
    pub edition_id: Option<String>,
    pub media_type: Option<MediaType>,
    pub limit: Option<usize>,
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct EnqueueStats {
    pub enqueued: usize,
    pub skipped_pending: usize,
    pub skipped_complete: usize,
}

/// A required raw asset type per media type, the minimum precondition for
/// enqueueing (spec.md §4.E step 2).
fn required_asset_types(media_type: MediaType) -> &'static [AssetType] {
    match media_type {
        MediaType::Novel => &[AssetType::RawHtml, AssetType::CleanedText],
        MediaType::Manhwa => &[AssetType::RawImage],
        MediaType::Anime => &[AssetType::RawSubtitle],
    }
}

/// Runs the full §4.E algorithm and returns its summary stats. In
/// `filters.dry_run` no job row is inserted; the stats reflect what *would*
/// have happened (spec.md §4.E "Dry-run mode").
pub async fn run(filters: &EnqueueFilters, db: &SurrealDbClient) -> Result<EnqueueStats, AppError> {
    let editions = Edition::list_matching(filters.work_id.as_deref(), filters.media_type, db).await?;
    let editions: Vec<Edition> = match &filters.edition_id {
        Some(edition_id) => editions.into_iter().filter(|e| &e.id == edition_id).collect(),
        None => editions,
    };

    if editions.is_empty() {
        info!("enqueue scanner: no matching editions");
        return Ok(EnqueueStats::default());
    }

    let edition_media: std::collections::HashMap<String, MediaType> = editions
        .iter()
        .map(|e| (e.id.clone(), e.media_type))
        .collect();
    let edition_ids: Vec<String> = editions.iter().map(|e| e.id.clone()).collect();

    let mut stats = EnqueueStats::default();
    let mut candidates: Vec<Segment> = Vec::new();
    let limit = filters.limit.unwrap_or(usize::MAX);
    let mut offset = 0_i64;

    'paginate: loop {
        let page = Segment::list_page(&edition_ids, offset, PAGE_SIZE, db).await?;
        if page.is_empty() {
            break;
        }
        offset += page.len() as i64;

        for segment in page {
            let Some(media_type) = edition_media.get(&segment.edition_id).copied() else {
                continue;
            };

            let assets = SegmentAsset::assets_for_segment(&segment.id, db).await?;
            let has_required_asset = required_asset_types(media_type)
                .iter()
                .any(|required| assets.iter().any(|a| a.asset_type == *required));
            if !has_required_asset {
                continue;
            }

            if !filters.force {
                let summary_exists = SegmentSummary::find_by_segment(&segment.id, db).await?.is_some();
                let entities_exists = SegmentEntities::find_by_segment(&segment.id, db).await?.is_some();
                if summary_exists && entities_exists {
                    stats.skipped_complete += 1;
                    continue;
                }
            }

            candidates.push(segment);
            if candidates.len() >= limit {
                break 'paginate;
            }
        }
    }

    if candidates.is_empty() {
        return Ok(stats);
    }

    let segment_ids: Vec<String> = candidates.iter().map(|s| s.id.clone()).collect();
    let pending = pending_segment_ids_chunked(&segment_ids, db).await?;

    let mut jobs_to_insert = Vec::with_capacity(candidates.len());
    for segment in &candidates {
        if pending.contains(&segment.id) && !filters.force {
            stats.skipped_pending += 1;
            continue;
        }

        let Some(edition) = editions.iter().find(|e| e.id == segment.edition_id) else {
            continue;
        };

        if filters.dry_run {
            stats.enqueued += 1;
            info!(segment_id = %segment.id, "dry run: would enqueue job");
            continue;
        }

        jobs_to_insert.push(PipelineJob::new_queued(
            segment.id.clone(),
            edition.id.clone(),
            edition.work_id.clone(),
            filters.force,
        ));
    }

    if !jobs_to_insert.is_empty() {
        let inserted = PipelineJob::bulk_insert(jobs_to_insert, db).await?;
        stats.enqueued += inserted;
    }

    info!(
        enqueued = stats.enqueued,
        skipped_pending = stats.skipped_pending,
        skipped_complete = stats.skipped_complete,
        "enqueue scan complete"
    );

    Ok(stats)
}

/// Segment ids with a queued-or-running job, batched at `PENDING_CHUNK_SIZE`
/// (spec.md §4.E step 5). `PipelineJob::pending_segment_ids` already chunks
/// at 200 internally; this wrapper just pins the job type this scanner cares
/// about.
async fn pending_segment_ids_chunked(
    segment_ids: &[String],
    db: &SurrealDbClient,
) -> Result<std::collections::HashSet<String>, AppError> {
    debug_assert!(PENDING_CHUNK_SIZE <= 200);
    PipelineJob::pending_segment_ids(segment_ids, JOB_TYPE_SUMMARIZE, db).await
}

#[cfg(test)]
mod tests {
    use common::storage::{db::SurrealDbClient, types::work::Work};
    use uuid::Uuid;

    use super::*;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("enqueue_test", &Uuid::new_v4().to_string())
            .await
            .expect("memory db");
        db.build_indexes().await.expect("indexes");
        db
    }

    async fn seed_novel_segment_with_raw_html(db: &SurrealDbClient) -> (Edition, Segment) {
        let work = Work {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            title: "Test Work".into(),
        };
        db.store_item(work.clone()).await.expect("store work");

        let edition = Edition {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            work_id: work.id.clone(),
            media_type: MediaType::Novel,
        };
        db.store_item(edition.clone()).await.expect("store edition");

        let segment = Segment {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            edition_id: edition.id.clone(),
            segment_type: "chapter".into(),
            number: 1,
            title: "Chapter One".into(),
        };
        db.store_item(segment.clone()).await.expect("store segment");

        let asset = common::storage::types::asset::Asset {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            r2_key: "raw/work/edition/chapter-0001/raw.html".into(),
            asset_type: AssetType::RawHtml,
            byte_size: 10,
            digest: "deadbeef".into(),
        };
        db.store_item(asset.clone()).await.expect("store asset");

        let link = SegmentAsset {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            segment_id: segment.id.clone(),
            asset_id: asset.id.clone(),
            role: None,
        };
        db.store_item(link).await.expect("store link");

        (edition, segment)
    }

    #[tokio::test]
    async fn enqueues_segment_with_raw_asset_and_no_outputs() {
        let db = memory_db().await;
        let (_edition, segment) = seed_novel_segment_with_raw_html(&db).await;

        let stats = run(&EnqueueFilters::default(), &db).await.expect("run");
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.skipped_complete, 0);

        let pending = PipelineJob::pending_segment_ids(&[segment.id.clone()], JOB_TYPE_SUMMARIZE, &db)
            .await
            .expect("pending");
        assert!(pending.contains(&segment.id));
    }

    #[tokio::test]
    async fn skips_segment_missing_required_raw_asset() {
        let db = memory_db().await;
        let work = Work {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            title: "Test Work".into(),
        };
        db.store_item(work.clone()).await.expect("store work");
        let edition = Edition {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            work_id: work.id.clone(),
            media_type: MediaType::Novel,
        };
        db.store_item(edition.clone()).await.expect("store edition");
        let segment = Segment {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            edition_id: edition.id.clone(),
            segment_type: "chapter".into(),
            number: 1,
            title: "Chapter One".into(),
        };
        db.store_item(segment).await.expect("store segment");

        let stats = run(&EnqueueFilters::default(), &db).await.expect("run");
        assert_eq!(stats.enqueued, 0);
    }

    #[tokio::test]
    async fn dry_run_reports_without_inserting() {
        let db = memory_db().await;
        let (_edition, segment) = seed_novel_segment_with_raw_html(&db).await;

        let filters = EnqueueFilters {
            dry_run: true,
            ..Default::default()
        };
        let stats = run(&filters, &db).await.expect("run");
        assert_eq!(stats.enqueued, 1);

        let pending = PipelineJob::pending_segment_ids(&[segment.id.clone()], JOB_TYPE_SUMMARIZE, &db)
            .await
            .expect("pending");
        assert!(pending.is_empty(), "dry run must not insert a job row");
    }

    #[tokio::test]
    async fn skips_pending_segment_unless_forced() {
        let db = memory_db().await;
        let (edition, segment) = seed_novel_segment_with_raw_html(&db).await;

        db.store_item(PipelineJob::new_queued(
            segment.id.clone(),
            edition.id.clone(),
            edition.work_id.clone(),
            false,
        ))
        .await
        .expect("seed existing job");

        let stats = run(&EnqueueFilters::default(), &db).await.expect("run");
        assert_eq!(stats.enqueued, 0);
        assert_eq!(stats.skipped_pending, 1);
    }
}
