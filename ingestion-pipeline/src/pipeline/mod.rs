mod context;
mod services;
mod stages;
mod state;

pub use context::SegmentJobContext;
pub use services::{DefaultPipelineServices, PipelineServices};
pub use stages::MaterializeOutcome;

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{segment_entities::SegmentEntities, segment_summary::SegmentSummary},
    },
    utils::config::AppConfig,
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::{character_merge::CharacterMergeStats, model_client::ModelClient, prompts};

use self::state::claimed;

/// Per-job descriptor placed in `pipeline_jobs.output` on success (spec.md
/// §4.C step 8).
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStats {
    pub media_type: String,
    pub segment_type: String,
    pub segment_number: i64,
    pub input_chars: usize,
    pub input_tokens_est: usize,
    pub output_chars: usize,
    pub model_latency_ms: u64,
    pub retries_count: u32,
    pub repair_attempted: bool,
    pub repair_succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paragraph_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_blocks: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutput {
    pub model_version: String,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ProcessStats>,
    pub summary_upserted: bool,
    pub entities_upserted: bool,
    pub characters: CharacterMergeStats,
}

/// Roughly 4 chars per token (a common estimator, not a tokenizer), with a
/// fixed headroom added for the structured response itself and clamped to
/// a sane request size. Open question left unresolved by spec.md §4.C step
/// 5 ("the computed max_tokens"); recorded as a deliberate choice in
/// DESIGN.md rather than guessed silently.
fn compute_max_tokens(input_chars: usize) -> u32 {
    let estimated_input_tokens = (input_chars / 4).max(1);
    let budget = estimated_input_tokens.saturating_add(2048);
    budget.clamp(2048, 8192) as u32
}

/// Drives one segment through §4.C end to end. Cheaply `Clone`-able so a
/// dispatcher can hand one copy to each worker task.
#[derive(Clone)]
pub struct SegmentProcessor {
    db: SurrealDbClient,
    storage: StorageManager,
    services: Arc<dyn PipelineServices>,
    model_version: String,
}

impl SegmentProcessor {
    pub fn new(db: SurrealDbClient, storage: StorageManager, config: &AppConfig) -> Self {
        let services = DefaultPipelineServices::new(ModelClient::new(config));
        Self::with_services(db, storage, Arc::new(services), config.model_version.clone())
    }

    pub fn with_services(
        db: SurrealDbClient,
        storage: StorageManager,
        services: Arc<dyn PipelineServices>,
        model_version: String,
    ) -> Self {
        Self {
            db,
            storage,
            services,
            model_version,
        }
    }

    /// Runs §4.C steps 1-8 for one segment. `dry_run` suppresses catalogue
    /// writes in `materialize` while every other step still runs, matching
    /// the worker daemon's `--segment-id --dry-run` mode (spec.md §6).
    #[tracing::instrument(skip(self), fields(segment_id = %segment_id, force, dry_run))]
    pub async fn process_segment(
        &self,
        segment_id: &str,
        force: bool,
        dry_run: bool,
    ) -> Result<Value, AppError> {
        let mut ctx = SegmentJobContext::load(segment_id, &self.db).await?;

        if !force {
            let summary = SegmentSummary::find_by_segment(segment_id, &self.db).await?;
            let entities = SegmentEntities::find_by_segment(segment_id, &self.db).await?;
            if summary.is_some() && entities.is_some() {
                info!(segment_id, "segment already processed; skipping model call");
                return self.skip_output();
            }
        }

        let machine = claimed();
        let machine = machine
            .load()
            .map_err(|(_, guard)| AppError::InternalError(format!("invalid transition during load: {guard:?}")))?;

        let machine = stages::extract(machine, &mut ctx, self.services.as_ref(), &self.storage).await?;

        let system_prompt = prompts::system_prompt(ctx.media_type(), &ctx.work.title);
        let input_chars = ctx.source_text()?.chars().count();
        let max_tokens = compute_max_tokens(input_chars);

        let machine = stages::invoke(
            machine,
            &mut ctx,
            self.services.as_ref(),
            &system_prompt,
            max_tokens,
        )
        .await?;

        let machine = stages::validate(
            machine,
            &mut ctx,
            self.services.as_ref(),
            &system_prompt,
            max_tokens,
        )
        .await?;

        let (_machine, materialized) = stages::materialize(
            machine,
            &mut ctx,
            force,
            &self.model_version,
            dry_run,
            &self.db,
            &self.storage,
        )
        .await?;

        let stats = ProcessStats {
            media_type: ctx.media_type().as_str().to_string(),
            segment_type: ctx.segment.segment_type.clone(),
            segment_number: ctx.segment.number,
            input_chars,
            input_tokens_est: input_chars / 4,
            output_chars: ctx.raw_response.as_ref().map_or(0, |s| s.chars().count()),
            model_latency_ms: ctx.chat_stats.as_ref().map_or(0, |s| s.latency_ms),
            retries_count: ctx.chat_stats.as_ref().map_or(0, |s| s.retries_count),
            repair_attempted: ctx.repair_attempted,
            repair_succeeded: ctx.repair_succeeded,
            page_count: ctx.extraction_stats.as_ref().and_then(|s| s.page_count),
            paragraph_count: ctx.extraction_stats.as_ref().and_then(|s| s.paragraph_count),
            subtitle_blocks: ctx.extraction_stats.as_ref().and_then(|s| s.subtitle_blocks),
        };

        let output = ProcessOutput {
            model_version: self.model_version.clone(),
            skipped: false,
            reason: None,
            stats: Some(stats),
            summary_upserted: materialized.summary_upserted,
            entities_upserted: materialized.entities_upserted,
            characters: materialized.characters,
        };

        info!(segment_id, "segment processed");
        serde_json::to_value(output).map_err(|err| AppError::InternalError(err.to_string()))
    }

    fn skip_output(&self) -> Result<Value, AppError> {
        let output = ProcessOutput {
            model_version: self.model_version.clone(),
            skipped: true,
            reason: Some("already_exists".to_string()),
            stats: None,
            summary_upserted: false,
            entities_upserted: false,
            characters: CharacterMergeStats::default(),
        };
        serde_json::to_value(output).map_err(|err| AppError::InternalError(err.to_string()))
    }
}
