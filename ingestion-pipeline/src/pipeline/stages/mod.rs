//! The five type-state-checked stages of one segment job (spec.md §4.C
//! steps 3-7). Grounded on the teacher's `stages/mod.rs` shape: one
//! function per transition, each taking the machine in its current state
//! and the mutable job context, doing the real I/O, then driving the
//! machine forward. Guard failures (which should be unreachable on a
//! correctly sequenced call chain) are folded into `AppError::InternalError`
//! the same way the teacher's `map_guard_error` does.

use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            edition::MediaType,
            segment_entities::SegmentEntities,
            segment_summary::SegmentSummary,
        },
    },
};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument, warn};

use crate::{blob_key, character_merge, prompts, schema};

use super::{
    context::SegmentJobContext,
    services::PipelineServices,
    state::{Extracted, Invoked, Loaded, Materialized, SegmentMachine, Validated},
};

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid segment pipeline transition during {event}: {guard:?}"
    ))
}

#[instrument(level = "trace", skip_all, fields(segment_id = %ctx.segment.id))]
pub async fn extract(
    machine: SegmentMachine<(), Loaded>,
    ctx: &mut SegmentJobContext,
    services: &dyn PipelineServices,
    storage: &StorageManager,
) -> Result<SegmentMachine<(), Extracted>, AppError> {
    let media_type = ctx.media_type();
    let (text, stats) = services.extract(media_type, &ctx.assets, storage).await?;

    debug!(chars = text.chars().count(), "segment source text extracted");
    ctx.source_text = Some(text);
    ctx.extraction_stats = Some(stats);

    machine
        .extract()
        .map_err(|(_, guard)| map_guard_error("extract", &guard))
}

#[instrument(level = "trace", skip_all, fields(segment_id = %ctx.segment.id))]
pub async fn invoke(
    machine: SegmentMachine<(), Extracted>,
    ctx: &mut SegmentJobContext,
    services: &dyn PipelineServices,
    system_prompt: &str,
    max_tokens: u32,
) -> Result<SegmentMachine<(), Invoked>, AppError> {
    let user_prompt = prompts::user_prompt(ctx.source_text()?);

    let (raw, stats) = services.invoke(system_prompt, &user_prompt, max_tokens).await?;
    debug!(
        latency_ms = stats.latency_ms,
        retries = stats.retries_count,
        "model call completed"
    );

    ctx.raw_response = Some(raw);
    ctx.chat_stats = Some(stats);

    machine
        .invoke()
        .map_err(|(_, guard)| map_guard_error("invoke", &guard))
}

/// Parses and validates the model's response (spec.md §4.A), issuing one
/// repair call if the first attempt fails (spec.md §4.C step 6, §7 error
/// kind 4: "one repair round-trip attempted; if still invalid the job
/// fails").
#[instrument(level = "trace", skip_all, fields(segment_id = %ctx.segment.id))]
pub async fn validate(
    machine: SegmentMachine<(), Invoked>,
    ctx: &mut SegmentJobContext,
    services: &dyn PipelineServices,
    system_prompt: &str,
    max_tokens: u32,
) -> Result<SegmentMachine<(), Validated>, AppError> {
    let media_type = ctx.media_type();
    let raw = ctx
        .raw_response
        .clone()
        .ok_or_else(|| AppError::InternalError("model response expected to be available".into()))?;

    let first_attempt = match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => schema::normalize(value, media_type),
        Err(err) => Err(format!("response is not valid JSON: {err}")),
    };

    let pack = match first_attempt {
        Ok(pack) => pack,
        Err(reason) => {
            warn!(reason = %reason, "model response failed validation; issuing repair call");
            ctx.repair_attempted = true;

            let repair_prompt = prompts::repair_prompt(&raw, &reason);
            let (repaired_raw, repair_stats) =
                services.invoke(system_prompt, &repair_prompt, max_tokens).await?;

            if let Some(existing) = ctx.chat_stats.as_mut() {
                existing.latency_ms = existing.latency_ms.saturating_add(repair_stats.latency_ms);
                existing.retries_count =
                    existing.retries_count.saturating_add(repair_stats.retries_count);
            }

            let repaired_value: serde_json::Value = serde_json::from_str(&repaired_raw)
                .map_err(|err| AppError::LLMParsing(format!("repair response is not valid JSON: {err}")))?;

            let repaired_pack = schema::normalize(repaired_value, media_type).map_err(AppError::Validation)?;

            ctx.repair_succeeded = true;
            ctx.raw_response = Some(repaired_raw);
            repaired_pack
        }
    };

    ctx.nlp_pack = Some(pack);

    machine
        .validate()
        .map_err(|(_, guard)| map_guard_error("validate", &guard))
}

/// What actually happened during materialization, for the job's output
/// document (spec.md §4.C step 8).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MaterializeOutcome {
    pub summary_upserted: bool,
    pub entities_upserted: bool,
    pub characters: character_merge::CharacterMergeStats,
}

/// Upserts SegmentSummary and SegmentEntities, and (novel only) runs the
/// character merge engine, each independently skipped if already present and
/// `force=false` (spec.md §4.C step 7). In `dry_run` no catalogue row is
/// written; presence is probed to report what *would* have changed.
#[instrument(level = "trace", skip_all, fields(segment_id = %ctx.segment.id, force, dry_run))]
pub async fn materialize(
    machine: SegmentMachine<(), Validated>,
    ctx: &mut SegmentJobContext,
    force: bool,
    model_version: &str,
    dry_run: bool,
    db: &SurrealDbClient,
    storage: &StorageManager,
) -> Result<(SegmentMachine<(), Materialized>, MaterializeOutcome), AppError> {
    let pack = ctx.take_nlp_pack()?;
    let segment_id = ctx.segment.id.clone();

    if !dry_run {
        maybe_persist_cleaned_text(ctx, storage).await;
    }

    let outcome = if dry_run {
        let summary_exists = SegmentSummary::find_by_segment(&segment_id, db).await?.is_some();
        let entities_exists = SegmentEntities::find_by_segment(&segment_id, db).await?.is_some();
        info!(segment_id = %segment_id, "dry run: catalogue writes suppressed");

        MaterializeOutcome {
            summary_upserted: force || !summary_exists,
            entities_upserted: force || !entities_exists,
            characters: character_merge::CharacterMergeStats::default(),
        }
    } else {
        let summary_row = pack
            .segment_summary
            .into_row(segment_id.clone(), model_version.to_string());
        let summary_upserted = summary_row.upsert(force, db).await?;

        let entities_row = pack
            .segment_entities
            .into_row(segment_id.clone(), model_version.to_string());
        let entities_upserted = entities_row.upsert(force, db).await?;

        let characters = if ctx.media_type() == MediaType::Novel && !pack.character_updates.is_empty() {
            character_merge::apply_updates(
                &ctx.work.id,
                &pack.character_updates,
                ctx.segment.number,
                model_version,
                db,
            )
            .await?
        } else {
            character_merge::CharacterMergeStats::default()
        };

        MaterializeOutcome {
            summary_upserted,
            entities_upserted,
            characters,
        }
    };

    let machine = machine
        .materialize()
        .map_err(|(_, guard)| map_guard_error("materialize", &guard))?;

    Ok((machine, outcome))
}

/// Writes the extracted plain text back to the blob store under the
/// upstream pipeline's derived-asset convention (spec.md §6, §8
/// "re-running a completed segment... derived cleaned-text blob"). This is
/// a convenience for downstream readers, not part of this worker's
/// contract with the catalogue: a failure here is logged and swallowed, it
/// never fails the job or blocks the state machine (original_source's own
/// `nlp_worker` treats this write the same way).
async fn maybe_persist_cleaned_text(ctx: &SegmentJobContext, storage: &StorageManager) {
    let Some(text) = ctx.source_text.as_ref() else {
        return;
    };

    let key = blob_key::derived_cleaned_text_key(
        ctx.media_type(),
        &ctx.work.id,
        &ctx.edition.id,
        &ctx.segment.segment_type,
        ctx.segment.number,
    );

    if let Err(err) = storage.put(&key, Bytes::from(text.clone())).await {
        warn!(key = %key, error = %err, "best-effort derived cleaned-text write failed");
    }
}
