//! Character merge engine (spec.md §4.B). Operates only for `media_type =
//! novel`. Identity resolution and the alias/fact/description merge rules
//! are pure functions over `Character`/`CharacterUpdate` values; `apply_updates`
//! is the thin persistence shim that performs the insert-or-select-then-update
//! dance against `common::storage`, generalized from the teacher's
//! `KnowledgeEntity` upsert idiom (`common/src/storage/types/knowledge_entity.rs`)
//! from key-based entity identity to name/alias-based character identity.

use std::collections::HashSet;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::character::{Character, CharacterFact},
    },
};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::schema::{is_boilerplate_description, CharacterUpdate};

/// Unicode NFKC -> lowercase -> strip -> collapse internal whitespace -> drop
/// quotes/punctuation except apostrophe and hyphen (spec.md §4.B "Normalization").
pub fn normalize_name(s: &str) -> String {
    let nfkc: String = s.nfkc().collect();
    let lowered = nfkc.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '\'' || *c == '-')
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First existing character whose canonical name or any alias normalizes
/// into the update's search set; scan order is the caller's slice order
/// (spec.md §4.B "Identity resolution" — "first match wins, scan order is
/// insertion order of C").
pub fn resolve<'a>(characters: &'a [Character], update: &CharacterUpdate) -> Option<&'a Character> {
    let search: HashSet<String> = std::iter::once(normalize_name(&update.name))
        .chain(update.aliases.iter().map(|a| normalize_name(a)))
        .collect();

    characters.iter().find(|c| {
        search.contains(&normalize_name(&c.name))
            || c.aliases.iter().any(|a| search.contains(&normalize_name(a)))
    })
}

/// Union of `existing`'s aliases with the incoming name/aliases, deduplicated
/// by normalized form (first-seen original casing wins), with the existing
/// character's canonical name excluded (spec.md §4.B "Aliases").
pub fn merge_aliases(existing: &Character, incoming_name: &str, incoming_aliases: &[String]) -> Vec<String> {
    let canonical_norm = normalize_name(&existing.name);
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let candidates = existing
        .aliases
        .iter()
        .cloned()
        .chain(std::iter::once(incoming_name.to_string()))
        .chain(incoming_aliases.iter().cloned());

    for candidate in candidates {
        let norm = normalize_name(&candidate);
        if norm.is_empty() || norm == canonical_norm {
            continue;
        }
        if seen.insert(norm) {
            out.push(candidate);
        }
    }

    out
}

/// Cleans a brand-new character's alias list: canonical name removed,
/// normalized-form deduplicated (spec.md §4.B "Insert path").
pub fn clean_new_aliases(name: &str, aliases: &[String]) -> Vec<String> {
    let canonical_norm = normalize_name(name);
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for alias in aliases {
        let norm = normalize_name(alias);
        if norm.is_empty() || norm == canonical_norm {
            continue;
        }
        if seen.insert(norm) {
            out.push(alias.clone());
        }
    }

    out
}

fn normalize_fact_text(s: &str) -> String {
    s.nfkc().collect::<String>().to_lowercase().trim().to_string()
}

/// Stamps facts missing a chapter/segment with the current segment number
/// and a `source = "segment_{N}"` tag, then concatenates with `existing`,
/// deduplicating by `(norm(fact_text), chapter)` — two facts with the same
/// text and the same explicit `chapter` reference (or both lacking one) are
/// the same fact restated; `segment` is provenance only and does not by
/// itself distinguish two occurrences of the same fact text (see DESIGN.md
/// for the worked example this resolves: the same fact re-emitted a segment
/// later must not duplicate).
pub fn merge_facts(
    existing: &[CharacterFact],
    new_facts: &[CharacterFact],
    current_segment: i64,
) -> Vec<CharacterFact> {
    let mut seen: HashSet<(String, Option<i64>)> = HashSet::new();
    let mut out = Vec::new();

    for fact in existing {
        let key = (normalize_fact_text(&fact.fact), fact.chapter);
        if seen.insert(key) {
            out.push(fact.clone());
        }
    }

    for fact in new_facts {
        let mut stamped = fact.clone();
        if stamped.chapter.is_none() && stamped.segment.is_none() {
            stamped.segment = Some(current_segment);
        }
        stamped.source = format!("segment_{current_segment}");

        let key = (normalize_fact_text(&stamped.fact), stamped.chapter);
        if seen.insert(key) {
            out.push(stamped);
        }
    }

    out
}

/// spec.md §4.B "Description": replaced only if the incoming one is
/// non-empty AND (existing is empty OR existing is boilerplate OR the new
/// one is both >50 chars and >1.5x the existing length).
pub fn merge_description(existing: &str, incoming: Option<&str>) -> Option<String> {
    let incoming = incoming.map(str::trim).filter(|s| !s.is_empty())?;
    let existing_trim = existing.trim();

    let should_replace = existing_trim.is_empty()
        || is_boilerplate_description(existing_trim)
        || (incoming.chars().count() > 50
            && incoming.chars().count() as f64 > 1.5 * existing_trim.chars().count() as f64);

    should_replace.then(|| incoming.to_string())
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct CharacterMergeStats {
    pub inserted: u32,
    pub updated: u32,
    pub skipped: u32,
}

/// Applies every `character_updates` entry from one job's model output
/// against the work's character set, handling the insert-vs-merge decision
/// and the duplicate-key race (spec.md §4.B "Concurrency hazard", §7 error
/// kind 5) with a bounded retry.
pub async fn apply_updates(
    work_id: &str,
    updates: &[CharacterUpdate],
    segment_number: i64,
    model_version: &str,
    db: &SurrealDbClient,
) -> Result<CharacterMergeStats, AppError> {
    let mut characters = Character::list_for_work(work_id, db).await?;
    let mut stats = CharacterMergeStats::default();

    for update in updates {
        if update.name.trim().is_empty() {
            stats.skipped = stats.skipped.saturating_add(1);
            continue;
        }

        match resolve(&characters, update) {
            Some(existing) => {
                let merged = merge_into(existing.clone(), update, segment_number, model_version);
                let saved = merged.save(db).await?;
                replace_in_snapshot(&mut characters, saved);
                stats.updated = stats.updated.saturating_add(1);
            }
            None => {
                let outcome =
                    insert_with_retry(work_id, update, segment_number, model_version, db).await?;
                match outcome {
                    InsertOutcome::Inserted(character) => {
                        characters.push(character);
                        stats.inserted = stats.inserted.saturating_add(1);
                    }
                    InsertOutcome::MergedInstead(character) => {
                        replace_in_snapshot(&mut characters, character);
                        stats.updated = stats.updated.saturating_add(1);
                    }
                }
            }
        }
    }

    Ok(stats)
}

fn replace_in_snapshot(characters: &mut [Character], updated: Character) {
    if let Some(slot) = characters.iter_mut().find(|c| c.id == updated.id) {
        *slot = updated;
    }
}

fn merge_into(
    existing: Character,
    update: &CharacterUpdate,
    segment_number: i64,
    model_version: &str,
) -> Character {
    let mut merged = existing;
    merged.aliases = merge_aliases(&merged, &update.name, &update.aliases);
    merged.character_facts =
        merge_facts(&merged.character_facts, &update.character_facts, segment_number);
    if let Some(description) = merge_description(&merged.description, update.description.as_deref()) {
        merged.description = description;
    }
    merged.model_version = model_version.to_string();
    merged.updated_at = chrono::Utc::now();
    merged
}

enum InsertOutcome {
    Inserted(Character),
    MergedInstead(Character),
}

const MAX_UPSERT_RACE_RETRIES: u32 = 3;

async fn insert_with_retry(
    work_id: &str,
    update: &CharacterUpdate,
    segment_number: i64,
    model_version: &str,
    db: &SurrealDbClient,
) -> Result<InsertOutcome, AppError> {
    let normalized_lower = normalize_name(&update.name);

    for attempt in 0..MAX_UPSERT_RACE_RETRIES {
        let candidate = build_insert_candidate(work_id, update, segment_number, model_version);
        if let Some(inserted) = candidate.try_insert(db).await? {
            return Ok(InsertOutcome::Inserted(inserted));
        }

        debug!(
            work_id,
            name = %update.name,
            attempt,
            "character upsert race detected; re-reading and merging"
        );

        if let Some(existing) =
            Character::find_by_work_and_lower_name(work_id, &normalized_lower, db).await?
        {
            let merged = merge_into(existing, update, segment_number, model_version);
            let saved = merged.save(db).await?;
            return Ok(InsertOutcome::MergedInstead(saved));
        }
    }

    Err(AppError::InternalError(format!(
        "character upsert race for '{}' exceeded {MAX_UPSERT_RACE_RETRIES} retries",
        update.name
    )))
}

fn build_insert_candidate(
    work_id: &str,
    update: &CharacterUpdate,
    segment_number: i64,
    model_version: &str,
) -> Character {
    let now = chrono::Utc::now();
    let aliases = clean_new_aliases(&update.name, &update.aliases);
    let facts = merge_facts(&[], &update.character_facts, segment_number);
    let description = update
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty() && !is_boilerplate_description(d))
        .unwrap_or("")
        .to_string();

    Character {
        id: uuid::Uuid::new_v4().to_string(),
        created_at: now,
        updated_at: now,
        work_id: work_id.to_string(),
        name: update.name.clone(),
        aliases,
        character_facts: facts,
        description,
        model_version: model_version.to_string(),
    }
}
