//! Prompt construction (spec.md §4.C step 4). Grounded on the teacher's
//! `utils/llm_instructions.rs` (a system-prompt constant plus a JSON-schema
//! value passed alongside the chat request), generalized from one fixed
//! analysis prompt to a media-type/work-parameterized pair of system/user
//! prompts plus a repair-prompt builder.

use common::storage::types::edition::MediaType;

/// Truncation bound for the invalid-JSON excerpt embedded in a repair
/// prompt (original_source/schema.py: `Invalid JSON: ...[:2000]...`).
const REPAIR_EXCERPT_CHARS: usize = 2000;

pub fn system_prompt(media_type: MediaType, work_title: &str) -> String {
    let media_label = match media_type {
        MediaType::Novel => "a chapter from the prose novel",
        MediaType::Manhwa => "a set of comic pages from the manhwa",
        MediaType::Anime => "an episode's subtitle track from the anime",
    };

    let character_clause = if media_type == MediaType::Novel {
        "Populate `character_updates` with every named character who appears \
         or is meaningfully referenced. Each entry is \
         `{name, aliases[], character_facts[], description}`. Use the \
         character's most complete surface form as `name`; list other \
         surface forms used in this excerpt as `aliases`. Omit pronouns, \
         kinship terms used alone (\"the mother\", \"his brother\"), and any \
         character already fully described unless new facts emerged. Give \
         each fact as `{fact, chapter, source}`: a specific, attributable \
         claim, not a restatement of the summary."
    } else {
        "Always emit `character_updates` as an empty array: character \
         dossiers are tracked for novel editions only."
    };

    format!(
        "You are a narrative analyst enriching {media_label} titled \"{work_title}\". \
         Read the provided excerpt and return a single JSON object with exactly three \
         top-level keys: `segment_summary`, `segment_entities`, and `character_updates`. \
         \n\n`segment_summary` is an object with `summary` (several sentences), \
         `summary_short` (one sentence), `events` (array of strings), `beats` \
         (array of `{{type, description}}`), `key_dialogue` (array of \
         `{{speaker, text, to, importance}}`), and `tone` (object with `primary`, \
         `secondary[]`, `intensity` 0..1). \
         \n\n`segment_entities` is an object whose values are all arrays of \
         strings: `characters`, `locations`, `items`, `time_refs`, \
         `organizations`, `factions`, `titles_ranks`, `skills`, `creatures`, \
         `concepts`, `relationships`, `emotions`, `keywords`. \
         \n\n{character_clause} \
         \n\nReturn JSON only, no prose, no markdown fencing."
    )
}

pub fn user_prompt(source_text: &str) -> String {
    format!(
        "=== BEGIN SOURCE TEXT ===\n{source_text}\n=== END SOURCE TEXT ===\n\n\
         Analyze the text between the delimiters above and return the JSON object \
         described in the system prompt."
    )
}

/// A repair call augments the original user prompt with the invalid JSON
/// (truncated) and the validator's rejection reason, asking for a corrected
/// document (spec.md §4.A "Repair round-trip").
pub fn repair_prompt(invalid_json: &str, validation_error: &str) -> String {
    let excerpt: String = invalid_json.chars().take(REPAIR_EXCERPT_CHARS).collect();
    format!(
        "Your previous response was not a valid structured document: {validation_error}. \
         Invalid JSON: {excerpt}\n\n\
         Return a corrected JSON object matching the schema described in the system \
         prompt. Return JSON only, no prose, no markdown fencing."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn novel_system_prompt_enumerates_character_contract() {
        let prompt = system_prompt(MediaType::Novel, "Arc of the Exile Prince");
        assert!(prompt.contains("character_updates"));
        assert!(prompt.contains("aliases"));
        assert!(prompt.contains("Arc of the Exile Prince"));
    }

    #[test]
    fn non_novel_system_prompt_demands_empty_character_updates() {
        let prompt = system_prompt(MediaType::Manhwa, "Solo Hunter");
        assert!(prompt.contains("empty array"));
    }

    #[test]
    fn repair_prompt_truncates_long_invalid_json() {
        let huge = "x".repeat(REPAIR_EXCERPT_CHARS + 500);
        let prompt = repair_prompt(&huge, "segment_summary.summary is empty");
        assert!(prompt.len() < huge.len());
        assert!(prompt.contains("segment_summary.summary is empty"));
    }
}
