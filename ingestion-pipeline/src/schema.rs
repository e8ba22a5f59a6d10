//! Output schema & repair (spec.md §4.A).
//!
//! Pure validation/coercion over the model's untyped JSON response. No I/O
//! here by design — the teacher keeps ingestion's `LLMEnrichmentResult`
//! parsing this way (deserialize, then a separate validation concern), this
//! generalizes it into an explicit two-phase coerce-then-typecheck pass so
//! every coercion rule in spec.md §4.A is independently unit testable.

use common::storage::types::{
    character::CharacterFact,
    edition::MediaType,
    segment_entities::SegmentEntities,
    segment_summary::{Beat, KeyDialogueLine, SegmentSummary, Tone},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized, validated form of one model response (spec.md §4.A, "NLP pack").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NlpPack {
    pub segment_summary: SegmentSummaryDoc,
    pub segment_entities: SegmentEntitiesDoc,
    pub character_updates: Vec<CharacterUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentSummaryDoc {
    pub summary: String,
    pub summary_short: String,
    pub events: Vec<String>,
    pub beats: Vec<Beat>,
    pub key_dialogue: Vec<KeyDialogueLine>,
    pub tone: Tone,
}

impl SegmentSummaryDoc {
    pub fn into_row(self, segment_id: String, model_version: String) -> SegmentSummary {
        let now = chrono::Utc::now();
        SegmentSummary {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            segment_id,
            summary: self.summary,
            summary_short: self.summary_short,
            events: self.events,
            beats: self.beats,
            key_dialogue: self.key_dialogue,
            tone: self.tone,
            model_version,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SegmentEntitiesDoc {
    pub characters: Vec<String>,
    pub locations: Vec<String>,
    pub items: Vec<String>,
    pub time_refs: Vec<String>,
    pub organizations: Vec<String>,
    pub factions: Vec<String>,
    pub titles_ranks: Vec<String>,
    pub skills: Vec<String>,
    pub creatures: Vec<String>,
    pub concepts: Vec<String>,
    pub relationships: Vec<String>,
    pub emotions: Vec<String>,
    pub keywords: Vec<String>,
}

impl SegmentEntitiesDoc {
    pub fn into_row(self, segment_id: String, model_version: String) -> SegmentEntities {
        let now = chrono::Utc::now();
        SegmentEntities {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            segment_id,
            characters: self.characters,
            locations: self.locations,
            items: self.items,
            time_refs: self.time_refs,
            organizations: self.organizations,
            factions: self.factions,
            titles_ranks: self.titles_ranks,
            skills: self.skills,
            creatures: self.creatures,
            concepts: self.concepts,
            relationships: self.relationships,
            emotions: self.emotions,
            keywords: self.keywords,
            model_version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharacterUpdate {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub character_facts: Vec<CharacterFact>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Generic-name blocklist (glossary). Extended with the Indonesian-locale
/// terms the original Python implementation carries, confirming the
/// glossary's "implementations may extend per content locale" note.
pub const GENERIC_NAME_BLOCKLIST: &[&str] = &[
    "father", "mother", "brother", "sister", "dad", "mom", "son", "daughter",
    "he", "she", "they", "him", "her", "them",
    "person", "man", "woman", "boy", "girl",
    "unknown", "unnamed", "none", "n/a", "n-a",
    "ayah", "ibu", "bapak", "kakak", "adik", "anak", "orang tua", "pria", "wanita",
];

/// Boilerplate description phrases (glossary), rejected as "no real description".
pub const BOILERPLATE_PHRASES: &[&str] = &[
    "unknown",
    "n/a",
    "none",
    "no description",
    "to be determined",
    "main character",
    "protagonist",
    "antagonist",
    "supporting character",
];

fn normalize_loose(s: &str) -> String {
    s.trim().to_lowercase()
}

pub fn is_generic_name(name: &str) -> bool {
    let n = normalize_loose(name);
    GENERIC_NAME_BLOCKLIST.iter().any(|b| *b == n)
}

pub fn is_boilerplate_description(description: &str) -> bool {
    let n = normalize_loose(description);
    n.is_empty() || BOILERPLATE_PHRASES.iter().any(|b| *b == n)
}

/// Coerce `value` in place per spec.md §4.A steps 1-2: missing/null objects
/// become `{}`, missing/null arrays become `[]`, scalar array values become
/// single-element arrays.
fn coerce_object(value: &mut Value) {
    if !value.is_object() {
        *value = Value::Object(serde_json::Map::new());
    }
}

fn coerce_array(value: &mut Value) {
    match value {
        Value::Array(_) => {}
        Value::Null => *value = Value::Array(Vec::new()),
        other => *value = Value::Array(vec![other.take()]),
    }
}

fn coerce_string_array(obj: &mut serde_json::Map<String, Value>, field: &str) {
    let entry = obj.entry(field.to_string()).or_insert(Value::Null);
    coerce_array(entry);
    if let Value::Array(items) = entry {
        for item in items.iter_mut() {
            if !item.is_string() {
                *item = Value::String(item.to_string());
            }
        }
    }
}

const ENTITY_ARRAY_FIELDS: &[&str] = &[
    "characters",
    "locations",
    "items",
    "time_refs",
    "organizations",
    "factions",
    "titles_ranks",
    "skills",
    "creatures",
    "concepts",
    "relationships",
    "emotions",
    "keywords",
];

/// Runs the full §4.A validation contract. Returns the normalized, typed
/// `NlpPack` or a human-readable rejection reason (used verbatim to build
/// the repair prompt, spec.md §4.A "Repair round-trip").
pub fn normalize(mut raw: Value, media_type: MediaType) -> Result<NlpPack, String> {
    let root = raw
        .as_object_mut()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    // segment_summary
    let mut summary_val = root.remove("segment_summary").unwrap_or(Value::Null);
    coerce_object(&mut summary_val);
    let summary_obj = summary_val
        .as_object_mut()
        .ok_or_else(|| "segment_summary is not an object".to_string())?;

    for field in ["summary", "summary_short"] {
        let entry = summary_obj.entry(field.to_string()).or_insert(Value::Null);
        if entry.is_null() {
            *entry = Value::String(String::new());
        }
    }
    coerce_string_array(summary_obj, "events");

    {
        let entry = summary_obj
            .entry("beats".to_string())
            .or_insert(Value::Null);
        coerce_array(entry);
    }
    {
        let entry = summary_obj
            .entry("key_dialogue".to_string())
            .or_insert(Value::Null);
        coerce_array(entry);
    }

    let mut tone_val = summary_obj.remove("tone").unwrap_or(Value::Null);
    coerce_object(&mut tone_val);
    {
        let tone_obj = tone_val.as_object_mut().expect("coerced to object above");
        let primary = tone_obj.entry("primary".to_string()).or_insert(Value::Null);
        if primary.is_null() {
            *primary = Value::String(String::new());
        }
        coerce_string_array(tone_obj, "secondary");
        let intensity = tone_obj
            .entry("intensity".to_string())
            .or_insert(Value::Null);
        if !intensity.is_number() {
            *intensity = Value::from(0.5);
        }
    }
    summary_obj.insert("tone".to_string(), tone_val);

    let summary_doc: SegmentSummaryDoc = serde_json::from_value(summary_val)
        .map_err(|e| format!("segment_summary shape invalid: {e}"))?;

    if summary_doc.summary.trim().is_empty() {
        return Err("segment_summary.summary is empty after coercion".to_string());
    }

    // segment_entities
    let mut entities_val = root.remove("segment_entities").unwrap_or(Value::Null);
    coerce_object(&mut entities_val);
    {
        let entities_obj = entities_val
            .as_object_mut()
            .expect("coerced to object above");
        for field in ENTITY_ARRAY_FIELDS {
            coerce_string_array(entities_obj, field);
        }
    }
    let entities_doc: SegmentEntitiesDoc = serde_json::from_value(entities_val)
        .map_err(|e| format!("segment_entities shape invalid: {e}"))?;

    // character_updates
    let mut updates_val = root.remove("character_updates").unwrap_or(Value::Null);
    coerce_array(&mut updates_val);
    let raw_updates: Vec<Value> = match updates_val {
        Value::Array(items) => items,
        _ => Vec::new(),
    };

    let mut character_updates = Vec::new();
    for mut item in raw_updates {
        if !item.is_object() {
            continue;
        }
        if let Some(obj) = item.as_object_mut() {
            coerce_string_array(obj, "aliases");
            let facts_entry = obj
                .entry("character_facts".to_string())
                .or_insert(Value::Null);
            coerce_array(facts_entry);
            if let Value::Array(facts) = facts_entry {
                for fact in facts.iter_mut() {
                    wrap_bare_fact(fact);
                }
            }
        }

        let update: CharacterUpdate = match serde_json::from_value(item) {
            Ok(u) => u,
            Err(_) => continue,
        };

        if update.name.trim().is_empty() || is_generic_name(&update.name) {
            continue;
        }
        character_updates.push(update);
    }

    // Non-novel media never carries character updates (spec.md §4.A); the
    // model may still emit entries, the pipeline just ignores them.
    if media_type != MediaType::Novel {
        character_updates.clear();
    }

    Ok(NlpPack {
        segment_summary: summary_doc,
        segment_entities: entities_doc,
        character_updates,
    })
}

/// Wraps a bare-string fact into the canonical `{fact, chapter, segment, source}`
/// object form (spec.md §9 open question, resolved: object form is canonical).
fn wrap_bare_fact(fact: &mut Value) {
    if let Value::String(text) = fact {
        *fact = serde_json::json!({
            "fact": text,
            "chapter": null,
            "segment": null,
            "source": "",
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_is_idempotent() {
        let raw = json!({
            "segment_summary": {
                "summary": "A long summary.",
                "summary_short": "Short.",
                "events": "single event",
                "beats": null,
                "key_dialogue": null,
                "tone": null
            },
            "segment_entities": { "locations": null },
            "character_updates": []
        });

        let first = normalize(raw, MediaType::Novel).expect("first pass");
        let as_value = serde_json::to_value(&first).unwrap();
        let second = normalize(as_value, MediaType::Novel).expect("second pass");
        assert_eq!(first, second);
    }

    #[test]
    fn coerces_null_list_fields_to_empty_arrays() {
        let raw = json!({
            "segment_summary": {
                "summary": "ok",
                "summary_short": "ok",
            },
            "segment_entities": { "locations": null, "characters": "Solo Leveling" },
            "character_updates": []
        });

        let pack = normalize(raw, MediaType::Novel).expect("normalize");
        assert_eq!(pack.segment_entities.locations, Vec::<String>::new());
        assert_eq!(pack.segment_entities.characters, vec!["Solo Leveling"]);
    }

    #[test]
    fn rejects_empty_summary_after_coercion() {
        let raw = json!({
            "segment_summary": { "summary": null, "summary_short": "x" },
            "segment_entities": {},
            "character_updates": []
        });

        let err = normalize(raw, MediaType::Novel).unwrap_err();
        assert!(err.contains("summary"));
    }

    #[test]
    fn drops_generic_and_empty_character_names() {
        let raw = json!({
            "segment_summary": { "summary": "ok", "summary_short": "ok" },
            "segment_entities": {},
            "character_updates": [
                { "name": "Arthur Leywin", "aliases": ["Art"] },
                { "name": "He" },
                { "name": "" },
                { "name": "Mother" }
            ]
        });

        let pack = normalize(raw, MediaType::Novel).expect("normalize");
        assert_eq!(pack.character_updates.len(), 1);
        assert_eq!(pack.character_updates[0].name, "Arthur Leywin");
    }

    #[test]
    fn non_novel_media_always_yields_empty_character_updates() {
        let raw = json!({
            "segment_summary": { "summary": "ok", "summary_short": "ok" },
            "segment_entities": {},
            "character_updates": [ { "name": "Arthur Leywin" } ]
        });

        let pack = normalize(raw, MediaType::Manhwa).expect("normalize");
        assert!(pack.character_updates.is_empty());
    }

    #[test]
    fn wraps_bare_string_facts_into_object_form() {
        let raw = json!({
            "segment_summary": { "summary": "ok", "summary_short": "ok" },
            "segment_entities": {},
            "character_updates": [
                { "name": "Arthur", "character_facts": ["protagonist"] }
            ]
        });

        let pack = normalize(raw, MediaType::Novel).expect("normalize");
        let facts = &pack.character_updates[0].character_facts;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].fact, "protagonist");
        assert_eq!(facts[0].chapter, None);
    }

    #[test]
    fn boilerplate_and_generic_helpers() {
        assert!(is_boilerplate_description("Unknown"));
        assert!(is_boilerplate_description(""));
        assert!(!is_boilerplate_description("A skilled mage from the frontier."));
        assert!(is_generic_name("brother"));
        assert!(!is_generic_name("Arthur Leywin"));
    }
}
