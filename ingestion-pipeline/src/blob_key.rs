//! Derived blob-key convention (spec.md §6, confirmed verbatim against
//! `original_source/nlp_worker/key_builder.py`): the worker never writes a
//! derived cleaned-text blob back under its own invented layout, it
//! reproduces the upstream pipeline's existing convention exactly so other
//! readers of the bucket keep working.

use common::storage::types::edition::MediaType;

/// `derived/{media}/{work}/{edition}/{segment_type}-{NNNN}/cleaned.txt`,
/// `NNNN` = `number` zero-padded to 4 digits (spec.md §6, §8 "round-trip").
pub fn derived_cleaned_text_key(
    media_type: MediaType,
    work_id: &str,
    edition_id: &str,
    segment_type: &str,
    number: i64,
) -> String {
    format!(
        "derived/{media}/{work_id}/{edition_id}/{segment_type}-{number:04}/cleaned.txt",
        media = media_type.as_str(),
        number = number.max(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_for_every_number_in_range() {
        for n in 0..10_000_i64 {
            let key = derived_cleaned_text_key(MediaType::Novel, "work-1", "edition-1", "chapter", n);
            assert_eq!(
                key,
                format!("derived/novel/work-1/edition-1/chapter-{n:04}/cleaned.txt")
            );
        }
    }

    #[test]
    fn uses_media_type_label_and_segment_type_verbatim() {
        let key = derived_cleaned_text_key(MediaType::Anime, "w", "e", "episode", 12);
        assert_eq!(key, "derived/anime/w/e/episode-0012/cleaned.txt");
    }
}
