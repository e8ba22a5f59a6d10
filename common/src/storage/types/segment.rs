use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::StoredObject;

/// An ordered, numbered unit of content within an edition: a chapter, a page
/// set, an episode (spec.md §3, "Segment").
stored_object!(Segment, "segments", {
    edition_id: String,
    segment_type: String,
    number: i64,
    title: String
});

impl Segment {
    /// Zero-pads `number` to 4 digits, matching the derived blob-key convention (spec.md §6).
    pub fn padded_number(&self) -> String {
        format!("{:04}", self.number.max(0))
    }

    /// One page (spec.md §4.E step 1: "page size 1000") of segments
    /// belonging to any of `edition_ids`, oldest first.
    pub async fn list_page(
        edition_ids: &[String],
        offset: i64,
        limit: i64,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(format!(
                "SELECT * FROM {} WHERE edition_id IN $edition_ids ORDER BY created_at ASC LIMIT $limit START $offset",
                Self::table_name()
            ))
            .bind(("edition_ids", edition_ids.to_vec()))
            .bind(("limit", limit))
            .bind(("offset", offset))
            .await?;
        Ok(response.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_number_zero_pads_to_four_digits() {
        let mut segment = Segment {
            id: "s1".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            edition_id: "e1".into(),
            segment_type: "chapter".into(),
            number: 7,
            title: "The Beginning".into(),
        };
        assert_eq!(segment.padded_number(), "0007");

        segment.number = 9999;
        assert_eq!(segment.padded_number(), "9999");
    }
}
