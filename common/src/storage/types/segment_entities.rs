use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::StoredObject;

/// One row per segment: the thirteen named entity arrays (spec.md §3,
/// "SegmentEntities"). Unique on `segment_id`.
stored_object!(SegmentEntities, "segment_entities", {
    segment_id: String,
    characters: Vec<String>,
    locations: Vec<String>,
    items: Vec<String>,
    time_refs: Vec<String>,
    organizations: Vec<String>,
    factions: Vec<String>,
    titles_ranks: Vec<String>,
    skills: Vec<String>,
    creatures: Vec<String>,
    concepts: Vec<String>,
    relationships: Vec<String>,
    emotions: Vec<String>,
    keywords: Vec<String>,
    model_version: String
});

impl SegmentEntities {
    pub async fn find_by_segment(
        segment_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(format!(
                "SELECT * FROM {} WHERE segment_id = $segment_id LIMIT 1",
                Self::table_name()
            ))
            .bind(("segment_id", segment_id.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Upsert by `segment_id`; pre-existing rows are preserved unless `force`.
    pub async fn upsert(self, force: bool, db: &SurrealDbClient) -> Result<bool, AppError> {
        if !force && Self::find_by_segment(&self.segment_id, db).await?.is_some() {
            return Ok(false);
        }

        let sql = format!(
            "DELETE {table} WHERE segment_id = $segment_id;
             CREATE {table} CONTENT $content;",
            table = Self::table_name()
        );
        db.query(sql)
            .bind(("segment_id", self.segment_id.clone()))
            .bind(("content", self))
            .await?
            .check()?;
        Ok(true)
    }
}
