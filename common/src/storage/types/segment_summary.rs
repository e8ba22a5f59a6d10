use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::StoredObject;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Beat {
    #[serde(rename = "type")]
    pub beat_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyDialogueLine {
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub importance: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tone {
    pub primary: String,
    #[serde(default)]
    pub secondary: Vec<String>,
    pub intensity: f32,
}

impl Default for Tone {
    fn default() -> Self {
        Self {
            primary: String::new(),
            secondary: Vec::new(),
            intensity: 0.5,
        }
    }
}

/// One row per segment: the narrative summary half of the NLP pack
/// (spec.md §3, "SegmentSummary"). Unique on `segment_id`.
stored_object!(SegmentSummary, "segment_summaries", {
    segment_id: String,
    summary: String,
    summary_short: String,
    events: Vec<String>,
    beats: Vec<Beat>,
    key_dialogue: Vec<KeyDialogueLine>,
    tone: Tone,
    model_version: String
});

impl SegmentSummary {
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

    /// Upsert by `segment_id`, honoring the partial-idempotency rule in
    /// spec.md §4.C step 7: a pre-existing row is left untouched unless `force`.
    pub async fn upsert(self, force: bool, db: &SurrealDbClient) -> Result<bool, AppError> {
        if !force {
            if let Some(existing) = Self::find_by_segment(&self.segment_id, db).await? {
                if existing.segment_id == self.segment_id {
                    return Ok(false);
                }
            }
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
