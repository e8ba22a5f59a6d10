use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::StoredObject;

/// The three media types the processor dispatches extraction on (spec.md §4.C).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Novel,
    Manhwa,
    Anime,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Novel => "novel",
            MediaType::Manhwa => "manhwa",
            MediaType::Anime => "anime",
        }
    }
}

stored_object!(Edition, "editions", {
    work_id: String,
    media_type: MediaType
});

impl Edition {
    /// Editions optionally filtered by work and/or media type (spec.md
    /// §4.E step 1: "optionally filtered by work/edition/media_type").
    pub async fn list_matching(
        work_id: Option<&str>,
        media_type: Option<MediaType>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut conditions = Vec::new();
        if work_id.is_some() {
            conditions.push("work_id = $work_id");
        }
        if media_type.is_some() {
            conditions.push("media_type = $media_type");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let mut query = db.query(format!(
            "SELECT * FROM {} {where_clause} ORDER BY created_at ASC",
            Self::table_name()
        ));
        if let Some(w) = work_id {
            query = query.bind(("work_id", w.to_string()));
        }
        if let Some(m) = media_type {
            query = query.bind(("media_type", m));
        }

        let mut response = query.await?;
        Ok(response.take(0)?)
    }
}
