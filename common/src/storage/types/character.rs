use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::StoredObject;

/// A single attributed fact about a character (spec.md §3, §4.B "Facts").
///
/// The model may also emit bare strings for `character_facts`; those are
/// wrapped into this shape by `schema::normalize` with `chapter = None`
/// (spec.md §9 open question, resolved: the object form is canonical).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharacterFact {
    pub fact: String,
    #[serde(default)]
    pub chapter: Option<i64>,
    #[serde(default)]
    pub segment: Option<i64>,
    pub source: String,
}

/// One row per distinct person in a `Work` (spec.md §3, "Character").
/// Unique on `(work_id, lower(name))`.
stored_object!(Character, "characters", {
    work_id: String,
    name: String,
    aliases: Vec<String>,
    character_facts: Vec<CharacterFact>,
    description: String,
    model_version: String
});

impl Character {
    /// All characters of a work, oldest first — the scan order `character_merge::resolve`
    /// relies on for "first match wins" (spec.md §4.B).
    pub async fn list_for_work(work_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(format!(
                "SELECT * FROM {} WHERE work_id = $work_id ORDER BY created_at ASC",
                Self::table_name()
            ))
            .bind(("work_id", work_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn find_by_work_and_lower_name(
        work_id: &str,
        lower_name: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(format!(
                "SELECT * FROM {} WHERE work_id = $work_id AND string::lowercase(name) = $name LIMIT 1",
                Self::table_name()
            ))
            .bind(("work_id", work_id.to_string()))
            .bind(("name", lower_name.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Attempt to create a brand-new character row.
    ///
    /// Returns `Ok(None)` on a `(work_id, lower(name))` unique-constraint
    /// violation rather than an error, so the caller can fall back to the
    /// select-then-update race path (spec.md §4.B "Concurrency hazard",
    /// §7 error kind 5).
    pub async fn try_insert(self, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        match db.store_item(self).await {
            Ok(stored) => Ok(stored),
            Err(err) if is_unique_violation(&err) => Ok(None),
            Err(err) => Err(AppError::from(err)),
        }
    }

    /// Persist an in-place merge of an existing row (full content replace).
    pub async fn save(self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let id = self.id.clone();
        let updated: Option<Self> = db
            .client
            .update((Self::table_name(), id.as_str()))
            .content(self)
            .await?;
        updated.ok_or_else(|| AppError::NotFound(format!("character {id}")))
    }
}

/// Heuristic match on SurrealDB's unique-index violation message. SurrealDB
/// does not expose a typed error variant for this, only a formatted string.
fn is_unique_violation(err: &surrealdb::Error) -> bool {
    let msg = err.to_string();
    msg.contains("already contains") && msg.to_lowercase().contains("index")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn fact(text: &str, segment: i64) -> CharacterFact {
        CharacterFact {
            fact: text.to_string(),
            chapter: None,
            segment: Some(segment),
            source: format!("segment_{segment}"),
        }
    }

    fn character(work_id: &str, name: &str) -> Character {
        let now = Utc::now();
        Character {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            work_id: work_id.to_string(),
            name: name.to_string(),
            aliases: vec!["Art".to_string()],
            character_facts: vec![fact("protagonist", 1)],
            description: String::new(),
            model_version: "nlp_pack_v1".to_string(),
        }
    }

    #[tokio::test]
    async fn try_insert_then_find_by_lower_name() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("memory db");
        db.build_indexes().await.expect("indexes");

        let work_id = "work-1";
        let inserted = character(work_id, "Arthur Leywin")
            .try_insert(&db)
            .await
            .expect("insert")
            .expect("not a duplicate");
        assert_eq!(inserted.name, "Arthur Leywin");

        let found = Character::find_by_work_and_lower_name(work_id, "arthur leywin", &db)
            .await
            .expect("query")
            .expect("found");
        assert_eq!(found.id, inserted.id);
    }

    #[tokio::test]
    async fn list_for_work_is_ordered_oldest_first() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("memory db");
        db.build_indexes().await.expect("indexes");

        let work_id = "work-2";
        let first = character(work_id, "Arthur").try_insert(&db).await.unwrap().unwrap();
        let second = character(work_id, "Tessia").try_insert(&db).await.unwrap().unwrap();

        let listed = Character::list_for_work(work_id, &db).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }
}
