use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{asset::Asset, StoredObject};

/// Many-to-many link from a segment to an asset, with an optional role
/// (spec.md §3, "SegmentAsset").
stored_object!(SegmentAsset, "segment_assets", {
    segment_id: String,
    asset_id: String,
    role: Option<String>
});

impl SegmentAsset {
    /// All assets linked to a segment, hydrated from `assets`.
    pub async fn assets_for_segment(
        segment_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Asset>, AppError> {
        let sql = format!(
            "SELECT * FROM {} WHERE asset_id IN (SELECT VALUE asset_id FROM {} WHERE segment_id = $segment_id)",
            Asset::table_name(),
            Self::table_name(),
        );
        let mut response = db
            .query(sql)
            .bind(("segment_id", segment_id.to_string()))
            .await?;
        let assets: Vec<Asset> = response.take(0)?;
        Ok(assets)
    }

    /// All assets of a given type linked to a segment.
    pub async fn assets_of_type(
        segment_id: &str,
        asset_type: super::asset::AssetType,
        db: &SurrealDbClient,
    ) -> Result<Vec<Asset>, AppError> {
        let all = Self::assets_for_segment(segment_id, db).await?;
        Ok(all
            .into_iter()
            .filter(|a| a.asset_type == asset_type)
            .collect())
    }
}
