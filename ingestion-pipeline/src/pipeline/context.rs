//! Loaded job context (spec.md §4.C step 1). Grounded on the teacher's
//! `PipelineContext`, generalized from a text-content/retrieved-entity bag
//! into the segment/edition/work/asset join this processor actually reads,
//! plus the intermediate values each later stage hands off to the next one
//! (teacher's `text_content`/`analysis` slots, generalized to this
//! pipeline's extract -> invoke -> validate chain).

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            asset::Asset,
            edition::{Edition, MediaType},
            segment::Segment,
            segment_asset::SegmentAsset,
            work::Work,
        },
    },
};

use crate::{extractor::ExtractionStats, model_client::ChatStats, schema::NlpPack};

/// Everything `SegmentProcessor` needs about one segment, loaded in a single
/// round-trip up front so the rest of the pipeline is pure with respect to
/// the catalogue store, plus the mutable slots each stage fills in as the
/// job advances.
pub struct SegmentJobContext {
    pub segment: Segment,
    pub edition: Edition,
    pub work: Work,
    pub assets: Vec<Asset>,

    pub source_text: Option<String>,
    pub extraction_stats: Option<ExtractionStats>,
    pub raw_response: Option<String>,
    pub chat_stats: Option<ChatStats>,
    pub repair_attempted: bool,
    pub repair_succeeded: bool,
    pub nlp_pack: Option<NlpPack>,
}

impl SegmentJobContext {
    /// Fetches the segment joined with its edition and work (spec.md §4.C
    /// step 1: "missing -> fatal").
    pub async fn load(segment_id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let segment: Segment = db
            .get_item(segment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("segment {segment_id}")))?;

        let edition: Edition = db
            .get_item(&segment.edition_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("edition {}", segment.edition_id)))?;

        let work: Work = db
            .get_item(&edition.work_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("work {}", edition.work_id)))?;

        let assets = SegmentAsset::assets_for_segment(segment_id, db).await?;

        Ok(Self {
            segment,
            edition,
            work,
            assets,
            source_text: None,
            extraction_stats: None,
            raw_response: None,
            chat_stats: None,
            repair_attempted: false,
            repair_succeeded: false,
            nlp_pack: None,
        })
    }

    pub fn media_type(&self) -> MediaType {
        self.edition.media_type
    }

    pub fn source_text(&self) -> Result<&str, AppError> {
        self.source_text
            .as_deref()
            .ok_or_else(|| AppError::InternalError("source text expected to be available".into()))
    }

    pub fn take_nlp_pack(&mut self) -> Result<NlpPack, AppError> {
        self.nlp_pack
            .take()
            .ok_or_else(|| AppError::InternalError("nlp pack expected to be available".into()))
    }
}
