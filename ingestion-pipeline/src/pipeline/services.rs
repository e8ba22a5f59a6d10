//! Processor collaborators, factored behind a trait so `SegmentProcessor`
//! can be exercised against a fake model client in tests without a live
//! vLLM endpoint (spec.md §9: "Services value constructed once at startup
//! and passed explicitly; no ambient process-wide state"). Grounded on the
//! teacher's `PipelineServices` trait, generalized from the RAG-ingestion
//! surface (chunk/embed/retrieve) down to the two collaborators this
//! processor actually calls: source-text extraction and model invocation.

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        store::StorageManager,
        types::{asset::Asset, edition::MediaType},
    },
};

use crate::{
    extractor::{extractor_for, ExtractionStats},
    model_client::{ChatStats, ModelClient},
};

#[async_trait]
pub trait PipelineServices: Send + Sync {
    /// Dispatches on `media_type` and runs the matching extractor (spec.md
    /// §4.C step 3).
    async fn extract(
        &self,
        media_type: MediaType,
        assets: &[Asset],
        storage: &StorageManager,
    ) -> Result<(String, ExtractionStats), AppError>;

    /// Calls the model endpoint (spec.md §4.C step 5).
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<(String, ChatStats), AppError>;
}

pub struct DefaultPipelineServices {
    model: ModelClient,
}

impl DefaultPipelineServices {
    pub fn new(model: ModelClient) -> Self {
        Self { model }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn extract(
        &self,
        media_type: MediaType,
        assets: &[Asset],
        storage: &StorageManager,
    ) -> Result<(String, ExtractionStats), AppError> {
        let extractor = extractor_for(media_type);
        extractor
            .extract(crate::extractor::ExtractionInput { assets, storage })
            .await
    }

    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<(String, ChatStats), AppError> {
        self.model.chat(system_prompt, user_prompt, max_tokens).await
    }
}
