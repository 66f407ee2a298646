use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::store::{DocumentRef, StorageManager},
    utils::config::AppConfig,
};

use super::extraction_result::ExtractionOutcome;
use crate::extractor::QuestionExtractor;

/// External collaborators of the pipeline. Tests substitute their own.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn fetch_document(&self, document: &DocumentRef) -> Result<Bytes, AppError>;

    async fn extract_questions(&self, document: Bytes) -> Result<ExtractionOutcome, AppError>;
}

pub struct DefaultPipelineServices {
    storage: StorageManager,
    extractor: QuestionExtractor,
}

impl DefaultPipelineServices {
    pub fn new(
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        config: &AppConfig,
        storage: StorageManager,
    ) -> Self {
        Self {
            storage,
            extractor: QuestionExtractor::new(openai_client, config.extraction_model.clone()),
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn fetch_document(&self, document: &DocumentRef) -> Result<Bytes, AppError> {
        Ok(self.storage.fetch_document(document).await?)
    }

    async fn extract_questions(&self, document: Bytes) -> Result<ExtractionOutcome, AppError> {
        self.extractor.extract(&document).await
    }
}
