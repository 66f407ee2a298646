use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        db::{BatchWriteReport, SurrealDbClient},
        store::DocumentRef,
        types::bank_question::BankQuestion,
    },
};
use tracing::error;

use super::{config::IngestionConfig, extraction_result::ExtractionOutcome, services::PipelineServices};

pub struct PipelineContext<'a> {
    pub job_id: String,
    pub document: &'a DocumentRef,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    /// Creation time stamped on every question staged by this run.
    pub started_at: DateTime<Utc>,
    pub document_bytes: Option<Bytes>,
    pub extraction: Option<ExtractionOutcome>,
    pub staged: Vec<BankQuestion>,
    pub duplicate_count: u32,
    pub discarded_count: u32,
    pub write_report: Option<BatchWriteReport>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        job_id: &str,
        document: &'a DocumentRef,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            document,
            db,
            pipeline_config,
            services,
            started_at: Utc::now(),
            document_bytes: None,
            extraction: None,
            staged: Vec::new(),
            duplicate_count: 0,
            discarded_count: 0,
            write_report: None,
        }
    }

    pub fn take_document_bytes(&mut self) -> Result<Bytes, AppError> {
        self.document_bytes.take().ok_or_else(|| {
            AppError::InternalError("document bytes expected to be available".into())
        })
    }

    pub fn take_extraction(&mut self) -> Result<ExtractionOutcome, AppError> {
        self.extraction.take().ok_or_else(|| {
            AppError::InternalError("extraction outcome expected to be available".into())
        })
    }

    pub fn take_write_report(&mut self) -> Result<BatchWriteReport, AppError> {
        self.write_report.take().ok_or_else(|| {
            AppError::InternalError("write report expected to be available".into())
        })
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            job_id = %self.job_id,
            key = %self.document.key,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
