mod config;
mod context;
mod extraction_result;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
pub use extraction_result::{
    classify_candidate, parse_model_response, CandidateParse, CandidateQuestion,
    DiscardedCandidate, ExtractionOutcome,
};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use async_openai::Client;
use common::{
    error::AppError,
    storage::{
        db::{BatchWriteReport, SurrealDbClient},
        store::{DocumentRef, StorageManager},
        types::{
            bank_question::{BankQuestion, QuestionStatus},
            extraction_job::{ExtractionJob, JobCounters, JobStatus, JobTransition},
        },
    },
    utils::config::AppConfig,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::upload::UploadTarget;

use self::{
    context::PipelineContext,
    stages::{deduplicate, extract_candidates, fetch_document, persist},
    state::ready,
};

/// Summary of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub job_id: String,
    pub status: JobStatus,
    pub staged: usize,
    pub persisted: usize,
    pub auto_approved: u32,
    pub pending: u32,
    pub duplicates: u32,
    pub discarded: u32,
    pub failed_chunks: Vec<usize>,
}

/// Stage outputs carried from the run to job finalisation.
struct PipelineOutput {
    staged: Vec<BankQuestion>,
    duplicate_count: u32,
    discarded_count: u32,
    write_report: BatchWriteReport,
}

impl PipelineOutput {
    /// Counters over the questions that actually reached the store.
    fn persisted_counters(&self) -> JobCounters {
        let persisted: HashSet<&str> = self
            .write_report
            .persisted_ids
            .iter()
            .map(String::as_str)
            .collect();

        let mut counters = JobCounters::default();
        for question in self
            .staged
            .iter()
            .filter(|q| persisted.contains(q.id.as_str()))
        {
            counters.total_questions = counters.total_questions.saturating_add(1);
            match question.status {
                QuestionStatus::Approved => {
                    counters.approved_count = counters.approved_count.saturating_add(1);
                }
                QuestionStatus::PendingReview => {
                    counters.pending_count = counters.pending_count.saturating_add(1);
                }
                QuestionStatus::Rejected => {
                    counters.rejected_count = counters.rejected_count.saturating_add(1);
                }
            }
        }
        counters
    }
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<async_openai::config::OpenAIConfig>>,
        config: &AppConfig,
        storage: StorageManager,
    ) -> Self {
        let services = DefaultPipelineServices::new(openai_client, config, storage);

        Self::with_services(
            db,
            IngestionConfig::from_app_config(config),
            Arc::new(services),
        )
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Self {
        Self {
            db,
            pipeline_config,
            services,
        }
    }

    /// Runs extraction for an uploaded document and records the outcome on
    /// a new job. The job always ends in `completed` or `failed`.
    #[tracing::instrument(
        skip_all,
        fields(bucket = %document.bucket, key = %document.key)
    )]
    pub async fn process_upload(&self, document: DocumentRef) -> Result<IngestionReport, AppError> {
        let target = UploadTarget::from_key(&document.key);
        let job = ExtractionJob::for_upload(&target.job_id, &document.key, &target.file_name)
            .create(&self.db)
            .await?;
        info!(job_id = %job.id, file_name = %target.file_name, "extraction job created");

        let output = match self.drive_pipeline(&job.id, &document).await {
            Ok(output) => output,
            Err(err) => {
                let reason = err.to_string();
                self.mark_failed(&job.id, &reason).await;
                return Err(AppError::Processing(reason));
            }
        };

        match self.finalize(&job.id, &output).await {
            Ok(report) => Ok(report),
            Err(err) => {
                let reason = err.to_string();
                self.mark_failed(&job.id, &reason).await;
                Err(err)
            }
        }
    }

    async fn finalize(
        &self,
        job_id: &str,
        output: &PipelineOutput,
    ) -> Result<IngestionReport, AppError> {
        let counters = output.persisted_counters();
        let report = &output.write_report;
        let staged = output.staged.len();
        let persisted = report.persisted_ids.len();

        let transition = if report.is_complete() {
            JobTransition::to(JobStatus::Completed)
        } else {
            let failed_chunks: Vec<String> = report
                .failed_chunks
                .iter()
                .map(|c| c.chunk_index.to_string())
                .collect();
            warn!(
                job_id,
                staged,
                persisted,
                failed_chunks = %failed_chunks.join(","),
                "some question chunks could not be written"
            );
            JobTransition::failed(format!(
                "Persisted {persisted} of {staged} questions; chunks [{}] failed",
                failed_chunks.join(", ")
            ))
        };

        let job = ExtractionJob::transition(
            &self.db,
            job_id,
            JobTransition {
                counters: Some(counters),
                duplicate_count: Some(output.duplicate_count),
                discarded_count: Some(output.discarded_count),
                ..transition
            },
        )
        .await?;

        info!(
            job_id,
            status = job.status.as_str(),
            total = counters.total_questions,
            approved = counters.approved_count,
            pending = counters.pending_count,
            duplicates = output.duplicate_count,
            "extraction job finalised"
        );

        Ok(IngestionReport {
            job_id: job.id,
            status: job.status,
            staged,
            persisted,
            auto_approved: counters.approved_count,
            pending: counters.pending_count,
            duplicates: output.duplicate_count,
            discarded: output.discarded_count,
            failed_chunks: report.failed_chunks.iter().map(|c| c.chunk_index).collect(),
        })
    }

    async fn mark_failed(&self, job_id: &str, reason: &str) {
        if let Err(err) =
            ExtractionJob::transition(&self.db, job_id, JobTransition::failed(reason)).await
        {
            error!(job_id, error = %err, "could not mark extraction job failed");
        }
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    #[tracing::instrument(skip_all, fields(job_id = %job_id))]
    async fn drive_pipeline(
        &self,
        job_id: &str,
        document: &DocumentRef,
    ) -> Result<PipelineOutput, AppError> {
        let mut ctx = PipelineContext::new(
            job_id,
            document,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
        );

        let machine = ready();

        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = fetch_document(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let fetch_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = extract_candidates(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let extract_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = deduplicate(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let dedup_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = persist(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let persist_duration = stage_start.elapsed();

        info!(
            job_id = %ctx.job_id,
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            fetch_ms = Self::duration_millis(fetch_duration),
            extract_ms = Self::duration_millis(extract_duration),
            dedup_ms = Self::duration_millis(dedup_duration),
            persist_ms = Self::duration_millis(persist_duration),
            "ingestion pipeline finished"
        );

        let write_report = ctx.take_write_report()?;
        Ok(PipelineOutput {
            staged: std::mem::take(&mut ctx.staged),
            duplicate_count: ctx.duplicate_count,
            discarded_count: ctx.discarded_count,
            write_report,
        })
    }
}
