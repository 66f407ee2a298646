use std::collections::HashSet;

use common::{
    error::AppError,
    storage::types::bank_question::{BankQuestion, QuestionSource, QuestionStatus},
    utils::content_hash::fingerprint,
};
use state_machines::core::GuardError;
use tokio::time::timeout;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{
    context::PipelineContext,
    extraction_result::CandidateQuestion,
    state::{Deduplicated, Extracted, Fetched, IngestionMachine, Persisted, Ready},
};

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, key = %ctx.document.key)
)]
pub async fn fetch_document(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Fetched>, AppError> {
    let bytes = ctx.services.fetch_document(ctx.document).await?;
    if bytes.is_empty() {
        return Err(AppError::Validation(format!(
            "Document {} is empty",
            ctx.document.key
        )));
    }

    info!(
        job_id = %ctx.job_id,
        bucket = %ctx.document.bucket,
        bytes = bytes.len(),
        "document fetched"
    );
    ctx.document_bytes = Some(bytes);

    machine
        .fetch()
        .map_err(|(_, guard)| map_guard_error("fetch", &guard))
}

#[instrument(level = "trace", skip_all, fields(job_id = %ctx.job_id))]
pub async fn extract_candidates(
    machine: IngestionMachine<(), Fetched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Extracted>, AppError> {
    let bytes = ctx.take_document_bytes()?;
    let limit = ctx.pipeline_config.tuning.extraction_timeout;

    let outcome = timeout(limit, ctx.services.extract_questions(bytes))
        .await
        .map_err(|_| {
            AppError::Processing(format!(
                "Question extraction timed out after {}s",
                limit.as_secs_f64()
            ))
        })??;

    ctx.discarded_count = outcome.discarded_count();
    info!(
        job_id = %ctx.job_id,
        candidates = outcome.candidates.len(),
        discarded = outcome.discarded.len(),
        "question extraction completed"
    );
    ctx.extraction = Some(outcome);

    machine
        .extract()
        .map_err(|(_, guard)| map_guard_error("extract", &guard))
}

#[instrument(level = "trace", skip_all, fields(job_id = %ctx.job_id))]
pub async fn deduplicate(
    machine: IngestionMachine<(), Extracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Deduplicated>, AppError> {
    let outcome = ctx.take_extraction()?;
    let threshold = ctx.pipeline_config.tuning.auto_approve_threshold;
    let mut staged_hashes: HashSet<String> = HashSet::new();

    for candidate in outcome.candidates {
        let hash = fingerprint(&candidate.text, &candidate.options);

        if staged_hashes.contains(&hash) || BankQuestion::exists_by_hash(ctx.db, &hash).await? {
            debug!(job_id = %ctx.job_id, %hash, "skipping duplicate question");
            ctx.duplicate_count = ctx.duplicate_count.saturating_add(1);
            continue;
        }

        staged_hashes.insert(hash.clone());
        let status = QuestionStatus::for_confidence(candidate.confidence, threshold);
        let question = stage_question(ctx, candidate, hash, status);
        ctx.staged.push(question);
    }

    info!(
        job_id = %ctx.job_id,
        staged = ctx.staged.len(),
        duplicates = ctx.duplicate_count,
        "candidates deduplicated"
    );

    machine
        .deduplicate()
        .map_err(|(_, guard)| map_guard_error("deduplicate", &guard))
}

fn stage_question(
    ctx: &PipelineContext<'_>,
    candidate: CandidateQuestion,
    hash: String,
    status: QuestionStatus,
) -> BankQuestion {
    BankQuestion {
        id: Uuid::now_v7().to_string(),
        created_at: ctx.started_at,
        updated_at: ctx.started_at,
        text: candidate.text,
        options: candidate.options,
        correct_answer: candidate.correct_answer,
        explanation: candidate.explanation,
        law: candidate.law,
        law_reference: candidate.law_reference,
        confidence: candidate.confidence,
        status,
        source_file: ctx.document.key.clone(),
        job_id: ctx.job_id.clone(),
        hash,
        source: QuestionSource::Extraction,
        difficulty: None,
        tags: Vec::new(),
        usage_count: 0,
        reviewed_at: None,
        reviewed_by: None,
    }
}

#[instrument(level = "trace", skip_all, fields(job_id = %ctx.job_id))]
pub async fn persist(
    machine: IngestionMachine<(), Deduplicated>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Persisted>, AppError> {
    let tuning = &ctx.pipeline_config.tuning;
    let staged = ctx.staged.clone();
    let report = BankQuestion::insert_batch(
        ctx.db,
        staged,
        tuning.batch_write_size,
        tuning.write_retry(),
    )
    .await;

    info!(
        job_id = %ctx.job_id,
        persisted = report.persisted_ids.len(),
        failed = report.failed_item_count(),
        failed_chunks = report.failed_chunks.len(),
        "staged questions written"
    );
    ctx.write_report = Some(report);

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
