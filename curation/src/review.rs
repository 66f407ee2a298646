use std::{collections::BTreeMap, sync::Arc};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            bank_question::{BankQuestion, QuestionStatus, StatusChange},
            extraction_job::CounterDelta,
        },
    },
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::reconcile::settle_job_counters;

/// Upper bound on ids accepted by a single bulk review.
pub const MAX_BULK_REVIEW_ITEMS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewOutcome {
    pub question_id: String,
    pub status: QuestionStatus,
    pub previous_status: QuestionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemResult {
    pub question_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<QuestionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the failure was an infrastructure error worth retrying.
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReviewSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub target_status: QuestionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReviewOutcome {
    pub results: Vec<ItemResult>,
    pub summary: BulkReviewSummary,
    /// Jobs whose counters could be neither adjusted nor recomputed.
    pub unreconciled_jobs: Vec<String>,
}

/// Applies reviewer decisions to questions and keeps the owning jobs'
/// counters in step.
pub struct ReviewCoordinator {
    db: Arc<SurrealDbClient>,
}

impl ReviewCoordinator {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    #[instrument(skip_all, fields(question_id = %question_id, status = status.as_str()))]
    pub async fn review(
        &self,
        question_id: &str,
        status: QuestionStatus,
        reviewed_by: Option<&str>,
    ) -> Result<ReviewOutcome, AppError> {
        let question_id = question_id.trim();
        if question_id.is_empty() {
            return Err(AppError::Validation("question id must not be empty".into()));
        }

        let change = BankQuestion::set_status(&self.db, question_id, status, reviewed_by).await?;

        if change.is_noop() {
            info!(question_id, "status unchanged; counters left as they are");
        } else {
            let delta = CounterDelta::status_change(change.previous_status, change.status);
            if let Err(err) = settle_job_counters(&self.db, &change.job_id, delta).await {
                return Err(AppError::InternalError(format!(
                    "Question {question_id} is now {} but the counters of job {} could not be repaired: {err}",
                    change.status.as_str(),
                    change.job_id
                )));
            }
            info!(
                question_id,
                job_id = %change.job_id,
                from = change.previous_status.as_str(),
                to = change.status.as_str(),
                "question reviewed"
            );
        }

        Ok(ReviewOutcome {
            question_id: change.question_id,
            status: change.status,
            previous_status: change.previous_status,
        })
    }

    /// Reviews each id on its own and settles the counters once per job.
    ///
    /// Item failures are reported in the outcome and never stop the batch.
    #[instrument(skip_all, fields(items = question_ids.len(), status = status.as_str()))]
    pub async fn bulk_review(
        &self,
        question_ids: &[String],
        status: QuestionStatus,
        reviewed_by: Option<&str>,
    ) -> Result<BulkReviewOutcome, AppError> {
        if question_ids.is_empty() || question_ids.len() > MAX_BULK_REVIEW_ITEMS {
            return Err(AppError::Validation(format!(
                "bulk review accepts between 1 and {MAX_BULK_REVIEW_ITEMS} question ids"
            )));
        }

        let mut results = Vec::with_capacity(question_ids.len());
        let mut deltas: BTreeMap<String, CounterDelta> = BTreeMap::new();

        for question_id in question_ids {
            match BankQuestion::set_status(&self.db, question_id, status, reviewed_by).await {
                Ok(change) => {
                    record_delta(&mut deltas, &change);
                    results.push(ItemResult {
                        question_id: question_id.clone(),
                        success: true,
                        previous_status: Some(change.previous_status),
                        error: None,
                        retryable: false,
                    });
                }
                Err(err) => {
                    warn!(question_id = %question_id, error = %err, "bulk review item failed");
                    results.push(ItemResult {
                        question_id: question_id.clone(),
                        success: false,
                        previous_status: None,
                        error: Some(err.to_string()),
                        retryable: err.is_transient(),
                    });
                }
            }
        }

        let unreconciled_jobs = self.settle_counters(deltas).await;

        let successful = results.iter().filter(|r| r.success).count();
        let summary = BulkReviewSummary {
            total: results.len(),
            successful,
            failed: results.len().saturating_sub(successful),
            target_status: status,
        };
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            unreconciled = unreconciled_jobs.len(),
            "bulk review finished"
        );

        Ok(BulkReviewOutcome {
            results,
            summary,
            unreconciled_jobs,
        })
    }

    /// One counter update per job. A failed update falls back to recomputing
    /// the job's counters; jobs where that fails too are returned.
    async fn settle_counters(&self, deltas: BTreeMap<String, CounterDelta>) -> Vec<String> {
        let mut unreconciled = Vec::new();

        for (job_id, delta) in deltas {
            if delta.is_zero() {
                continue;
            }
            if settle_job_counters(&self.db, &job_id, delta).await.is_err() {
                unreconciled.push(job_id);
            }
        }

        unreconciled
    }
}

fn record_delta(deltas: &mut BTreeMap<String, CounterDelta>, change: &StatusChange) {
    if change.is_noop() {
        return;
    }
    deltas
        .entry(change.job_id.clone())
        .or_default()
        .merge(CounterDelta::status_change(
            change.previous_status,
            change.status,
        ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;
    use common::storage::types::{
        bank_question::QuestionSource,
        extraction_job::{ExtractionJob, JobCounters, JobStatus, JobTransition},
        law::Law,
    };
    use common::utils::content_hash::fingerprint;
    use uuid::Uuid;

    fn question(job_id: &str, text: &str, status: QuestionStatus) -> BankQuestion {
        let now = chrono::Utc::now();
        let options = vec!["A".to_string(), "B".into(), "C".into(), "D".into()];
        BankQuestion {
            id: Uuid::now_v7().to_string(),
            created_at: now,
            updated_at: now,
            hash: fingerprint(text, &options),
            text: text.to_string(),
            options,
            correct_answer: 0,
            explanation: "See the law".into(),
            law: Law::Offside,
            law_reference: "Law 11".into(),
            confidence: 0.8,
            status,
            source_file: format!("uploads/{job_id}/paper.pdf"),
            job_id: job_id.to_string(),
            source: QuestionSource::Extraction,
            difficulty: None,
            tags: Vec::new(),
            usage_count: 0,
            reviewed_at: None,
            reviewed_by: None,
        }
    }

    /// A completed job holding one question per given status.
    async fn seeded_job(
        db: &SurrealDbClient,
        job_id: &str,
        statuses: &[QuestionStatus],
    ) -> Vec<BankQuestion> {
        ExtractionJob::for_upload(job_id, format!("uploads/{job_id}/paper.pdf"), "paper.pdf")
            .create(db)
            .await
            .expect("create job");

        let mut questions = Vec::new();
        let mut counters = JobCounters::default();
        for (i, status) in statuses.iter().enumerate() {
            let stored = question(job_id, &format!("{job_id} question {i}?"), *status)
                .insert(db)
                .await
                .expect("insert question");
            counters.total_questions += 1;
            match status {
                QuestionStatus::Approved => counters.approved_count += 1,
                QuestionStatus::PendingReview => counters.pending_count += 1,
                QuestionStatus::Rejected => counters.rejected_count += 1,
            }
            questions.push(stored);
        }

        ExtractionJob::transition(
            db,
            job_id,
            JobTransition {
                counters: Some(counters),
                ..JobTransition::to(JobStatus::Completed)
            },
        )
        .await
        .expect("complete job");
        questions
    }

    #[tokio::test]
    async fn review_moves_counters_and_repeat_is_noop() {
        let db = Arc::new(memory_db().await);
        let questions = seeded_job(
            &db,
            "job-review",
            &[QuestionStatus::PendingReview, QuestionStatus::PendingReview],
        )
        .await;
        let coordinator = ReviewCoordinator::new(Arc::clone(&db));

        let outcome = coordinator
            .review(&questions[0].id, QuestionStatus::Approved, Some("referee"))
            .await
            .expect("review");
        assert_eq!(outcome.previous_status, QuestionStatus::PendingReview);
        assert_eq!(outcome.status, QuestionStatus::Approved);

        let job = ExtractionJob::get(&db, "job-review").await.expect("job");
        assert_eq!(job.pending_count, 1);
        assert_eq!(job.approved_count, 1);
        assert_eq!(job.total_questions, 2);

        let again = coordinator
            .review(&questions[0].id, QuestionStatus::Approved, None)
            .await
            .expect("repeat review");
        assert_eq!(again.previous_status, QuestionStatus::Approved);

        let unchanged = ExtractionJob::get(&db, "job-review").await.expect("job");
        assert_eq!(unchanged.counters(), job.counters());

        let stored = BankQuestion::get(&db, &questions[0].id)
            .await
            .expect("get")
            .expect("question exists");
        assert_eq!(stored.status, QuestionStatus::Approved);
        assert_eq!(stored.reviewed_by.as_deref(), Some("admin"));
        assert!(stored.reviewed_at.is_some());
    }

    #[tokio::test]
    async fn review_of_missing_question_is_not_found() {
        let db = Arc::new(memory_db().await);
        let coordinator = ReviewCoordinator::new(Arc::clone(&db));

        let err = coordinator
            .review("missing", QuestionStatus::Approved, None)
            .await
            .expect_err("missing question");
        assert!(matches!(err, AppError::NotFound(_)));

        let err = coordinator
            .review("  ", QuestionStatus::Approved, None)
            .await
            .expect_err("blank id");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn counters_stay_conserved_across_review_sequences() {
        let db = Arc::new(memory_db().await);
        let questions = seeded_job(
            &db,
            "job-conserve",
            &[
                QuestionStatus::PendingReview,
                QuestionStatus::PendingReview,
                QuestionStatus::Approved,
            ],
        )
        .await;
        let coordinator = ReviewCoordinator::new(Arc::clone(&db));

        let steps = [
            (0, QuestionStatus::Approved),
            (1, QuestionStatus::Rejected),
            (2, QuestionStatus::Rejected),
            (0, QuestionStatus::Approved),
            (1, QuestionStatus::PendingReview),
            (0, QuestionStatus::Rejected),
            (2, QuestionStatus::Approved),
        ];

        for (index, status) in steps {
            coordinator
                .review(&questions[index].id, status, None)
                .await
                .expect("review");

            let job = ExtractionJob::get(&db, "job-conserve").await.expect("job");
            assert!(job.counters().is_consistent(), "{:?}", job.counters());
            assert_eq!(job.total_questions, 3);

            let report = ExtractionJob::reconcile_counters(&db, "job-conserve")
                .await
                .expect("reconcile");
            assert!(!report.changed(), "counters drifted: {report:?}");
        }

        let job = ExtractionJob::get(&db, "job-conserve").await.expect("job");
        assert_eq!(job.approved_count, 1);
        assert_eq!(job.pending_count, 1);
        assert_eq!(job.rejected_count, 1);
    }

    #[tokio::test]
    async fn failed_counter_update_is_repaired_from_questions() {
        let db = Arc::new(memory_db().await);
        let questions = seeded_job(&db, "job-repair", &[QuestionStatus::PendingReview]).await;

        // Stale counters make the incremental update land on approved = 2,
        // which the field assertion refuses; the recount lands on 1.
        ExtractionJob::adjust_counters(
            &db,
            "job-repair",
            CounterDelta {
                total: 1,
                approved: 1,
                ..CounterDelta::default()
            },
        )
        .await
        .expect("drift");
        db.client
            .query("DEFINE FIELD approved_count ON extraction_job ASSERT $value < 2")
            .await
            .expect("field defined");

        let coordinator = ReviewCoordinator::new(Arc::clone(&db));
        let outcome = coordinator
            .review(&questions[0].id, QuestionStatus::Approved, None)
            .await
            .expect("review succeeds after reconciling");
        assert_eq!(outcome.previous_status, QuestionStatus::PendingReview);

        let job = ExtractionJob::get(&db, "job-repair").await.expect("job");
        assert_eq!(
            job.counters(),
            JobCounters {
                total_questions: 1,
                approved_count: 1,
                pending_count: 0,
                rejected_count: 0,
            }
        );
    }

    #[tokio::test]
    async fn unrepairable_counters_are_reported() {
        let db = Arc::new(memory_db().await);
        let questions = seeded_job(&db, "job-stuck", &[QuestionStatus::PendingReview]).await;
        db.client
            .query("DEFINE FIELD approved_count ON extraction_job ASSERT $value < 1")
            .await
            .expect("field defined");

        let coordinator = ReviewCoordinator::new(Arc::clone(&db));
        let err = coordinator
            .review(&questions[0].id, QuestionStatus::Approved, None)
            .await
            .expect_err("counters cannot be written");
        match err {
            AppError::InternalError(message) => assert!(message.contains("job-stuck"), "{message}"),
            other => panic!("expected internal error, got {other:?}"),
        }

        let stored = BankQuestion::get(&db, &questions[0].id)
            .await
            .expect("get")
            .expect("question exists");
        assert_eq!(stored.status, QuestionStatus::Approved);
    }

    #[tokio::test]
    async fn bulk_review_reports_partial_failure() {
        let db = Arc::new(memory_db().await);
        let questions = seeded_job(
            &db,
            "job-bulk",
            &[QuestionStatus::PendingReview, QuestionStatus::PendingReview],
        )
        .await;
        let coordinator = ReviewCoordinator::new(Arc::clone(&db));

        let ids = vec![
            questions[0].id.clone(),
            "does-not-exist".to_string(),
            questions[1].id.clone(),
        ];
        let outcome = coordinator
            .bulk_review(&ids, QuestionStatus::Approved, Some("panel"))
            .await
            .expect("bulk review");

        assert_eq!(outcome.summary.total, 3);
        assert_eq!(outcome.summary.successful, 2);
        assert_eq!(outcome.summary.failed, 1);
        assert_eq!(outcome.summary.target_status, QuestionStatus::Approved);
        assert!(outcome.unreconciled_jobs.is_empty());

        let failed = &outcome.results[1];
        assert!(!failed.success);
        assert!(failed.error.is_some());
        assert!(!failed.retryable);
        assert_eq!(
            outcome.results[0].previous_status,
            Some(QuestionStatus::PendingReview)
        );

        let job = ExtractionJob::get(&db, "job-bulk").await.expect("job");
        assert_eq!(job.approved_count, 2);
        assert_eq!(job.pending_count, 0);
        assert_eq!(job.total_questions, 2);
    }

    #[tokio::test]
    async fn bulk_review_settles_each_job_once() {
        let db = Arc::new(memory_db().await);
        let first = seeded_job(
            &db,
            "job-one",
            &[QuestionStatus::PendingReview, QuestionStatus::Approved],
        )
        .await;
        let second = seeded_job(&db, "job-two", &[QuestionStatus::PendingReview]).await;
        let coordinator = ReviewCoordinator::new(Arc::clone(&db));

        let ids = vec![
            first[0].id.clone(),
            first[1].id.clone(),
            second[0].id.clone(),
        ];
        let outcome = coordinator
            .bulk_review(&ids, QuestionStatus::Rejected, None)
            .await
            .expect("bulk review");
        assert_eq!(outcome.summary.successful, 3);

        let one = ExtractionJob::get(&db, "job-one").await.expect("job");
        assert_eq!(one.rejected_count, 2);
        assert_eq!(one.approved_count, 0);
        assert_eq!(one.pending_count, 0);

        let two = ExtractionJob::get(&db, "job-two").await.expect("job");
        assert_eq!(two.rejected_count, 1);
        assert!(two.counters().is_consistent());
    }

    #[tokio::test]
    async fn bulk_review_rejects_bad_batch_sizes() {
        let db = Arc::new(memory_db().await);
        let coordinator = ReviewCoordinator::new(db);

        let err = coordinator
            .bulk_review(&[], QuestionStatus::Approved, None)
            .await
            .expect_err("empty batch");
        assert!(matches!(err, AppError::Validation(_)));

        let too_many: Vec<String> = (0..=MAX_BULK_REVIEW_ITEMS).map(|i| i.to_string()).collect();
        let err = coordinator
            .bulk_review(&too_many, QuestionStatus::Approved, None)
            .await
            .expect_err("oversized batch");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn deltas_aggregate_per_job() {
        let mut deltas = BTreeMap::new();
        let change = |job: &str, from, to| StatusChange {
            question_id: "q".into(),
            job_id: job.into(),
            previous_status: from,
            status: to,
        };

        record_delta(
            &mut deltas,
            &change("a", QuestionStatus::PendingReview, QuestionStatus::Approved),
        );
        record_delta(
            &mut deltas,
            &change("a", QuestionStatus::Rejected, QuestionStatus::Approved),
        );
        record_delta(
            &mut deltas,
            &change("b", QuestionStatus::Approved, QuestionStatus::Approved),
        );

        assert_eq!(deltas.len(), 1);
        assert_eq!(
            deltas.get("a"),
            Some(&CounterDelta {
                total: 0,
                approved: 2,
                pending: -1,
                rejected: -1,
            })
        );
    }
}
