use std::str::FromStr;

use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            bank_question::{BankQuestion, Difficulty, QuestionSource, QuestionStatus, OPTION_COUNT},
            extraction_job::{CounterDelta, ExtractionJob},
            law::Law,
        },
    },
    utils::content_hash::fingerprint,
};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::reconcile::settle_job_counters;

/// Request to open a hand-curated job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManualJob {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// A question typed in by a curator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualQuestion {
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: i64,
    pub explanation: String,
    pub law: String,
    pub law_reference: String,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Fields of a [`ManualQuestion`] after validation.
struct ValidQuestion {
    text: String,
    options: Vec<String>,
    correct_answer: u8,
    explanation: String,
    law: Law,
    law_reference: String,
    difficulty: Option<Difficulty>,
    tags: Vec<String>,
}

fn required(value: &str, field: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

impl ManualQuestion {
    fn validate(&self) -> Result<ValidQuestion, AppError> {
        let text = required(&self.text, "text")?;
        let explanation = required(&self.explanation, "explanation")?;
        let law_reference = required(&self.law_reference, "lawReference")?;

        let options: Vec<String> = self
            .options
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        if self.options.len() != OPTION_COUNT || options.len() != OPTION_COUNT {
            return Err(AppError::Validation(format!(
                "exactly {OPTION_COUNT} non-empty options are required"
            )));
        }

        let correct_answer = u8::try_from(self.correct_answer)
            .ok()
            .filter(|answer| usize::from(*answer) < OPTION_COUNT)
            .ok_or_else(|| {
                AppError::Validation("correctAnswer must be between 0 and 3".into())
            })?;

        let law = Law::from_str(&self.law).map_err(AppError::Validation)?;

        let difficulty = self
            .difficulty
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(Difficulty::from_str)
            .transpose()
            .map_err(AppError::Validation)?;

        let tags = self
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        Ok(ValidQuestion {
            text,
            options,
            correct_answer,
            explanation,
            law,
            law_reference,
            difficulty,
            tags,
        })
    }
}

#[instrument(skip_all, fields(title = %request.title))]
pub async fn create_manual_job(
    db: &SurrealDbClient,
    request: &ManualJob,
) -> Result<ExtractionJob, AppError> {
    let title = required(&request.title, "title")?;
    let job = ExtractionJob::manual(&title, &request.description, request.category.as_deref())
        .create(db)
        .await?;
    info!(job_id = %job.id, category = %job.category, "manual job created");
    Ok(job)
}

/// Adds an approved question to an existing job and counts it there. A failed
/// count falls back to recounting the job from its questions.
#[instrument(skip_all, fields(job_id = %job_id))]
pub async fn add_manual_question(
    db: &SurrealDbClient,
    job_id: &str,
    input: &ManualQuestion,
) -> Result<BankQuestion, AppError> {
    let valid = input.validate()?;

    let job = ExtractionJob::get(db, job_id).await?;

    let hash = fingerprint(&valid.text, &valid.options);
    if BankQuestion::exists_by_hash(db, &hash).await? {
        return Err(AppError::Conflict(
            "A similar question already exists".into(),
        ));
    }

    let now = Utc::now();
    let question = BankQuestion {
        id: Uuid::now_v7().to_string(),
        created_at: now,
        updated_at: now,
        text: valid.text,
        options: valid.options,
        correct_answer: valid.correct_answer,
        explanation: valid.explanation,
        law: valid.law,
        law_reference: valid.law_reference,
        confidence: 1.0,
        status: QuestionStatus::Approved,
        source_file: job.source_key.clone(),
        job_id: job.id.clone(),
        hash,
        source: QuestionSource::Manual,
        difficulty: valid.difficulty,
        tags: valid.tags,
        usage_count: 0,
        reviewed_at: None,
        reviewed_by: None,
    }
    .insert(db)
    .await?;

    settle_job_counters(
        db,
        &job.id,
        CounterDelta::new_question(QuestionStatus::Approved),
    )
    .await?;

    info!(question_id = %question.id, law = %question.law, "manual question added");
    Ok(question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;
    use common::storage::types::extraction_job::{
        JobCounters, JobSource, JobStatus, DEFAULT_CATEGORY,
    };

    fn offside_question() -> ManualQuestion {
        ManualQuestion {
            text: " Is a player offside when receiving from a throw-in? ".into(),
            options: vec!["Yes".into(), "No".into(), "Only in the box".into(), "Only if active".into()],
            correct_answer: 1,
            explanation: "No offence from a throw-in".into(),
            law: "Law 11".into(),
            law_reference: "Law 11.3".into(),
            difficulty: Some("Medium".into()),
            tags: vec![" offside ".into(), String::new(), "restart".into()],
        }
    }

    async fn manual_job(db: &SurrealDbClient) -> ExtractionJob {
        create_manual_job(
            db,
            &ManualJob {
                title: "Curated offside set".into(),
                description: "Hand-picked".into(),
                category: None,
            },
        )
        .await
        .expect("create job")
    }

    #[test]
    fn reads_camel_case_json() {
        let input: ManualQuestion = serde_json::from_str(
            r#"{
                "text": "Q?",
                "options": ["a", "b", "c", "d"],
                "correctAnswer": 3,
                "explanation": "E",
                "law": "12",
                "lawReference": "Law 12.2"
            }"#,
        )
        .expect("parse");

        let valid = input.validate().expect("valid");
        assert_eq!(valid.correct_answer, 3);
        assert_eq!(valid.law, Law::FoulsAndMisconduct);
        assert!(valid.difficulty.is_none());
        assert!(valid.tags.is_empty());
    }

    #[tokio::test]
    async fn manual_job_starts_completed() {
        let db = memory_db().await;
        let job = manual_job(&db).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.source, JobSource::Manual);
        assert_eq!(job.display_name, "Curated offside set");
        assert_eq!(job.category, DEFAULT_CATEGORY);
        assert!(job.source_key.is_empty());
        assert!(job.completed_at.is_some());

        let err = create_manual_job(&db, &ManualJob::default())
            .await
            .expect_err("blank title");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn manual_question_is_approved_and_counted() {
        let db = memory_db().await;
        let job = manual_job(&db).await;

        let question = add_manual_question(&db, &job.id, &offside_question())
            .await
            .expect("add question");

        assert_eq!(question.status, QuestionStatus::Approved);
        assert_eq!(question.source, QuestionSource::Manual);
        assert!((question.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(question.text, "Is a player offside when receiving from a throw-in?");
        assert_eq!(question.law, Law::Offside);
        assert_eq!(question.difficulty, Some(Difficulty::Medium));
        assert_eq!(question.tags, vec!["offside".to_string(), "restart".to_string()]);

        let job = ExtractionJob::get(&db, &job.id).await.expect("job");
        assert_eq!(job.total_questions, 1);
        assert_eq!(job.approved_count, 1);
    }

    #[tokio::test]
    async fn failed_count_is_repaired_from_questions() {
        let db = memory_db().await;
        let job = manual_job(&db).await;

        // With the stale counters the increment would reach approved = 2.
        ExtractionJob::adjust_counters(
            &db,
            &job.id,
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

        let question = add_manual_question(&db, &job.id, &offside_question())
            .await
            .expect("question added after recount");
        assert_eq!(question.job_id, job.id);

        let job = ExtractionJob::get(&db, &job.id).await.expect("job");
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
    async fn similar_question_conflicts() {
        let db = memory_db().await;
        let job = manual_job(&db).await;
        add_manual_question(&db, &job.id, &offside_question())
            .await
            .expect("first add");

        let mut variant = offside_question();
        variant.text = "IS A PLAYER OFFSIDE   when receiving from a throw-in?".into();
        let err = add_manual_question(&db, &job.id, &variant)
            .await
            .expect_err("duplicate content");
        match err {
            AppError::Conflict(message) => assert_eq!(message, "A similar question already exists"),
            other => panic!("expected conflict, got {other:?}"),
        }

        let job = ExtractionJob::get(&db, &job.id).await.expect("job");
        assert_eq!(job.total_questions, 1);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_lookup() {
        let db = memory_db().await;

        let cases: Vec<Box<dyn Fn(&mut ManualQuestion)>> = vec![
            Box::new(|q: &mut ManualQuestion| q.text = "   ".into()),
            Box::new(|q: &mut ManualQuestion| q.explanation = String::new()),
            Box::new(|q: &mut ManualQuestion| q.law_reference = String::new()),
            Box::new(|q: &mut ManualQuestion| q.options.truncate(3)),
            Box::new(|q: &mut ManualQuestion| q.options[2] = " ".into()),
            Box::new(|q: &mut ManualQuestion| q.correct_answer = 4),
            Box::new(|q: &mut ManualQuestion| q.correct_answer = -1),
            Box::new(|q: &mut ManualQuestion| q.law = "Law 18".into()),
            Box::new(|q: &mut ManualQuestion| q.difficulty = Some("brutal".into())),
        ];

        for mutate in cases {
            let mut input = offside_question();
            mutate(&mut input);
            let err = add_manual_question(&db, "no-such-job", &input)
                .await
                .expect_err("invalid input");
            assert!(matches!(err, AppError::Validation(_)), "{err:?}");
        }

        let err = add_manual_question(&db, "no-such-job", &offside_question())
            .await
            .expect_err("missing job");
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
