use std::str::FromStr;

use surrealdb::sql::Datetime as SurrealDatetime;

use crate::{
    error::AppError,
    storage::db::{is_unique_violation, BatchWriteReport, SurrealDbClient, WriteRetryPolicy},
    stored_object,
};

use super::law::Law;

/// Extracted questions at or above this confidence skip the review queue.
pub const AUTO_APPROVE_THRESHOLD: f64 = 0.95;
/// Reviewer recorded when none is supplied.
pub const DEFAULT_REVIEWER: &str = "admin";
pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 200;
pub const OPTION_COUNT: usize = 4;

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    #[default]
    PendingReview,
    Approved,
    Rejected,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::PendingReview => "pending_review",
            QuestionStatus::Approved => "approved",
            QuestionStatus::Rejected => "rejected",
        }
    }

    /// Status assigned to a freshly extracted question.
    pub fn for_confidence(confidence: f64, threshold: f64) -> Self {
        if confidence >= threshold {
            QuestionStatus::Approved
        } else {
            QuestionStatus::PendingReview
        }
    }
}

impl FromStr for QuestionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending_review" => Ok(QuestionStatus::PendingReview),
            "approved" => Ok(QuestionStatus::Approved),
            "rejected" => Ok(QuestionStatus::Rejected),
            other => Err(format!(
                "Invalid status '{other}'. Must be one of: pending_review, approved, rejected"
            )),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSource {
    #[default]
    Extraction,
    Manual,
    Seed,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!(
                "Invalid difficulty '{other}'. Must be one of: easy, medium, hard"
            )),
        }
    }
}

/// Validates a caller-supplied listing limit.
pub fn resolve_list_limit(limit: Option<usize>) -> Result<usize, AppError> {
    match limit {
        None => Ok(DEFAULT_LIST_LIMIT),
        Some(value) if (1..=MAX_LIST_LIMIT).contains(&value) => Ok(value),
        Some(_) => Err(AppError::Validation(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        ))),
    }
}

/// Result of a status write: the question's owner and what it changed from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StatusChange {
    pub question_id: String,
    pub job_id: String,
    pub previous_status: QuestionStatus,
    pub status: QuestionStatus,
}

impl StatusChange {
    pub fn is_noop(&self) -> bool {
        self.previous_status == self.status
    }
}

stored_object!(BankQuestion, "bank_question", {
    text: String,
    options: Vec<String>,
    correct_answer: u8,
    #[serde(default)]
    explanation: String,
    law: Law,
    #[serde(default)]
    law_reference: String,
    confidence: f64,
    status: QuestionStatus,
    #[serde(default)]
    source_file: String,
    job_id: String,
    hash: String,
    #[serde(default)]
    source: QuestionSource,
    #[serde(default)]
    difficulty: Option<Difficulty>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    usage_count: u32,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    reviewed_by: Option<String>
});

impl BankQuestion {
    pub async fn exists_by_hash(db: &SurrealDbClient, hash: &str) -> Result<bool, AppError> {
        let ids: Vec<Thing> = db
            .client
            .query("SELECT VALUE id FROM type::table($table) WHERE hash = $hash LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("hash", hash.to_string()))
            .await?
            .take(0)?;
        Ok(!ids.is_empty())
    }

    /// Stores a single question. A question whose hash is already taken is a
    /// conflict.
    pub async fn insert(self, db: &SurrealDbClient) -> Result<BankQuestion, AppError> {
        let question_id = self.id.clone();
        match db.store_item(self).await {
            Ok(Some(stored)) => Ok(stored),
            Ok(None) => Err(AppError::InternalError(format!(
                "question {question_id} was not stored"
            ))),
            Err(err) if is_unique_violation(&err) => Err(AppError::Conflict(
                "A similar question already exists".into(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Stores many questions in bounded chunks; see
    /// [`SurrealDbClient::store_items_in_chunks`].
    pub async fn insert_batch(
        db: &SurrealDbClient,
        questions: Vec<BankQuestion>,
        chunk_size: usize,
        retry: WriteRetryPolicy,
    ) -> BatchWriteReport {
        db.store_items_in_chunks(questions, chunk_size, retry).await
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<Option<BankQuestion>, AppError> {
        Ok(db.get_item::<BankQuestion>(id).await?)
    }

    /// Sets the review status and returns what it was before, in one round trip.
    pub async fn set_status(
        db: &SurrealDbClient,
        question_id: &str,
        status: QuestionStatus,
        reviewed_by: Option<&str>,
    ) -> Result<StatusChange, AppError> {
        const SET_STATUS_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $status,
                reviewed_at = $now,
                reviewed_by = $reviewed_by,
                updated_at = $now
            WHERE hash != NONE
            RETURN BEFORE;
        "#;

        let reviewer = reviewed_by
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REVIEWER)
            .to_string();

        let before: Option<BankQuestion> = db
            .client
            .query(SET_STATUS_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", question_id.to_string()))
            .bind(("status", status.as_str()))
            .bind(("reviewed_by", reviewer))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?
            .take(0)?;

        let before =
            before.ok_or_else(|| AppError::NotFound(format!("Question {question_id} not found")))?;

        Ok(StatusChange {
            question_id: before.id,
            job_id: before.job_id,
            previous_status: before.status,
            status,
        })
    }

    /// Review queue for a status, oldest first.
    pub async fn list_by_status(
        db: &SurrealDbClient,
        status: QuestionStatus,
        limit: usize,
    ) -> Result<Vec<BankQuestion>, AppError> {
        let questions: Vec<BankQuestion> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE status = $status ORDER BY created_at ASC, id ASC LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("status", status.as_str()))
            .bind(("limit", limit))
            .await?
            .take(0)?;
        Ok(questions)
    }

    /// Questions filed under `law`, optionally narrowed to one status, newest first.
    pub async fn list_by_law(
        db: &SurrealDbClient,
        law: Law,
        status: Option<QuestionStatus>,
        limit: usize,
    ) -> Result<Vec<BankQuestion>, AppError> {
        let query = match status {
            Some(_) => "SELECT * FROM type::table($table) WHERE law = $law AND status = $status ORDER BY created_at DESC, id DESC LIMIT $limit",
            None => "SELECT * FROM type::table($table) WHERE law = $law ORDER BY created_at DESC, id DESC LIMIT $limit",
        };

        let questions: Vec<BankQuestion> = db
            .client
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("law", law.as_str()))
            .bind(("status", status.map(|s| s.as_str())))
            .bind(("limit", limit))
            .await?
            .take(0)?;
        Ok(questions)
    }

    /// Every question, newest first.
    pub async fn list_all(
        db: &SurrealDbClient,
        limit: usize,
    ) -> Result<Vec<BankQuestion>, AppError> {
        let questions: Vec<BankQuestion> = db
            .client
            .query(
                "SELECT * FROM type::table($table) ORDER BY created_at DESC, id DESC LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("limit", limit))
            .await?
            .take(0)?;
        Ok(questions)
    }

    /// Questions owned by a job in creation order.
    pub async fn list_by_job(
        db: &SurrealDbClient,
        job_id: &str,
    ) -> Result<Vec<BankQuestion>, AppError> {
        let questions: Vec<BankQuestion> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE job_id = $job_id ORDER BY created_at ASC, id ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("job_id", job_id.to_string()))
            .await?
            .take(0)?;
        Ok(questions)
    }
}
