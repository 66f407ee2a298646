use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::bank_question::{BankQuestion, QuestionStatus};

/// Category assigned to manual jobs when none is given.
pub const DEFAULT_CATEGORY: &str = "Laws of the Game";

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    #[default]
    Extraction,
    Manual,
}

/// Denormalised per-status question counts kept on a job.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct JobCounters {
    pub total_questions: u32,
    pub approved_count: u32,
    pub pending_count: u32,
    pub rejected_count: u32,
}

impl JobCounters {
    pub fn is_consistent(&self) -> bool {
        u64::from(self.approved_count) + u64::from(self.pending_count) + u64::from(self.rejected_count)
            == u64::from(self.total_questions)
    }

    fn record(&mut self, status: QuestionStatus, count: u32) {
        self.total_questions = self.total_questions.saturating_add(count);
        match status {
            QuestionStatus::Approved => {
                self.approved_count = self.approved_count.saturating_add(count);
            }
            QuestionStatus::PendingReview => {
                self.pending_count = self.pending_count.saturating_add(count);
            }
            QuestionStatus::Rejected => {
                self.rejected_count = self.rejected_count.saturating_add(count);
            }
        }
    }
}

/// Signed change applied to a job's counters. Every field is clamped at zero
/// after the change is applied.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CounterDelta {
    pub total: i64,
    pub approved: i64,
    pub pending: i64,
    pub rejected: i64,
}

impl CounterDelta {
    /// One question of `status`, counted `by` times (negative to remove).
    pub fn for_status(status: QuestionStatus, by: i64) -> Self {
        match status {
            QuestionStatus::Approved => Self {
                approved: by,
                ..Self::default()
            },
            QuestionStatus::PendingReview => Self {
                pending: by,
                ..Self::default()
            },
            QuestionStatus::Rejected => Self {
                rejected: by,
                ..Self::default()
            },
        }
    }

    /// Moves one question between status counters. A no-op when unchanged.
    pub fn status_change(from: QuestionStatus, to: QuestionStatus) -> Self {
        if from == to {
            return Self::default();
        }
        let mut delta = Self::for_status(from, -1);
        delta.merge(Self::for_status(to, 1));
        delta
    }

    /// A newly added question that already has `status`.
    pub fn new_question(status: QuestionStatus) -> Self {
        Self {
            total: 1,
            ..Self::for_status(status, 1)
        }
    }

    pub fn merge(&mut self, other: CounterDelta) {
        self.total = self.total.saturating_add(other.total);
        self.approved = self.approved.saturating_add(other.approved);
        self.pending = self.pending.saturating_add(other.pending);
        self.rejected = self.rejected.saturating_add(other.rejected);
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Requested status change for a job, with optional counter values.
#[derive(Debug, Clone, Default)]
pub struct JobTransition {
    pub status: JobStatus,
    pub counters: Option<JobCounters>,
    pub duplicate_count: Option<u32>,
    pub discarded_count: Option<u32>,
    pub error_message: Option<String>,
}

impl JobTransition {
    pub fn to(status: JobStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReconcileReport {
    pub job_id: String,
    pub before: JobCounters,
    pub after: JobCounters,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

#[derive(Debug, Clone, Copy)]
enum JobEvent {
    Start,
    Complete,
    Fail,
}

impl JobEvent {
    fn as_str(self) -> &'static str {
        match self {
            JobEvent::Start => "start",
            JobEvent::Complete => "complete",
            JobEvent::Fail => "fail",
        }
    }

    fn targeting(status: JobStatus) -> Option<JobEvent> {
        match status {
            JobStatus::Pending => None,
            JobStatus::Processing => Some(JobEvent::Start),
            JobStatus::Completed => Some(JobEvent::Complete),
            JobStatus::Failed => Some(JobEvent::Fail),
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: JobLifecycleMachine,
        initial: Pending,
        states: [Pending, Processing, Completed, Failed],
        events {
            start {
                transition: { from: Pending, to: Processing }
            }
            complete {
                transition: { from: Processing, to: Completed }
            }
            fail {
                transition: { from: Pending, to: Failed }
                transition: { from: Processing, to: Failed }
            }
        }
    }

    pub(super) fn pending() -> JobLifecycleMachine<(), Pending> {
        JobLifecycleMachine::new(())
    }

    pub(super) fn processing() -> Option<JobLifecycleMachine<(), Processing>> {
        pending().start().ok()
    }
}

fn invalid_transition(state: JobStatus, event: JobEvent) -> AppError {
    AppError::Validation(format!(
        "Invalid job transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(state: JobStatus, event: JobEvent) -> Result<JobStatus, AppError> {
    use lifecycle::{pending, processing};
    match (state, event) {
        (JobStatus::Pending, JobEvent::Start) => pending()
            .start()
            .map(|_| JobStatus::Processing)
            .map_err(|_| invalid_transition(state, event)),
        (JobStatus::Pending, JobEvent::Fail) => pending()
            .fail()
            .map(|_| JobStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        (JobStatus::Processing, JobEvent::Complete) => processing()
            .and_then(|machine| machine.complete().ok())
            .map(|_| JobStatus::Completed)
            .ok_or_else(|| invalid_transition(state, event)),
        (JobStatus::Processing, JobEvent::Fail) => processing()
            .and_then(|machine| machine.fail().ok())
            .map(|_| JobStatus::Failed)
            .ok_or_else(|| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

/// Fields written by a transition. Absent values are left untouched by MERGE.
#[derive(Debug, serde::Serialize)]
struct JobPatch {
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_questions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    approved_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rejected_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duplicate_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    discarded_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<SurrealDatetime>,
    updated_at: SurrealDatetime,
}

#[derive(Debug, serde::Deserialize)]
struct StatusTally {
    status: QuestionStatus,
    total: u32,
}

stored_object!(ExtractionJob, "extraction_job", {
    source_key: String,
    display_name: String,
    status: JobStatus,
    #[serde(default)]
    source: JobSource,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    published: bool,
    #[serde(default)]
    total_questions: u32,
    #[serde(default)]
    approved_count: u32,
    #[serde(default)]
    pending_count: u32,
    #[serde(default)]
    rejected_count: u32,
    #[serde(default)]
    duplicate_count: u32,
    #[serde(default)]
    discarded_count: u32,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    completed_at: Option<DateTime<Utc>>
});

impl ExtractionJob {
    /// A job for an uploaded document, already in `processing`.
    pub fn for_upload(
        job_id: impl Into<String>,
        source_key: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: job_id.into(),
            created_at: now,
            updated_at: now,
            source_key: source_key.into(),
            display_name: display_name.into(),
            status: JobStatus::Processing,
            source: JobSource::Extraction,
            description: String::new(),
            category: DEFAULT_CATEGORY.to_string(),
            published: false,
            total_questions: 0,
            approved_count: 0,
            pending_count: 0,
            rejected_count: 0,
            duplicate_count: 0,
            discarded_count: 0,
            error_message: None,
            completed_at: None,
        }
    }

    /// A curated job that questions are added to by hand. It starts completed.
    pub fn manual(title: &str, description: &str, category: Option<&str>) -> Self {
        let now = Utc::now();
        let category = category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY);
        Self {
            source_key: String::new(),
            status: JobStatus::Completed,
            source: JobSource::Manual,
            description: description.trim().to_string(),
            category: category.to_string(),
            completed_at: Some(now),
            ..Self::for_upload(Uuid::now_v7().to_string(), "", title.trim())
        }
    }

    pub fn counters(&self) -> JobCounters {
        JobCounters {
            total_questions: self.total_questions,
            approved_count: self.approved_count,
            pending_count: self.pending_count,
            rejected_count: self.rejected_count,
        }
    }

    pub async fn create(self, db: &SurrealDbClient) -> Result<ExtractionJob, AppError> {
        if db.get_item::<ExtractionJob>(&self.id).await?.is_some() {
            return Err(AppError::Conflict(format!("Job {} already exists", self.id)));
        }
        let job_id = self.id.clone();
        db.store_item(self)
            .await?
            .ok_or_else(|| AppError::InternalError(format!("job {job_id} was not stored")))
    }

    pub async fn get(db: &SurrealDbClient, job_id: &str) -> Result<ExtractionJob, AppError> {
        db.get_item::<ExtractionJob>(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))
    }

    /// All jobs, newest first.
    pub async fn list_all(
        db: &SurrealDbClient,
        limit: usize,
    ) -> Result<Vec<ExtractionJob>, AppError> {
        let jobs: Vec<ExtractionJob> = db
            .client
            .query(
                "SELECT * FROM type::table($table) ORDER BY created_at DESC, id DESC LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("limit", limit))
            .await?
            .take(0)?;
        Ok(jobs)
    }

    /// Applies a lifecycle transition as a partial update.
    ///
    /// The write only lands if the job still has the status that was read,
    /// so concurrent transitions cannot both succeed.
    pub async fn transition(
        db: &SurrealDbClient,
        job_id: &str,
        transition: JobTransition,
    ) -> Result<ExtractionJob, AppError> {
        let current = Self::get(db, job_id).await?;
        let event = JobEvent::targeting(transition.status).ok_or_else(|| {
            AppError::Validation(format!(
                "Jobs cannot be moved back to {}",
                transition.status.as_str()
            ))
        })?;
        let next = compute_next_state(current.status, event)?;
        debug_assert_eq!(next, transition.status);

        let error_message = transition
            .error_message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        match (next, &error_message) {
            (JobStatus::Failed, None) => {
                return Err(AppError::Validation(
                    "A failed job requires an error message".into(),
                ))
            }
            (JobStatus::Failed, Some(_)) | (_, None) => {}
            (_, Some(_)) => {
                return Err(AppError::Validation(
                    "Only failed jobs carry an error message".into(),
                ))
            }
        }

        let now = SurrealDatetime::from(Utc::now());
        let counters = transition.counters;
        let patch = JobPatch {
            status: next,
            total_questions: counters.map(|c| c.total_questions),
            approved_count: counters.map(|c| c.approved_count),
            pending_count: counters.map(|c| c.pending_count),
            rejected_count: counters.map(|c| c.rejected_count),
            duplicate_count: transition.duplicate_count,
            discarded_count: transition.discarded_count,
            error_message,
            completed_at: next.is_terminal().then(|| now.clone()),
            updated_at: now,
        };

        const TRANSITION_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            MERGE $changes
            WHERE status = $expected
            RETURN AFTER;
        "#;

        let updated: Option<ExtractionJob> = db
            .client
            .query(TRANSITION_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", job_id.to_string()))
            .bind(("changes", patch))
            .bind(("expected", current.status.as_str()))
            .await?
            .take(0)?;

        let updated = updated.ok_or_else(|| {
            AppError::Conflict(format!("Job {job_id} changed status concurrently"))
        })?;
        info!(
            job_id = %updated.id,
            from = current.status.as_str(),
            to = updated.status.as_str(),
            "job transitioned"
        );
        Ok(updated)
    }

    /// Applies signed counter deltas in one statement, clamping each counter
    /// at zero. A published job whose approved count reaches zero is
    /// unpublished in the same round trip.
    pub async fn adjust_counters(
        db: &SurrealDbClient,
        job_id: &str,
        delta: CounterDelta,
    ) -> Result<ExtractionJob, AppError> {
        const ADJUST_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET total_questions = math::max([0, total_questions + $total]),
                approved_count = math::max([0, approved_count + $approved]),
                pending_count = math::max([0, pending_count + $pending]),
                rejected_count = math::max([0, rejected_count + $rejected]),
                updated_at = $now
            WHERE status != NONE
            RETURN AFTER;
            UPDATE type::thing($table, $id)
            SET published = false,
                updated_at = $now
            WHERE published = true AND approved_count = 0
            RETURN AFTER;
        "#;

        let mut response = db
            .client
            .query(ADJUST_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", job_id.to_string()))
            .bind(("total", delta.total))
            .bind(("approved", delta.approved))
            .bind(("pending", delta.pending))
            .bind(("rejected", delta.rejected))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let adjusted: Option<ExtractionJob> = response.take(0)?;
        let unpublished: Option<ExtractionJob> = response.take(1)?;

        if let Some(job) = &unpublished {
            warn!(job_id = %job.id, "job unpublished after losing its last approved question");
        }

        unpublished
            .or(adjusted)
            .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))
    }

    /// Publishes or unpublishes a job. Publishing requires a completed job
    /// with at least one approved question; unpublishing is always allowed.
    pub async fn set_published(
        db: &SurrealDbClient,
        job_id: &str,
        publish: bool,
    ) -> Result<ExtractionJob, AppError> {
        let job = Self::get(db, job_id).await?;
        if publish {
            if job.status != JobStatus::Completed {
                return Err(AppError::Conflict(
                    "Only completed jobs can be published".into(),
                ));
            }
            if job.approved_count == 0 {
                return Err(AppError::Conflict(
                    "Cannot publish a job with no approved questions".into(),
                ));
            }
        }

        const PUBLISH_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET published = $published,
                updated_at = $now
            WHERE $published = false OR (status = $completed AND approved_count > 0)
            RETURN AFTER;
        "#;

        let updated: Option<ExtractionJob> = db
            .client
            .query(PUBLISH_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", job_id.to_string()))
            .bind(("published", publish))
            .bind(("completed", JobStatus::Completed.as_str()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?
            .take(0)?;

        let updated = updated.ok_or_else(|| {
            AppError::Conflict(format!("Job {job_id} changed while updating publication"))
        })?;
        info!(job_id = %updated.id, published = updated.published, "job publication updated");
        Ok(updated)
    }

    /// Recomputes the status counters from the job's questions.
    pub async fn reconcile_counters(
        db: &SurrealDbClient,
        job_id: &str,
    ) -> Result<ReconcileReport, AppError> {
        let job = Self::get(db, job_id).await?;

        let tallies: Vec<StatusTally> = db
            .client
            .query(
                "SELECT status, count() AS total FROM type::table($table) WHERE job_id = $job_id GROUP BY status",
            )
            .bind(("table", BankQuestion::table_name()))
            .bind(("job_id", job_id.to_string()))
            .await?
            .take(0)?;

        let mut after = JobCounters::default();
        for tally in tallies {
            after.record(tally.status, tally.total);
        }

        const RECONCILE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET total_questions = $total,
                approved_count = $approved,
                pending_count = $pending,
                rejected_count = $rejected,
                published = IF $approved = 0 THEN false ELSE published END,
                updated_at = $now
            WHERE status != NONE
            RETURN AFTER;
        "#;

        let updated: Option<ExtractionJob> = db
            .client
            .query(RECONCILE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", job_id.to_string()))
            .bind(("total", after.total_questions))
            .bind(("approved", after.approved_count))
            .bind(("pending", after.pending_count))
            .bind(("rejected", after.rejected_count))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?
            .take(0)?;

        if updated.is_none() {
            return Err(AppError::NotFound(format!("Job {job_id} not found")));
        }

        let report = ReconcileReport {
            job_id: job_id.to_string(),
            before: job.counters(),
            after,
        };
        if report.changed() {
            warn!(
                job_id,
                before = ?report.before,
                after = ?report.after,
                "job counters drifted; reconciled"
            );
        }
        Ok(report)
    }
}
